use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use daybreak_shared::TaskId;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::datetime::{Clock, ISO_DATE_FORMAT, TimeOfDay, format_iso_date};
use crate::error::CoreResult;
use crate::migrations::run_migrations;
use crate::recurrence::Recurrence;
use crate::task::{CREATED_AT_FORMAT, Completion, NewTask, Task};

pub const DB_FILENAME: &str = "daybreak.db";

const TASK_COLUMNS: &str =
    "id, title, task_time, recurrence_type, recurrence_value, reset_time, created_at";

/// Durable storage for tasks and their completions.
///
/// Implementations must cascade completion removal when a task is deleted.
pub trait Repository: Send {
    fn insert_task(&mut self, task: &NewTask) -> CoreResult<TaskId>;

    /// All tasks ordered by creation time, oldest first.
    fn list_tasks(&self) -> CoreResult<Vec<Task>>;

    fn get_task(&self, id: TaskId) -> CoreResult<Option<Task>>;

    /// Returns `false` when the task did not exist.
    fn delete_task(&mut self, id: TaskId) -> CoreResult<bool>;

    fn find_completion(&self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool>;

    /// Returns `false` when the completion was already recorded.
    fn insert_completion(&mut self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool>;

    fn delete_completion(&mut self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool>;

    fn completions_for_task(&self, task_id: TaskId) -> CoreResult<Vec<Completion>>;

    /// Flip the completion for `(task_id, date)` and return the new state.
    /// The lookup and the write must not interleave with another toggle.
    fn toggle_completion(&mut self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool>;
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens `daybreak.db` under `data_dir`, creating the directory and
    /// applying pending migrations stamped with `clock`.
    #[tracing::instrument(skip(data_dir, clock))]
    pub fn open(data_dir: &Path, clock: &dyn Clock) -> CoreResult<Self> {
        fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let store = Self::from_connection(conn, clock)?;

        info!(
            db = %db_path.display(),
            "opened datastore"
        );
        Ok(store)
    }

    pub fn open_in_memory(clock: &dyn Clock) -> CoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, clock)
    }

    fn from_connection(mut conn: Connection, clock: &dyn Clock) -> CoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let applied = run_migrations(&mut conn, clock.now())?;
        debug!(applied = ?applied, "schema migrations checked");
        Ok(Self { conn })
    }
}

impl Repository for SqliteStore {
    #[tracing::instrument(skip(self, task), fields(title = %task.title))]
    fn insert_task(&mut self, task: &NewTask) -> CoreResult<TaskId> {
        self.conn.execute(
            "INSERT INTO tasks (title, task_time, recurrence_type, recurrence_value, reset_time, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.title,
                task.task_time.map(|t| t.to_string()),
                task.recurrence.kind_str(),
                task.recurrence.storage_value(),
                task.reset_time.map(|t| t.to_string()),
                task.created_at.format(CREATED_AT_FORMAT).to_string(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "inserted task");
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    fn get_task(&self, id: TaskId) -> CoreResult<Option<Task>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    fn delete_task(&mut self, id: TaskId) -> CoreResult<bool> {
        let tx = self.conn.transaction()?;
        let completions = tx.execute("DELETE FROM completions WHERE task_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        tx.commit()?;

        info!(id, removed, completions, "deleted task");
        Ok(removed > 0)
    }

    fn find_completion(&self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM completions WHERE task_id = ?1 AND completed_date = ?2",
                params![task_id, format_iso_date(date)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_completion(&mut self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO completions (task_id, completed_date) VALUES (?1, ?2)",
            params![task_id, format_iso_date(date)],
        )?;
        Ok(inserted > 0)
    }

    fn delete_completion(&mut self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM completions WHERE task_id = ?1 AND completed_date = ?2",
            params![task_id, format_iso_date(date)],
        )?;
        Ok(removed > 0)
    }

    fn completions_for_task(&self, task_id: TaskId) -> CoreResult<Vec<Completion>> {
        let mut stmt = self.conn.prepare(
            "SELECT completed_date FROM completions WHERE task_id = ?1 ORDER BY completed_date",
        )?;
        let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for raw in rows {
            let raw = raw?;
            match NaiveDate::parse_from_str(&raw, ISO_DATE_FORMAT) {
                Ok(date) => out.push(Completion { task_id, date }),
                Err(err) => warn!(task_id, raw = %raw, error = %err, "skipping unreadable completion date"),
            }
        }
        Ok(out)
    }

    /// Lookup and write share one transaction.
    #[tracing::instrument(skip(self), fields(day = %format_iso_date(date)))]
    fn toggle_completion(&mut self, task_id: TaskId, date: NaiveDate) -> CoreResult<bool> {
        let key = format_iso_date(date);
        let tx = self.conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM completions WHERE task_id = ?1 AND completed_date = ?2",
            params![task_id, key],
        )?;
        let completed = if removed > 0 {
            false
        } else {
            // A no-op insert means another writer got there first; the task
            // is complete either way.
            tx.execute(
                "INSERT OR IGNORE INTO completions (task_id, completed_date) VALUES (?1, ?2)",
                params![task_id, key],
            )?;
            true
        };
        tx.commit()?;

        debug!(task_id, completed, "toggled completion");
        Ok(completed)
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: TaskId = row.get(0)?;
    let task_time: Option<String> = row.get(2)?;
    let kind: String = row.get(3)?;
    let value: Option<String> = row.get(4)?;
    let reset_time: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(Task {
        id,
        title: row.get(1)?,
        task_time: decode_time(id, "task_time", task_time.as_deref()),
        recurrence: Recurrence::from_storage(&kind, value.as_deref()),
        reset_time: decode_time(id, "reset_time", reset_time.as_deref()),
        created_at: decode_created_at(id, &created_at),
    })
}

fn decode_time(id: TaskId, column: &str, raw: Option<&str>) -> Option<TimeOfDay> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match TimeOfDay::parse(raw) {
        Ok(time) => Some(time),
        Err(err) => {
            warn!(id, column, raw, error = %err, "ignoring unreadable stored time");
            None
        }
    }
}

fn decode_created_at(id: TaskId, raw: &str) -> NaiveDateTime {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, CREATED_AT_FORMAT) {
        return parsed;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.naive_utc();
    }
    warn!(id, raw, "unreadable created_at; ordering task first");
    DateTime::<Utc>::UNIX_EPOCH.naive_utc()
}
