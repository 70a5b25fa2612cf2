//! Versioned SQLite schema migrations.
//!
//! Each step is recorded in `schema_migrations` once applied. Steps are
//! written so that running them against a database that already has the
//! change (for example one created before the migration table existed) is a
//! no-op. A `tasks` table from before recurrence rules existed carries no
//! usable rows and is dropped, together with its completions, by the first
//! step.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Transaction, params};
use tracing::{debug, info, warn};

/// One ordered schema change.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_tasks",
        apply: create_tasks,
    },
    Migration {
        version: 2,
        name: "create_completions",
        apply: create_completions,
    },
    Migration {
        version: 3,
        name: "add_reset_time",
        apply: add_reset_time,
    },
    Migration {
        version: 4,
        name: "index_completions_by_date",
        apply: index_completions_by_date,
    },
];

const MIGRATION_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#;

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Highest applied version, `0` for a fresh database.
pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.execute_batch(MIGRATION_TABLE_SQL)?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

/// Apply every pending migration in order, stamping each with `now`.
/// Returns the versions applied.
#[tracing::instrument(skip(conn))]
pub fn run_migrations(conn: &mut Connection, now: NaiveDateTime) -> rusqlite::Result<Vec<u32>> {
    let current = current_version(conn)?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        (migration.apply)(&tx)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.name,
                now.to_string()
            ],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
        applied.push(migration.version);
    }

    if applied.is_empty() {
        debug!(version = current, "schema already up to date");
    }
    Ok(applied)
}

fn create_tasks(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    drop_pre_recurrence_layout(tx)?;
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            title            TEXT NOT NULL,
            task_time        TEXT,
            recurrence_type  TEXT NOT NULL,
            recurrence_value TEXT,
            created_at       TEXT NOT NULL
        );
        "#,
    )
}

/// The earliest layout stored neither a recurrence rule nor a time, so its
/// tasks cannot be carried over.
fn drop_pre_recurrence_layout(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if !table_exists(tx, "tasks")? || column_exists(tx, "tasks", "recurrence_type")? {
        return Ok(());
    }
    warn!("dropping tasks table without recurrence columns");
    tx.execute_batch("DROP TABLE IF EXISTS completions; DROP TABLE IF EXISTS tasks;")
}

fn create_completions(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS completions (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id        INTEGER NOT NULL,
            completed_date TEXT NOT NULL,
            UNIQUE(task_id, completed_date),
            FOREIGN KEY(task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );
        "#,
    )
}

fn add_reset_time(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    if column_exists(tx, "tasks", "reset_time")? {
        debug!("tasks.reset_time already present");
        return Ok(());
    }
    tx.execute_batch("ALTER TABLE tasks ADD COLUMN reset_time TEXT;")
}

fn index_completions_by_date(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_completions_date ON completions(completed_date);",
    )
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 8)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .expect("timestamp")
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        let applied = run_migrations(&mut conn, stamp()).expect("migrate");

        assert_eq!(applied, vec![1, 2, 3, 4]);
        assert_eq!(current_version(&conn).expect("version"), latest_version());

        let tables = table_names(&conn);
        assert!(tables.contains(&"tasks".to_owned()));
        assert!(tables.contains(&"completions".to_owned()));
        assert!(tables.contains(&"schema_migrations".to_owned()));
        assert!(column_exists(&conn, "tasks", "reset_time").expect("pragma"));
    }

    #[test]
    fn rerunning_is_a_no_op() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        run_migrations(&mut conn, stamp()).expect("first run");
        let applied = run_migrations(&mut conn, stamp()).expect("second run");
        assert!(applied.is_empty());
    }

    #[test]
    fn legacy_database_without_reset_time_is_upgraded() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            r#"
            CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                task_time TEXT,
                recurrence_type TEXT NOT NULL,
                recurrence_value TEXT,
                created_at TEXT NOT NULL
            );
            INSERT INTO tasks (title, recurrence_type, recurrence_value, created_at)
                VALUES ('Legacy', 'weekly', '1', '2023-01-01T00:00:00.000000');
            "#,
        )
        .expect("legacy schema");

        run_migrations(&mut conn, stamp()).expect("migrate legacy");

        assert!(column_exists(&conn, "tasks", "reset_time").expect("pragma"));
        let title: String = conn
            .query_row("SELECT title FROM tasks", [], |row| row.get(0))
            .expect("legacy row survives");
        assert_eq!(title, "Legacy");
    }

    #[test]
    fn pre_recurrence_layout_is_replaced() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            r#"
            CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE completions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                completed_date TEXT NOT NULL
            );
            INSERT INTO tasks (title, created_at) VALUES ('Ancient', '2022-05-01');
            INSERT INTO completions (task_id, completed_date) VALUES (1, '2022-05-01');
            "#,
        )
        .expect("pre-recurrence schema");

        assert_eq!(
            run_migrations(&mut conn, stamp()).expect("migrate"),
            vec![1, 2, 3, 4]
        );

        for column in ["task_time", "recurrence_type", "recurrence_value", "reset_time"] {
            assert!(column_exists(&conn, "tasks", column).expect("pragma"), "{column}");
        }
        let counts: (i64, i64) = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM tasks), (SELECT COUNT(*) FROM completions)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("count rows");
        assert_eq!(counts, (0, 0));

        let applied_at: String = conn
            .query_row(
                "SELECT applied_at FROM schema_migrations WHERE version = 1",
                [],
                |row| row.get(0),
            )
            .expect("migration stamp");
        assert_eq!(applied_at, stamp().to_string());
    }

    #[test]
    fn each_step_is_idempotent_in_isolation() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        for migration in MIGRATIONS {
            for _ in 0..2 {
                let tx = conn.transaction().expect("tx");
                (migration.apply)(&tx).expect(migration.name);
                tx.commit().expect("commit");
            }
        }
        assert!(column_exists(&conn, "tasks", "reset_time").expect("pragma"));
    }

    #[test]
    fn partially_migrated_database_resumes() {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(MIGRATION_TABLE_SQL).expect("migration table");
        {
            let tx = conn.transaction().expect("tx");
            create_tasks(&tx).expect("step 1");
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (1, 'create_tasks', 'x')",
                [],
            )
            .expect("record step 1");
            tx.commit().expect("commit");
        }

        let applied = run_migrations(&mut conn, stamp()).expect("resume");
        assert_eq!(applied, vec![2, 3, 4]);
    }
}
