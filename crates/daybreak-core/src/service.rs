use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use daybreak_shared::{
    TaskCreate, TaskDto, TaskId, TaskIdArg, TaskToggleArgs, TaskViewDto, TasksForDateArgs,
    TitleSuggestArgs,
};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::datastore::{Repository, SqliteStore};
use crate::datetime::{Clock, SystemClock, TimeOfDay, format_iso_date, parse_iso_date};
use crate::error::{CoreError, CoreResult};
use crate::recurrence::Recurrence;
use crate::task::{Completion, NewTask, Task};
use crate::view::{TaskView, tasks_for_date};

/// Shared entry point for every command.
///
/// The repository sits behind one mutex, so each operation (toggle's
/// lookup and write included) runs alone against the store.
pub struct TaskService {
    store: Mutex<Box<dyn Repository>>,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(store: Box<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(store),
            clock,
        }
    }

    /// Opens the SQLite store under `data_dir` on the system clock.
    pub fn open(data_dir: &Path) -> CoreResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = SqliteStore::open(data_dir, clock.as_ref())?;
        Ok(Self::new(Box::new(store), clock))
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Runs `f` against the store while holding the lock.
    pub fn read<R>(&self, f: impl FnOnce(&dyn Repository) -> CoreResult<R>) -> CoreResult<R> {
        let store = self.store.lock();
        f(&**store)
    }

    #[instrument(skip(self))]
    pub fn tasks_for_date(&self, date: NaiveDate) -> CoreResult<Vec<TaskView>> {
        let now = self.clock.now();
        self.read(|repo| tasks_for_date(repo, date, now))
    }

    pub fn all_tasks(&self) -> CoreResult<Vec<Task>> {
        self.read(|repo| repo.list_tasks())
    }

    pub fn completions_for_task(&self, task_id: TaskId) -> CoreResult<Vec<Completion>> {
        self.read(|repo| repo.completions_for_task(task_id))
    }

    #[instrument(skip(self), fields(date = %args.date))]
    pub fn get_tasks_for_date(&self, args: TasksForDateArgs) -> CoreResult<Vec<TaskViewDto>> {
        let date = parse_iso_date(&args.date)?;
        Ok(self
            .tasks_for_date(date)?
            .iter()
            .map(TaskView::to_dto)
            .collect())
    }

    pub fn get_all_tasks(&self) -> CoreResult<Vec<TaskDto>> {
        Ok(self.all_tasks()?.iter().map(Task::to_dto).collect())
    }

    #[instrument(skip(self), fields(title_len = create.title.len(), recurrence = %create.recurrence_type))]
    pub fn add_task(&self, create: TaskCreate) -> CoreResult<TaskId> {
        let recurrence =
            Recurrence::parse(&create.recurrence_type, create.recurrence_value.as_deref())?;
        let task_time = parse_optional_time(create.task_time.as_deref())?;
        let reset_time = parse_optional_time(create.reset_time.as_deref())?;

        let task = NewTask::new(&create.title, recurrence, self.clock.now())?
            .with_task_time(task_time)
            .with_reset_time(reset_time);

        let id = self.store.lock().insert_task(&task)?;
        info!(
            id,
            recurrence = %task.recurrence,
            has_task_time = task.task_time.is_some(),
            has_reset_time = task.reset_time.is_some(),
            "task added"
        );
        Ok(id)
    }

    /// Flips the task's completion for its current effective date.
    ///
    /// `args.date` must be a valid ISO date but does not pick the slot: the
    /// toggle always lands on the date the task's reset time makes current,
    /// the same slot today's view reads.
    #[instrument(skip(self), fields(task_id = args.task_id, requested = %args.date))]
    pub fn toggle_task(&self, args: TaskToggleArgs) -> CoreResult<bool> {
        let requested = parse_iso_date(&args.date)?;
        let now = self.clock.now();

        let mut store = self.store.lock();
        let task = store
            .get_task(args.task_id)?
            .ok_or(CoreError::NotFound(args.task_id))?;

        let effective = task.effective_date(now);
        if effective != requested {
            debug!(
                requested = %format_iso_date(requested),
                effective = %format_iso_date(effective),
                "toggle applies to the current effective date"
            );
        }

        let completed = store.toggle_completion(task.id, effective)?;
        info!(
            task_id = task.id,
            effective = %format_iso_date(effective),
            completed,
            "task toggled"
        );
        Ok(completed)
    }

    /// Removes a task and its completions. Missing ids are not an error.
    #[instrument(skip(self), fields(task_id = args.task_id))]
    pub fn delete_task(&self, args: TaskIdArg) -> CoreResult<()> {
        let removed = self.store.lock().delete_task(args.task_id)?;
        if !removed {
            warn!(task_id = args.task_id, "delete requested for unknown task");
        }
        Ok(())
    }

    /// Distinct existing titles containing the query, for autocompletion.
    /// A title equal to the query is left out.
    pub fn suggest_titles(&self, args: TitleSuggestArgs) -> CoreResult<Vec<String>> {
        let query = args.query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(vec![]);
        }

        let mut seen = HashSet::new();
        let suggestions = self
            .all_tasks()?
            .into_iter()
            .map(|task| task.title)
            .filter(|title| {
                let lower = title.to_lowercase();
                lower.contains(&query) && lower != query
            })
            .filter(|title| seen.insert(title.clone()))
            .collect();
        Ok(suggestions)
    }
}

fn parse_optional_time(raw: Option<&str>) -> CoreResult<Option<TimeOfDay>> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TimeOfDay::parse)
        .transpose()
}
