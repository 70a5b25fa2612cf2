use chrono::{NaiveDate, NaiveDateTime};
use daybreak_shared::{TaskDto, TaskId};

use crate::datetime::{TimeOfDay, effective_date};
use crate::error::{CoreError, CoreResult};
use crate::recurrence::Recurrence;

/// Fixed-width so that lexical order of the stored column is chronological.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub task_time: Option<TimeOfDay>,
    pub recurrence: Recurrence,
    pub reset_time: Option<TimeOfDay>,
    pub created_at: NaiveDateTime,
}

/// A validated task that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub task_time: Option<TimeOfDay>,
    pub recurrence: Recurrence,
    pub reset_time: Option<TimeOfDay>,
    pub created_at: NaiveDateTime,
}

impl NewTask {
    pub fn new(
        title: &str,
        recurrence: Recurrence,
        now: NaiveDateTime,
    ) -> CoreResult<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::invalid("task title cannot be empty"));
        }

        Ok(Self {
            title: title.to_string(),
            task_time: None,
            recurrence,
            reset_time: None,
            created_at: now,
        })
    }

    pub fn with_task_time(mut self, time: Option<TimeOfDay>) -> Self {
        self.task_time = time;
        self
    }

    pub fn with_reset_time(mut self, time: Option<TimeOfDay>) -> Self {
        self.reset_time = time;
        self
    }
}

impl Task {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.recurrence.matches(date)
    }

    /// Date a completion toggled at `now` lands on.
    pub fn effective_date(&self, now: NaiveDateTime) -> NaiveDate {
        effective_date(self.reset_time, now)
    }

    pub fn to_dto(&self) -> TaskDto {
        TaskDto {
            id: self.id,
            title: self.title.clone(),
            task_time: self.task_time.map(|t| t.to_string()),
            recurrence_type: self.recurrence.kind_str().to_string(),
            recurrence_value: self.recurrence.storage_value(),
            reset_time: self.reset_time.map(|t| t.to_string()),
            created_at: self.created_at.format(CREATED_AT_FORMAT).to_string(),
        }
    }
}

/// One recorded completion, keyed by task and attributed date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Completion {
    pub task_id: TaskId,
    pub date: NaiveDate,
}
