use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use daybreak_shared::TaskViewDto;
use tracing::debug;

use crate::datastore::Repository;
use crate::datetime::{TimeOfDay, format_iso_date};
use crate::error::{CoreError, CoreResult};
use crate::task::Task;

/// A task scheduled on one calendar date together with its completion flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskView {
    pub task: Task,
    pub completed: bool,
    /// Date the completion flag was looked up under.
    pub completion_date: NaiveDate,
}

impl TaskView {
    pub fn to_dto(&self) -> TaskViewDto {
        TaskViewDto {
            task: self.task.to_dto(),
            completed: self.completed,
            completion_date: format_iso_date(self.completion_date),
        }
    }
}

/// Tasks whose recurrence matches `target`, flagged and sorted.
///
/// Reset times only matter when `target` is today: a task resetting at
/// 03:00 viewed at 01:00 reports yesterday's completion. Any other date is
/// looked up as-is.
#[tracing::instrument(skip(repo, target), fields(day = %format_iso_date(target)))]
pub fn tasks_for_date(
    repo: &dyn Repository,
    target: NaiveDate,
    now: NaiveDateTime,
) -> CoreResult<Vec<TaskView>> {
    let viewing_today = target == now.date();

    let mut views = Vec::new();
    for task in repo.list_tasks()? {
        if !task.applies_on(target) {
            continue;
        }

        let completion_date = if viewing_today {
            task.effective_date(now)
        } else {
            target
        };
        let completed = repo.find_completion(task.id, completion_date)?;
        views.push(TaskView {
            task,
            completed,
            completion_date,
        });
    }

    sort_canonical(&mut views);
    debug!(count = views.len(), viewing_today, "built task view");
    Ok(views)
}

/// Incomplete before complete; inside each group timed tasks by time of day,
/// then untimed tasks. Ties keep their incoming order.
pub fn sort_canonical(views: &mut [TaskView]) {
    views.sort_by(|a, b| {
        a.completed
            .cmp(&b.completed)
            .then_with(|| cmp_optional_time(a.task.task_time, b.task.task_time))
    });
}

fn cmp_optional_time(a: Option<TimeOfDay>, b: Option<TimeOfDay>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Orderings offered by the day listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Default,
    Alphabetical,
    ResetTime,
}

impl SortMode {
    /// Reorders a canonically sorted view.
    pub fn apply(&self, views: &mut [TaskView]) {
        match self {
            Self::Default => {}
            Self::Alphabetical => views.sort_by(|a, b| {
                a.task
                    .title
                    .to_lowercase()
                    .cmp(&b.task.title.to_lowercase())
            }),
            Self::ResetTime => {
                views.sort_by(|a, b| cmp_optional_time(a.task.reset_time, b.task.reset_time))
            }
        }
    }
}

impl FromStr for SortMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "alphabetical" | "alpha" | "title" => Ok(Self::Alphabetical),
            "reset-time" | "reset" => Ok(Self::ResetTime),
            other => Err(CoreError::invalid(format!("unknown sort mode: {other:?}"))),
        }
    }
}

/// Order for the task management list: weekly tasks by their first day in
/// a Monday-first week, everything else after. Stable.
pub fn sort_for_manage(tasks: &mut [Task]) {
    tasks.sort_by_key(|task| task.recurrence.manage_rank());
}

/// `(completed, total)` for a day listing.
pub fn completion_summary(views: &[TaskView]) -> (usize, usize) {
    let done = views.iter().filter(|v| v.completed).count();
    (done, views.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::parse_iso_date;
    use crate::recurrence::Recurrence;

    fn view(id: i64, title: &str, time: Option<&str>, completed: bool) -> TaskView {
        let date = parse_iso_date("2024-01-08").expect("date");
        TaskView {
            task: Task {
                id,
                title: title.to_string(),
                task_time: time.map(|t| TimeOfDay::parse(t).expect("time")),
                recurrence: Recurrence::Daily,
                reset_time: None,
                created_at: date.and_hms_opt(0, 0, 0).expect("midnight"),
            },
            completed,
            completion_date: date,
        }
    }

    fn ids(views: &[TaskView]) -> Vec<i64> {
        views.iter().map(|v| v.task.id).collect()
    }

    #[test]
    fn incomplete_first_then_timed_then_untimed() {
        let mut views = vec![
            view(1, "untimed done", None, true),
            view(2, "untimed a", None, false),
            view(3, "late", Some("18:00"), false),
            view(4, "early done", Some("07:00"), true),
            view(5, "untimed b", None, false),
            view(6, "early", Some("08:30"), false),
        ];
        sort_canonical(&mut views);
        assert_eq!(ids(&views), vec![6, 3, 2, 5, 4, 1]);
    }

    #[test]
    fn alphabetical_ignores_case() {
        let mut views = vec![
            view(1, "banana", None, false),
            view(2, "Apple", None, true),
            view(3, "cherry", None, false),
        ];
        SortMode::Alphabetical.apply(&mut views);
        assert_eq!(ids(&views), vec![2, 1, 3]);
    }

    #[test]
    fn reset_time_mode_puts_unreset_tasks_last() {
        let mut views = vec![
            view(1, "a", None, false),
            view(2, "b", None, false),
            view(3, "c", None, false),
        ];
        views[1].task.reset_time = TimeOfDay::parse("04:00").ok();
        views[2].task.reset_time = TimeOfDay::parse("02:00").ok();
        SortMode::ResetTime.apply(&mut views);
        assert_eq!(ids(&views), vec![3, 2, 1]);
    }

    #[test]
    fn summary_counts_completed() {
        let views = vec![
            view(1, "a", None, true),
            view(2, "b", None, false),
            view(3, "c", None, true),
        ];
        assert_eq!(completion_summary(&views), (2, 3));
    }

    #[test]
    fn manage_order_is_monday_first_then_others() {
        let mut tasks: Vec<Task> = vec![
            view(1, "daily", None, false).task,
            view(2, "sunday", None, false).task,
            view(3, "wednesday", None, false).task,
            view(4, "monday", None, false).task,
        ];
        tasks[1].recurrence = Recurrence::parse("weekly", Some("0")).expect("rule");
        tasks[2].recurrence = Recurrence::parse("weekly", Some("3")).expect("rule");
        tasks[3].recurrence = Recurrence::parse("weekly", Some("1,5")).expect("rule");

        sort_for_manage(&mut tasks);
        let order: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(order, vec![4, 3, 2, 1]);
    }

    #[test]
    fn parses_sort_modes() {
        assert_eq!(
            "reset-time".parse::<SortMode>().expect("parse"),
            SortMode::ResetTime
        );
        assert!("random".parse::<SortMode>().is_err());
    }
}
