//! Reminder and reset notifications.
//!
//! [`plan_notifications`] decides, for one wall-clock minute, which tasks are
//! due and which reset now or within the hour, and pools each category into
//! at most one message. [`NotificationScheduler`] runs that check once at
//! start and then on a fixed interval until its cancellation token fires.
//! The interval is shorter than a minute so every wall-clock minute is seen
//! at least once; repeats within a minute are dropped.
//!
//! Ticks missed while the process is suspended are not replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use daybreak_shared::TaskId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::datastore::Repository;
use crate::datetime::{Clock, TimeOfDay};
use crate::error::CoreResult;
use crate::service::TaskService;
use crate::task::Task;

/// Default interval between scheduler ticks.
pub const DEFAULT_TICK: Duration = Duration::from_secs(15);

/// Delivery sink for notifications. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log and to stdout, stamped with the
/// service clock.
pub struct LogNotifier {
    clock: Arc<dyn Clock>,
}

impl LogNotifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn line(&self, title: &str, body: &str) -> String {
        format!("[{}] {title}: {body}", self.clock.now().format("%H:%M"))
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
        println!("{}", self.line(title, body));
    }
}

/// Keeps every notification in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str) {
        self.sent.lock().push((title.to_string(), body.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    /// A task's reminder time has arrived and it is still open.
    Due,
    /// A task's reset time is now; a new task day has begun.
    ResetNow,
    /// A task's reset time is one hour away.
    ResetSoon,
}

/// One pooled message covering every task in a category for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub category: NotificationCategory,
    pub title: String,
    pub body: String,
    pub task_ids: Vec<TaskId>,
}

impl Notification {
    fn pooled(category: NotificationCategory, tasks: &[&Task]) -> Option<Self> {
        let (first, rest) = tasks.split_first()?;
        let count = tasks.len();

        let title = match (category, rest.is_empty()) {
            (NotificationCategory::Due, true) => "Task due".to_string(),
            (NotificationCategory::Due, false) => format!("{count} tasks due"),
            (NotificationCategory::ResetNow, true) => "Task has reset".to_string(),
            (NotificationCategory::ResetNow, false) => format!("{count} tasks have reset"),
            (NotificationCategory::ResetSoon, true) => "Task resets in 1 hour".to_string(),
            (NotificationCategory::ResetSoon, false) => {
                format!("{count} tasks reset in 1 hour")
            }
        };
        let body = if rest.is_empty() {
            first.title.clone()
        } else {
            tasks
                .iter()
                .map(|t| t.title.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        Some(Self {
            category,
            title,
            body,
            task_ids: tasks.iter().map(|t| t.id).collect(),
        })
    }
}

/// Notifications owed for the minute containing `now`, in the order due,
/// reset now, reset soon.
pub fn plan_notifications(
    repo: &dyn Repository,
    now: NaiveDateTime,
) -> CoreResult<Vec<Notification>> {
    let today = now.date();
    let minute = TimeOfDay::of(&now);
    let tasks = repo.list_tasks()?;

    let mut due = Vec::new();
    for task in &tasks {
        if task.task_time != Some(minute) || !task.applies_on(today) {
            continue;
        }
        let effective = task.effective_date(now);
        if effective != today || repo.find_completion(task.id, effective)? {
            continue;
        }
        due.push(task);
    }

    let reset_now: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.reset_time == Some(minute) && t.applies_on(today))
        .collect();

    let reset_soon: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.reset_time.map(|r| r.one_hour_earlier()) == Some(minute))
        .collect();

    Ok([
        Notification::pooled(NotificationCategory::Due, &due),
        Notification::pooled(NotificationCategory::ResetNow, &reset_now),
        Notification::pooled(NotificationCategory::ResetSoon, &reset_soon),
    ]
    .into_iter()
    .flatten()
    .collect())
}

/// Background loop delivering [`plan_notifications`] results.
pub struct NotificationScheduler {
    service: Arc<TaskService>,
    notifier: Arc<dyn Notifier>,
    tick_interval: Duration,
    app_name: Option<String>,
}

impl NotificationScheduler {
    pub fn new(service: Arc<TaskService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            service,
            notifier,
            tick_interval: DEFAULT_TICK,
            app_name: None,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Prefix notification titles with `"<name>: "`.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.app_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    /// Check the current minute once and deliver what is owed. Returns the
    /// number of notifications sent.
    pub fn tick(&self) -> CoreResult<usize> {
        let now = self.service.now();
        let planned = self.service.read(|repo| plan_notifications(repo, now))?;

        for notification in &planned {
            let title = match &self.app_name {
                Some(app) => format!("{app}: {}", notification.title),
                None => notification.title.clone(),
            };
            debug!(
                category = ?notification.category,
                tasks = ?notification.task_ids,
                "delivering notification"
            );
            self.notifier.notify(&title, &notification.body);
        }
        Ok(planned.len())
    }

    /// Start the loop on the current tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Tick immediately, then every interval, until `cancel` fires. A minute
    /// already handled is not checked twice.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_ms = self.tick_interval.as_millis() as u64, "notification scheduler started");
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_minute: Option<NaiveDateTime> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("notification scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let minute = self
                        .service
                        .now()
                        .with_second(0)
                        .and_then(|t| t.with_nanosecond(0));
                    if minute.is_some() && minute == last_minute {
                        continue;
                    }
                    last_minute = minute;

                    if let Err(err) = self.tick() {
                        error!(error = %err, "notification check failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::SqliteStore;
    use crate::datetime::{FixedClock, parse_iso_date};
    use crate::recurrence::Recurrence;
    use crate::task::NewTask;

    fn at(date: &str, hour: u32, minute: u32) -> NaiveDateTime {
        parse_iso_date(date)
            .expect("date")
            .and_hms_opt(hour, minute, 0)
            .expect("time")
    }

    fn add(
        store: &mut SqliteStore,
        title: &str,
        rule: Recurrence,
        task_time: Option<&str>,
        reset_time: Option<&str>,
    ) -> TaskId {
        let task = NewTask::new(title, rule, at("2024-01-01", 0, 0))
            .expect("new task")
            .with_task_time(task_time.map(|t| TimeOfDay::parse(t).expect("time")))
            .with_reset_time(reset_time.map(|t| TimeOfDay::parse(t).expect("time")));
        store.insert_task(&task).expect("insert")
    }

    #[test]
    fn reset_now_pools_into_one_message() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(&mut store, "Dishes", Recurrence::Daily, None, Some("10:00"));
        add(&mut store, "Laundry", Recurrence::Daily, None, Some("10:00"));

        let planned = plan_notifications(&store, at("2024-01-08", 10, 0)).expect("plan");
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].category, NotificationCategory::ResetNow);
        assert_eq!(planned[0].title, "2 tasks have reset");
        assert!(planned[0].body.contains("Dishes"));
        assert!(planned[0].body.contains("Laundry"));
    }

    #[test]
    fn single_due_task_uses_singular_phrasing() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(&mut store, "Stretch", Recurrence::Daily, Some("09:00"), None);

        let planned = plan_notifications(&store, at("2024-01-08", 9, 0)).expect("plan");
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].title, "Task due");
        assert_eq!(planned[0].body, "Stretch");

        assert!(plan_notifications(&store, at("2024-01-08", 9, 1))
            .expect("plan")
            .is_empty());
    }

    #[test]
    fn due_skips_completed_and_unscheduled_tasks() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        let done = add(&mut store, "Done", Recurrence::Daily, Some("09:00"), None);
        add(
            &mut store,
            "Tuesdays",
            Recurrence::parse("weekly", Some("2")).expect("rule"),
            Some("09:00"),
            None,
        );
        add(&mut store, "Open", Recurrence::Daily, Some("09:00"), None);
        let now = at("2024-01-08", 9, 0);
        store.insert_completion(done, now.date()).expect("complete");

        let planned = plan_notifications(&store, now).expect("plan");
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].body, "Open");
    }

    #[test]
    fn due_waits_for_the_task_day_to_begin() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(&mut store, "Night owl", Recurrence::Daily, Some("01:00"), Some("03:00"));

        let planned = plan_notifications(&store, at("2024-01-08", 1, 0)).expect("plan");
        assert!(planned.iter().all(|n| n.category != NotificationCategory::Due));
    }

    #[test]
    fn reset_soon_wraps_before_midnight() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(&mut store, "Journal", Recurrence::Daily, None, Some("00:30"));

        let planned = plan_notifications(&store, at("2024-01-08", 23, 30)).expect("plan");
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].category, NotificationCategory::ResetSoon);
        assert_eq!(planned[0].title, "Task resets in 1 hour");
    }

    #[test]
    fn categories_fire_independently_in_one_tick() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(&mut store, "Due A", Recurrence::Daily, Some("10:00"), None);
        add(&mut store, "Due B", Recurrence::Daily, Some("10:00"), None);
        add(&mut store, "Resets", Recurrence::Daily, None, Some("10:00"));
        add(&mut store, "Soon", Recurrence::Daily, None, Some("11:00"));

        let planned = plan_notifications(&store, at("2024-01-08", 10, 0)).expect("plan");
        let categories: Vec<NotificationCategory> = planned.iter().map(|n| n.category).collect();
        assert_eq!(
            categories,
            vec![
                NotificationCategory::Due,
                NotificationCategory::ResetNow,
                NotificationCategory::ResetSoon
            ]
        );
        assert_eq!(planned[0].title, "2 tasks due");
        assert_eq!(planned[0].body, "Due A, Due B");
    }

    #[test]
    fn reset_now_respects_recurrence() {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(
            &mut store,
            "Mondays",
            Recurrence::parse("weekly", Some("1")).expect("rule"),
            None,
            Some("10:00"),
        );

        // 2024-01-09 is a Tuesday.
        let planned = plan_notifications(&store, at("2024-01-09", 10, 0)).expect("plan");
        assert!(planned.is_empty());
    }

    fn scheduler_at(now: NaiveDateTime) -> (NotificationScheduler, Arc<RecordingNotifier>, Arc<TaskService>) {
        let mut store = SqliteStore::open_in_memory(&FixedClock::new(at("2024-01-01", 0, 0))).expect("store");
        add(&mut store, "Dishes", Recurrence::Daily, None, Some("10:00"));
        add(&mut store, "Laundry", Recurrence::Daily, None, Some("10:00"));

        let service = Arc::new(TaskService::new(
            Box::new(store),
            Arc::new(FixedClock::new(now)),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = NotificationScheduler::new(service.clone(), notifier.clone());
        (scheduler, notifier, service)
    }

    #[test]
    fn log_line_uses_injected_clock() {
        let notifier = LogNotifier::new(Arc::new(FixedClock::new(at("2024-01-08", 7, 5))));
        assert_eq!(notifier.line("Task due", "Stretch"), "[07:05] Task due: Stretch");
    }

    #[test]
    fn default_tick_is_shorter_than_a_minute() {
        let (scheduler, _, _) = scheduler_at(at("2024-01-08", 10, 0));
        assert_eq!(scheduler.tick_interval, DEFAULT_TICK);
        assert!(DEFAULT_TICK < Duration::from_secs(60));
    }

    #[test]
    fn tick_delivers_with_app_prefix() {
        let (scheduler, notifier, _) = scheduler_at(at("2024-01-08", 10, 0));
        let scheduler = scheduler.with_app_name("Daybreak");

        assert_eq!(scheduler.tick().expect("tick"), 1);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Daybreak: 2 tasks have reset");
        assert_eq!(sent[0].1, "Dishes, Laundry");
    }

    #[tokio::test]
    async fn run_ticks_at_start_once_per_minute_and_stops_on_cancel() {
        let (scheduler, notifier, _) = scheduler_at(at("2024-01-08", 10, 0));
        let scheduler = scheduler.with_tick_interval(Duration::from_millis(10));

        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler stops after cancel")
            .expect("scheduler task joins cleanly");

        // The clock never leaves 10:00, so repeated ticks add nothing.
        assert_eq!(notifier.sent().len(), 1);
    }
}
