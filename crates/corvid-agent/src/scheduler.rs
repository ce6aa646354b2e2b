// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled task poller.
//!
//! [`TaskScheduler`] polls for due tasks, fires each one through the store
//! (which writes the task prompt and a pending job atomically) and wakes the
//! agent worker. Cron expressions are evaluated in the configured default
//! timezone; plain intervals restart from the moment the task fired.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use corvid_config::CorvidConfig;
use corvid_core::types::{NewScheduledTask, ScheduledTask, ScheduledTaskId, TaskFiring};
use corvid_core::{CorvidError, ScheduleStore};
use croner::Cron;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// When a task should next run after `after_ms`.
///
/// A cron expression wins over an interval. `None` means the task is a
/// one-shot with nothing left to run.
pub fn next_run_after(
    cron_expression: Option<&str>,
    interval_ms: Option<i64>,
    after_ms: i64,
    timezone: Tz,
) -> Result<Option<i64>, CorvidError> {
    if let Some(expression) = cron_expression {
        let cron: Cron = expression.parse().map_err(|e| {
            CorvidError::Config(format!("invalid cron expression `{expression}`: {e}"))
        })?;
        let after = Utc
            .timestamp_millis_opt(after_ms)
            .single()
            .ok_or_else(|| CorvidError::Internal(format!("timestamp {after_ms} out of range")))?
            .with_timezone(&timezone);
        let next = cron.find_next_occurrence(&after, false).map_err(|e| {
            CorvidError::Config(format!("cron expression `{expression}` never fires: {e}"))
        })?;
        return Ok(Some(next.timestamp_millis()));
    }
    match interval_ms {
        Some(ms) if ms > 0 => Ok(Some(after_ms.saturating_add(ms))),
        Some(ms) => Err(CorvidError::Config(format!(
            "task interval must be positive, got {ms} ms"
        ))),
        None => Ok(None),
    }
}

/// Fires due scheduled tasks into the job queue.
pub struct TaskScheduler {
    store: Arc<dyn ScheduleStore>,
    timezone: Tz,
    batch_size: usize,
    poll_interval: Duration,
    worker: Option<Arc<Notify>>,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, config: &CorvidConfig) -> Result<Self, CorvidError> {
        let timezone: Tz = config.tools.default_timezone.parse().map_err(|_| {
            CorvidError::Config(format!(
                "unknown timezone `{}` in tools.default_timezone",
                config.tools.default_timezone
            ))
        })?;
        Ok(Self {
            store,
            timezone,
            batch_size: config.scheduler.batch_size.max(1),
            poll_interval: config.scheduler.poll_interval(),
            worker: None,
        })
    }

    /// Wakes `notify` whenever a task enqueues a job.
    pub fn with_worker_notify(mut self, notify: Arc<Notify>) -> Self {
        self.worker = Some(notify);
        self
    }

    /// Validates the schedule and stores the task.
    ///
    /// Without an explicit `next_run_at` the first run is the next cron
    /// occurrence or one interval from `now_ms`. A task with neither a cron
    /// expression, an interval nor a first run time is rejected.
    pub async fn create_task(
        &self,
        mut task: NewScheduledTask,
        now_ms: i64,
    ) -> Result<ScheduledTaskId, CorvidError> {
        if task.name.trim().is_empty() {
            return Err(CorvidError::Config("task name must not be empty".into()));
        }
        if task.payload.trim().is_empty() {
            return Err(CorvidError::Config(format!(
                "task `{}` has an empty payload",
                task.name
            )));
        }
        let next = next_run_after(
            task.cron_expression.as_deref(),
            task.interval_ms,
            now_ms,
            self.timezone,
        )?;
        task.next_run_at = task.next_run_at.or(next);
        if task.next_run_at.is_none() {
            return Err(CorvidError::Config(format!(
                "task `{}` needs a cron expression, an interval or a first run time",
                task.name
            )));
        }

        let id = self.store.create_scheduled_task(&task).await?;
        info!(
            task_id = %id,
            name = task.name.as_str(),
            next_run_at = task.next_run_at,
            "scheduled task created"
        );
        Ok(id)
    }

    /// Fires every task due at `now_ms`, up to one batch.
    pub async fn run_due(&self, now_ms: i64) -> Result<Vec<TaskFiring>, CorvidError> {
        let due = self.store.due_scheduled_tasks(now_ms, self.batch_size).await?;
        let mut fired = Vec::with_capacity(due.len());
        for task in due {
            if let Some(firing) = self.fire(&task, now_ms).await? {
                fired.push(firing);
            }
        }
        if !fired.is_empty()
            && let Some(worker) = &self.worker
        {
            worker.notify_one();
        }
        Ok(fired)
    }

    async fn fire(
        &self,
        task: &ScheduledTask,
        now_ms: i64,
    ) -> Result<Option<TaskFiring>, CorvidError> {
        let next = match next_run_after(
            task.cron_expression.as_deref(),
            task.interval_ms,
            now_ms,
            self.timezone,
        ) {
            Ok(next) => next,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "disabling task with unusable schedule");
                self.store.set_task_enabled(&task.id, false).await?;
                return Ok(None);
            }
        };

        let firing = self.store.fire_scheduled_task(&task.id, now_ms, next).await?;
        match &firing {
            Some(firing) => info!(
                task_id = %task.id,
                name = task.name.as_str(),
                job_id = %firing.job_id,
                next_run_at = next,
                "scheduled task fired"
            ),
            None => debug!(task_id = %task.id, "task already fired elsewhere"),
        }
        Ok(firing)
    }

    /// Polls until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "task scheduler running"
        );

        while !cancel.is_cancelled() {
            match self.run_due(Utc::now().timestamp_millis()).await {
                Ok(fired) if fired.len() == self.batch_size => continue,
                Ok(_) => {}
                Err(e) => error!(error = %e, "failed to process due tasks"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("task scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::types::JobStatus;
    use corvid_core::{ConversationStore, JobStore, Role};
    use corvid_test_utils::TestHarness;

    const MINUTE: i64 = 60_000;

    fn scheduler(harness: &TestHarness) -> TaskScheduler {
        TaskScheduler::new(harness.storage.clone(), &harness.config).unwrap()
    }

    fn interval_task(name: &str, interval_ms: i64) -> NewScheduledTask {
        NewScheduledTask {
            name: name.into(),
            description: Some("test task".into()),
            cron_expression: None,
            interval_ms: Some(interval_ms),
            payload: "Summarize the news".into(),
            conversation_id: None,
            next_run_at: None,
        }
    }

    #[test]
    fn interval_schedules_from_the_given_time() {
        assert_eq!(
            next_run_after(None, Some(MINUTE), 1_000, Tz::UTC).unwrap(),
            Some(1_000 + MINUTE)
        );
        assert_eq!(next_run_after(None, None, 1_000, Tz::UTC).unwrap(), None);
        assert!(next_run_after(None, Some(0), 1_000, Tz::UTC).is_err());
    }

    #[test]
    fn cron_finds_the_next_occurrence() {
        // 2026-01-01T00:00:30Z
        let start = 1_767_225_630_000;
        let next = next_run_after(Some("*/5 * * * *"), Some(1), start, Tz::UTC)
            .unwrap()
            .unwrap();
        assert_eq!(next, 1_767_225_900_000);
    }

    #[test]
    fn cron_uses_the_configured_timezone() {
        // 2026-01-01T00:00:00Z is 09:00 in Tokyo; the next 10:00 there is 01:00Z.
        let start = 1_767_225_600_000;
        let next = next_run_after(Some("0 10 * * *"), None, start, chrono_tz::Asia::Tokyo)
            .unwrap()
            .unwrap();
        assert_eq!(next, start + 60 * MINUTE);
    }

    #[test]
    fn bad_cron_is_a_config_error() {
        let err = next_run_after(Some("every tuesday"), None, 0, Tz::UTC).unwrap_err();
        assert!(matches!(err, CorvidError::Config(ref m) if m.contains("every tuesday")));
    }

    #[tokio::test]
    async fn create_task_computes_first_run() {
        let harness = TestHarness::new().await;
        let scheduler = scheduler(&harness);

        let id = scheduler
            .create_task(interval_task("news", MINUTE), 5_000)
            .await
            .unwrap();
        let task = harness.storage.get_scheduled_task(&id).await.unwrap().unwrap();
        assert_eq!(task.next_run_at, Some(5_000 + MINUTE));
        assert!(task.enabled);

        let mut once = interval_task("once", MINUTE);
        once.interval_ms = None;
        assert!(scheduler.create_task(once.clone(), 0).await.is_err());
        once.next_run_at = Some(42);
        scheduler.create_task(once, 0).await.unwrap();

        let mut broken = interval_task("broken", MINUTE);
        broken.cron_expression = Some("nope".into());
        assert!(scheduler.create_task(broken, 0).await.is_err());

        let mut silent = interval_task("silent", MINUTE);
        silent.payload = "   ".into();
        assert!(scheduler.create_task(silent, 0).await.is_err());
    }

    #[tokio::test]
    async fn due_tasks_enqueue_jobs_and_wake_the_worker() {
        let harness = TestHarness::new().await;
        let notify = Arc::new(Notify::new());
        let scheduler = scheduler(&harness).with_worker_notify(notify.clone());

        let id = scheduler
            .create_task(interval_task("news", MINUTE), 0)
            .await
            .unwrap();
        assert!(scheduler.run_due(MINUTE - 1).await.unwrap().is_empty());

        let fired = scheduler.run_due(MINUTE).await.unwrap();
        assert_eq!(fired.len(), 1);
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("worker should be notified");

        let job = harness.storage.get_job(&fired[0].job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        let context = harness
            .storage
            .get_conversation_context(&fired[0].conversation_id)
            .await
            .unwrap()
            .unwrap();
        let prompt = context.messages.last().unwrap();
        assert_eq!(prompt.role, Role::User);
        assert_eq!(prompt.content, "[Scheduled Task: news] Summarize the news");

        let task = harness.storage.get_scheduled_task(&id).await.unwrap().unwrap();
        assert_eq!(task.last_run_at, Some(MINUTE));
        assert_eq!(task.next_run_at, Some(2 * MINUTE));

        // Nothing is due again until the next interval.
        assert!(scheduler.run_due(MINUTE + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_shot_tasks_fire_once() {
        let harness = TestHarness::new().await;
        let scheduler = scheduler(&harness);
        let mut once = interval_task("reminder", MINUTE);
        once.interval_ms = None;
        once.next_run_at = Some(10);
        let id = scheduler.create_task(once, 0).await.unwrap();

        assert_eq!(scheduler.run_due(10).await.unwrap().len(), 1);
        assert!(scheduler.run_due(i64::MAX).await.unwrap().is_empty());
        let task = harness.storage.get_scheduled_task(&id).await.unwrap().unwrap();
        assert_eq!(task.next_run_at, None);
    }

    #[tokio::test]
    async fn unusable_stored_schedule_disables_the_task() {
        let harness = TestHarness::new().await;
        let id = harness
            .storage
            .create_scheduled_task(&NewScheduledTask {
                name: "legacy".into(),
                description: None,
                cron_expression: Some("61 * * * *".into()),
                interval_ms: None,
                payload: "x".into(),
                conversation_id: None,
                next_run_at: Some(0),
            })
            .await
            .unwrap();

        assert!(scheduler(&harness).run_due(1).await.unwrap().is_empty());
        let task = harness.storage.get_scheduled_task(&id).await.unwrap().unwrap();
        assert!(!task.enabled);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let harness = TestHarness::new().await;
        let scheduler = scheduler(&harness);
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), scheduler.run(cancel))
            .await
            .expect("scheduler should stop when cancelled");
    }
}
