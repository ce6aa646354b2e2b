// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `corvid tasks` command implementation.
//!
//! Registers and toggles scheduled tasks. A running worker-role process
//! fires them on its next poll.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use corvid_agent::TaskScheduler;
use corvid_config::model::CorvidConfig;
use corvid_core::types::{ConversationId, NewScheduledTask, ScheduledTask, ScheduledTaskId};
use corvid_core::{CorvidError, ScheduleStore, StorageAdapter};
use corvid_storage::SqliteStorage;

/// Task definition as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub payload: String,
    pub description: Option<String>,
    pub cron: Option<String>,
    pub every_ms: Option<i64>,
    /// First run as an RFC 3339 timestamp.
    pub at: Option<String>,
    pub conversation: Option<String>,
}

async fn open_store(config: &CorvidConfig) -> Result<Arc<SqliteStorage>, CorvidError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(Arc::new(storage))
}

pub async fn add(config: &CorvidConfig, spec: TaskSpec) -> Result<(), CorvidError> {
    let store = open_store(config).await?;
    let scheduler = TaskScheduler::new(store.clone(), config)?;
    let id = create(&scheduler, spec, Utc::now().timestamp_millis()).await?;
    let task = store
        .get_scheduled_task(&id)
        .await?
        .ok_or_else(|| CorvidError::Internal(format!("task {id} vanished after creation")))?;
    println!("created {} (next run {})", id, format_ms(task.next_run_at));
    Ok(())
}

pub async fn list(config: &CorvidConfig, json: bool) -> Result<(), CorvidError> {
    let store = open_store(config).await?;
    let tasks = store.list_scheduled_tasks().await?;
    if json {
        let out = serde_json::to_string_pretty(&tasks)
            .map_err(|e| CorvidError::Internal(format!("failed to serialize tasks: {e}")))?;
        println!("{out}");
    } else {
        print!("{}", render_table(&tasks));
    }
    Ok(())
}

pub async fn set_enabled(config: &CorvidConfig, id: &str, enabled: bool) -> Result<(), CorvidError> {
    let store = open_store(config).await?;
    println!("{}", toggle(store.as_ref(), id, enabled).await?);
    Ok(())
}

async fn create(
    scheduler: &TaskScheduler,
    spec: TaskSpec,
    now_ms: i64,
) -> Result<ScheduledTaskId, CorvidError> {
    let next_run_at = spec
        .at
        .as_deref()
        .map(|at| {
            DateTime::parse_from_rfc3339(at)
                .map(|t| t.timestamp_millis())
                .map_err(|e| CorvidError::Config(format!("invalid --at `{at}`: {e}")))
        })
        .transpose()?;
    scheduler
        .create_task(
            NewScheduledTask {
                name: spec.name,
                description: spec.description,
                cron_expression: spec.cron,
                interval_ms: spec.every_ms,
                payload: spec.payload,
                conversation_id: spec.conversation.map(ConversationId::from),
                next_run_at,
            },
            now_ms,
        )
        .await
}

async fn toggle(store: &dyn ScheduleStore, id: &str, enabled: bool) -> Result<String, CorvidError> {
    let id = ScheduledTaskId::from(id);
    if !store.set_task_enabled(&id, enabled).await? {
        return Err(CorvidError::Internal(format!("task {id} not found")));
    }
    let state = if enabled { "enabled" } else { "disabled" };
    Ok(format!("{state} {id}"))
}

fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

fn render_table(tasks: &[ScheduledTask]) -> String {
    if tasks.is_empty() {
        return "no scheduled tasks\n".to_string();
    }
    let mut out = format!(
        "{:<38} {:<20} {:<8} {:<16} {}\n",
        "ID", "NAME", "ENABLED", "SCHEDULE", "NEXT RUN"
    );
    for task in tasks {
        let schedule = match (&task.cron_expression, task.interval_ms) {
            (Some(cron), _) => cron.clone(),
            (None, Some(ms)) => format!("every {ms}ms"),
            (None, None) => "once".to_string(),
        };
        out.push_str(&format!(
            "{:<38} {:<20} {:<8} {:<16} {}\n",
            task.id,
            task.name,
            task.enabled,
            schedule,
            format_ms(task.next_run_at),
        ));
    }
    out
}
