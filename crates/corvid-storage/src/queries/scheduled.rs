// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled tasks.
//!
//! Firing is a compare-and-set on `next_run_at` inside the same transaction
//! that writes the prompt message and its job, so a task fires once per
//! occurrence however many schedulers poll the table.

use corvid_core::types::{
    ConversationId, JobId, MessageStatus, NewScheduledTask, ScheduledTask, ScheduledTaskId,
    TaskFiring,
};
use corvid_core::{Channel, CorvidError, Role};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::queries::conversations::{insert_message, parse_channel};
use crate::queries::jobs::insert_job;

const TASK_COLUMNS: &str = "id, name, description, cron_expression, interval_ms, payload,
     enabled, conversation_id, last_run_at, next_run_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: ScheduledTaskId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        cron_expression: row.get(3)?,
        interval_ms: row.get(4)?,
        payload: row.get(5)?,
        enabled: row.get(6)?,
        conversation_id: row.get::<_, Option<String>>(7)?.map(ConversationId),
        last_run_at: row.get(8)?,
        next_run_at: row.get(9)?,
    })
}

fn select_task(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<ScheduledTask>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
        params![id],
        row_to_task,
    )
    .optional()
}

pub async fn create_scheduled_task(
    db: &Database,
    task: &NewScheduledTask,
) -> Result<ScheduledTaskId, CorvidError> {
    let id = ScheduledTaskId::generate();
    let row_id = id.to_string();
    let task = task.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks (id, name, description, cron_expression, interval_ms,
                 payload, conversation_id, next_run_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row_id,
                    task.name,
                    task.description,
                    task.cron_expression,
                    task.interval_ms,
                    task.payload,
                    task.conversation_id.as_ref().map(ConversationId::as_str),
                    task.next_run_at,
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

pub async fn get_scheduled_task(
    db: &Database,
    id: &ScheduledTaskId,
) -> Result<Option<ScheduledTask>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_task(conn, &id))
        .await
        .map_err(map_tr_err)
}

pub async fn list_scheduled_tasks(db: &Database) -> Result<Vec<ScheduledTask>, CorvidError> {
    db.connection()
        .call(|conn| -> Result<Vec<ScheduledTask>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks ORDER BY created_at, rowid"
            ))?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_task_enabled(
    db: &Database,
    id: &ScheduledTaskId,
    enabled: bool,
) -> Result<bool, CorvidError> {
    let id = id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE scheduled_tasks SET enabled = ?2 WHERE id = ?1",
                params![id, enabled],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed > 0)
}

/// Enabled tasks due at `now_ms`, earliest first.
pub async fn due_scheduled_tasks(
    db: &Database,
    now_ms: i64,
    limit: usize,
) -> Result<Vec<ScheduledTask>, CorvidError> {
    db.connection()
        .call(move |conn| -> Result<Vec<ScheduledTask>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                 WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
                 ORDER BY next_run_at, rowid LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now_ms, limit as i64], row_to_task)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Advance a due task and enqueue its prompt as one transaction.
pub async fn fire_scheduled_task(
    db: &Database,
    id: &ScheduledTaskId,
    now_ms: i64,
    next_run_at: Option<i64>,
) -> Result<Option<TaskFiring>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<TaskFiring>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let advanced = tx.execute(
                "UPDATE scheduled_tasks SET last_run_at = ?2, next_run_at = ?3
                 WHERE id = ?1 AND enabled = 1
                 AND next_run_at IS NOT NULL AND next_run_at <= ?2",
                params![id, now_ms, next_run_at],
            )?;
            if advanced == 0 {
                return Ok(None);
            }
            let Some(task) = select_task(&tx, &id)? else {
                return Ok(None);
            };

            let existing = match &task.conversation_id {
                Some(conversation_id) => tx
                    .query_row(
                        "SELECT channel FROM conversations WHERE id = ?1",
                        params![conversation_id.as_str()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?
                    .map(|channel| parse_channel(&channel).map(|c| (conversation_id.clone(), c)))
                    .transpose()?,
                None => None,
            };
            let (conversation_id, channel) = match existing {
                Some(found) => found,
                None => {
                    let conversation_id = ConversationId::generate();
                    tx.execute(
                        "INSERT INTO conversations (id, channel, title) VALUES (?1, ?2, ?3)",
                        params![
                            conversation_id.as_str(),
                            Channel::Web.to_string(),
                            format!("Scheduled: {}", task.name)
                        ],
                    )?;
                    tx.execute(
                        "UPDATE scheduled_tasks SET conversation_id = ?2 WHERE id = ?1",
                        params![id, conversation_id.as_str()],
                    )?;
                    (conversation_id, Channel::Web)
                }
            };

            let metadata = serde_json::json!({
                "type": "scheduled_task",
                "task_id": task.id.as_str(),
            });
            let message_id = insert_message(
                &tx,
                conversation_id.as_str(),
                Role::User,
                &task.prompt(),
                channel,
                MessageStatus::Sent,
                None,
                Some(&metadata),
            )?;
            let job_id = JobId::generate();
            insert_job(&tx, &job_id, &conversation_id, &message_id)?;
            tx.commit()?;

            Ok(Some(TaskFiring {
                task_id: task.id,
                conversation_id,
                message_id,
                job_id,
            }))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{conversations, jobs};
    use corvid_core::types::JobStatus;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("scheduled.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn task(name: &str, next_run_at: Option<i64>) -> NewScheduledTask {
        NewScheduledTask {
            name: name.into(),
            description: None,
            cron_expression: None,
            interval_ms: Some(60_000),
            payload: "Check the weather".into(),
            conversation_id: None,
            next_run_at,
        }
    }

    #[tokio::test]
    async fn due_lists_enabled_tasks_in_order() {
        let (db, _dir) = setup_db().await;
        let later = create_scheduled_task(&db, &task("later", Some(2_000))).await.unwrap();
        let sooner = create_scheduled_task(&db, &task("sooner", Some(1_000))).await.unwrap();
        create_scheduled_task(&db, &task("future", Some(9_000))).await.unwrap();
        create_scheduled_task(&db, &task("spent", None)).await.unwrap();
        let off = create_scheduled_task(&db, &task("off", Some(500))).await.unwrap();
        assert!(set_task_enabled(&db, &off, false).await.unwrap());

        let due = due_scheduled_tasks(&db, 5_000, 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![sooner, later]);

        assert_eq!(due_scheduled_tasks(&db, 5_000, 1).await.unwrap().len(), 1);
        assert_eq!(list_scheduled_tasks(&db).await.unwrap().len(), 5);
        assert!(!set_task_enabled(&db, &ScheduledTaskId::from("missing"), true).await.unwrap());
    }

    #[tokio::test]
    async fn firing_opens_a_conversation_and_enqueues_a_job() {
        let (db, _dir) = setup_db().await;
        let id = create_scheduled_task(&db, &task("Weather", Some(1_000))).await.unwrap();

        let fired = fire_scheduled_task(&db, &id, 1_500, Some(61_500))
            .await
            .unwrap()
            .unwrap();
        let stored = get_scheduled_task(&db, &id).await.unwrap().unwrap();
        assert_eq!(stored.last_run_at, Some(1_500));
        assert_eq!(stored.next_run_at, Some(61_500));
        assert_eq!(stored.conversation_id.as_ref(), Some(&fired.conversation_id));

        let job = jobs::get_job(&db, &fired.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.message_id, fired.message_id);

        let context = conversations::get_conversation_context(&db, &fired.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(context.conversation.channel, Channel::Web);
        let message = &context.messages[0];
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, "[Scheduled Task: Weather] Check the weather");
        assert_eq!(message.metadata.as_ref().unwrap()["type"], "scheduled_task");

        // The next occurrence reuses the conversation.
        let again = fire_scheduled_task(&db, &id, 61_500, Some(121_500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.conversation_id, fired.conversation_id);
    }

    #[tokio::test]
    async fn an_occurrence_fires_once() {
        let (db, _dir) = setup_db().await;
        let id = create_scheduled_task(&db, &task("once", Some(1_000))).await.unwrap();

        assert!(fire_scheduled_task(&db, &id, 1_000, None).await.unwrap().is_some());
        assert!(fire_scheduled_task(&db, &id, 1_000, None).await.unwrap().is_none());
        assert!(due_scheduled_tasks(&db, i64::MAX, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tasks_post_into_their_own_conversation() {
        let (db, _dir) = setup_db().await;
        let conversation = conversations::create_conversation(&db, Channel::WhatsApp, None, None)
            .await
            .unwrap();
        let mut new = task("digest", Some(0));
        new.conversation_id = Some(conversation.clone());
        let id = create_scheduled_task(&db, &new).await.unwrap();

        let fired = fire_scheduled_task(&db, &id, 10, Some(60_010)).await.unwrap().unwrap();
        assert_eq!(fired.conversation_id, conversation);
        let context = conversations::get_conversation_context(&db, &conversation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(context.messages[0].channel, Channel::WhatsApp);
    }

    #[tokio::test]
    async fn disabled_tasks_do_not_fire() {
        let (db, _dir) = setup_db().await;
        let id = create_scheduled_task(&db, &task("off", Some(0))).await.unwrap();
        set_task_enabled(&db, &id, false).await.unwrap();
        assert!(fire_scheduled_task(&db, &id, 10, None).await.unwrap().is_none());
    }
}
