// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job queue state machine.
//!
//! Every transition is a single conditional `UPDATE` so concurrent workers
//! sharing the database cannot both observe success.

use std::str::FromStr;
use std::time::Duration;

use corvid_core::types::{
    ConversationId, Job, JobId, JobStatus, MessageId, PurgedJobs, RetryOutcome,
};
use corvid_core::{CorvidError, FailureReason};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};

const JOB_COLUMNS: &str = "id, conversation_id, message_id, status, attempt_count,
     error_reason, error_message, model_used, created_at, updated_at";

pub(crate) fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(3)?;
    let reason: Option<String> = row.get(5)?;
    Ok(Job {
        id: JobId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        message_id: MessageId(row.get(2)?),
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        attempt_count: row.get(4)?,
        error_reason: reason.map(|r| FailureReason::from_str(&r).unwrap_or(FailureReason::Unknown)),
        error_message: row.get(6)?,
        model_used: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn select_job(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id],
        row_to_job,
    )
    .optional()
}

/// Insert a pending job inside an open transaction.
pub(crate) fn insert_job(
    conn: &rusqlite::Connection,
    id: &JobId,
    conversation_id: &ConversationId,
    message_id: &MessageId,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, conversation_id, message_id, status) VALUES (?1, ?2, ?3, 'pending')",
        params![id.as_str(), conversation_id.as_str(), message_id.as_str()],
    )?;
    Ok(())
}

/// Enqueue a pending job for a stored message.
pub async fn enqueue_job(
    db: &Database,
    conversation_id: &ConversationId,
    message_id: &MessageId,
) -> Result<JobId, CorvidError> {
    let id = JobId::generate();
    let job_id = id.clone();
    let conversation_id = conversation_id.clone();
    let message_id = message_id.clone();
    db.connection()
        .call(move |conn| insert_job(conn, &job_id, &conversation_id, &message_id))
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

pub async fn get_job(db: &Database, id: &JobId) -> Result<Option<Job>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_job(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// Pending jobs in arrival order.
pub async fn list_pending_jobs(db: &Database, limit: usize) -> Result<Vec<Job>, CorvidError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| -> Result<Vec<Job>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, rowid ASC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_job)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Compare-and-set `pending -> processing`.
pub async fn claim_job(db: &Database, id: &JobId) -> Result<Option<Job>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Job>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE jobs SET status = 'processing',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id],
            )?;
            let job = if changed == 1 {
                select_job(&tx, &id)?
            } else {
                None
            };
            tx.commit()?;
            Ok(job)
        })
        .await
        .map_err(map_tr_err)
}

/// Outcome of a conditional transition, resolved to an error outside the closure.
enum Transition {
    Applied,
    Already,
    Rejected(JobStatus),
    Missing,
}

/// `processing -> completed`. Returns `false` when the job was already completed.
pub async fn complete_job(
    db: &Database,
    id: &JobId,
    model_used: Option<&str>,
) -> Result<bool, CorvidError> {
    let job_id = id.to_string();
    let model_used = model_used.map(str::to_string);
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Transition, rusqlite::Error> {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE jobs SET status = 'completed', model_used = COALESCE(?2, model_used),
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'processing'",
                params![job_id, model_used],
            )?;
            let outcome = if changed == 1 {
                Transition::Applied
            } else {
                match select_job(&tx, &job_id)? {
                    Some(job) if job.status == JobStatus::Completed => Transition::Already,
                    Some(job) => Transition::Rejected(job.status),
                    None => Transition::Missing,
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        Transition::Applied => Ok(true),
        Transition::Already => Ok(false),
        Transition::Rejected(from) => Err(CorvidError::InvalidTransition {
            job_id: id.to_string(),
            from: from.to_string(),
            to: JobStatus::Completed.to_string(),
        }),
        Transition::Missing => Err(CorvidError::JobNotFound(id.to_string())),
    }
}

/// Mark a job failed with its classified reason. The message is stored as given.
pub async fn fail_job(
    db: &Database,
    id: &JobId,
    reason: FailureReason,
    message: &str,
) -> Result<(), CorvidError> {
    let job_id = id.to_string();
    let reason = reason.to_string();
    let message = message.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE jobs SET status = 'failed', error_reason = ?2, error_message = ?3,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![job_id, reason, message],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(CorvidError::JobNotFound(id.to_string()));
    }
    Ok(())
}

/// Record an attempt, requeueing the job while under `max_attempts`.
pub async fn retry_job(
    db: &Database,
    id: &JobId,
    max_attempts: u32,
) -> Result<RetryOutcome, CorvidError> {
    let job_id = id.to_string();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Option<RetryOutcome>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let attempts: Option<u32> = tx
                .query_row(
                    "SELECT attempt_count FROM jobs WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(attempts) = attempts else {
                return Ok(None);
            };
            let attempt_count = attempts + 1;
            let outcome = if attempt_count < max_attempts {
                tx.execute(
                    "UPDATE jobs SET status = 'pending', attempt_count = ?2,
                     error_reason = NULL, error_message = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                    params![job_id, attempt_count],
                )?;
                RetryOutcome::Requeued { attempt_count }
            } else {
                tx.execute(
                    "UPDATE jobs SET attempt_count = ?2,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                    params![job_id, attempt_count],
                )?;
                RetryOutcome::Exhausted { attempt_count }
            };
            tx.commit()?;
            Ok(Some(outcome))
        })
        .await
        .map_err(map_tr_err)?;
    outcome.ok_or_else(|| CorvidError::JobNotFound(id.to_string()))
}

pub async fn is_conversation_busy(
    db: &Database,
    conversation_id: &ConversationId,
) -> Result<bool, CorvidError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE conversation_id = ?1
                 AND status IN ('pending', 'processing'))",
                params![conversation_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Delete completed and failed jobs created more than `older_than` ago.
pub async fn purge_finished_jobs(
    db: &Database,
    older_than: Duration,
) -> Result<PurgedJobs, CorvidError> {
    let modifier = format!("-{} seconds", older_than.as_secs());
    db.connection()
        .call(move |conn| -> Result<PurgedJobs, rusqlite::Error> {
            let tx = conn.transaction()?;
            let purge = |status: &str| -> rusqlite::Result<u64> {
                let deleted = tx.execute(
                    "DELETE FROM jobs WHERE status = ?1
                     AND created_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?2)",
                    params![status, modifier],
                )?;
                Ok(deleted as u64)
            };
            let purged = PurgedJobs {
                completed: purge("completed")?,
                failed: purge("failed")?,
            };
            tx.commit()?;
            Ok(purged)
        })
        .await
        .map_err(map_tr_err)
}
