// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable outbound message queue.

use std::str::FromStr;
use std::time::Duration;

use corvid_core::types::{
    ConversationId, NewOutbound, OutboundId, OutboundMessage, OutboundStatus,
};
use corvid_core::{Channel, CorvidError};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, duration_ms, map_tr_err, now_ms};

/// Claims beyond this count leave a message in its terminal state.
pub const MAX_OUTBOUND_ATTEMPTS: u32 = 5;

/// Recorded on a message whose final claim lapsed without an outcome.
pub const LOCK_EXPIRED_ON_FINAL_ATTEMPT: &str = "processor lock expired on final attempt";

const OUTBOUND_COLUMNS: &str = "id, channel, account_id, conversation_id, recipient, content,
     status, retry, attempt_count, processor_id, lock_expires_at, last_error";

fn row_to_outbound(row: &Row<'_>) -> rusqlite::Result<OutboundMessage> {
    let channel: String = row.get(1)?;
    let status: String = row.get(6)?;
    Ok(OutboundMessage {
        id: OutboundId(row.get(0)?),
        channel: Channel::from_str(&channel).unwrap_or(Channel::WhatsApp),
        account_id: row.get(2)?,
        conversation_id: row.get::<_, Option<String>>(3)?.map(ConversationId),
        to: row.get(4)?,
        content: row.get(5)?,
        status: OutboundStatus::from_str(&status).unwrap_or(OutboundStatus::Failed),
        retry: row.get(7)?,
        attempt_count: row.get(8)?,
        processor_id: row.get(9)?,
        lock_expires_at: row.get(10)?,
        last_error: row.get(11)?,
    })
}

fn select_outbound(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<OutboundMessage>> {
    conn.query_row(
        &format!("SELECT {OUTBOUND_COLUMNS} FROM outbound_messages WHERE id = ?1"),
        params![id],
        row_to_outbound,
    )
    .optional()
}

pub async fn enqueue_outbound(
    db: &Database,
    message: &NewOutbound,
) -> Result<OutboundId, CorvidError> {
    let id = OutboundId::generate();
    let row_id = id.to_string();
    let message = message.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO outbound_messages (id, channel, account_id, conversation_id, recipient, content, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued')",
                params![
                    row_id,
                    message.channel.to_string(),
                    message.account_id,
                    message.conversation_id.as_ref().map(|c| c.to_string()),
                    message.to,
                    message.content,
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

/// Claim the oldest deliverable message under a processor lock.
///
/// Deliverable means queued, failed-with-retry whose next attempt is due, or
/// claimed by a processor whose lock has lapsed; all below the attempt ceiling.
/// Messages that reached the ceiling are first settled as failed without
/// retry, so a lapsed final claim does not stay `claimed`.
pub async fn claim_next_outbound(
    db: &Database,
    channel: Channel,
    account_id: &str,
    processor_id: &str,
    lock: Duration,
) -> Result<Option<OutboundMessage>, CorvidError> {
    let account_id = account_id.to_string();
    let processor_id = processor_id.to_string();
    let lock_ms = duration_ms(lock);
    db.connection()
        .call(move |conn| -> Result<Option<OutboundMessage>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = now_ms();
            tx.execute(
                "UPDATE outbound_messages SET status = 'failed', retry = 0,
                 last_error = CASE WHEN status = 'claimed' THEN ?5 ELSE last_error END,
                 processor_id = NULL, lock_expires_at = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE channel = ?1 AND account_id = ?2 AND attempt_count >= ?4 AND (
                     (status = 'claimed' AND lock_expires_at <= ?3)
                     OR (status = 'failed' AND retry = 1)
                 )",
                params![
                    channel.to_string(),
                    account_id,
                    now,
                    MAX_OUTBOUND_ATTEMPTS,
                    LOCK_EXPIRED_ON_FINAL_ATTEMPT
                ],
            )?;
            let next: Option<String> = tx
                .query_row(
                    "SELECT id FROM outbound_messages
                     WHERE channel = ?1 AND account_id = ?2 AND attempt_count < ?4 AND (
                         status = 'queued'
                         OR (status = 'failed' AND retry = 1
                             AND (next_attempt_at IS NULL OR next_attempt_at <= ?3))
                         OR (status = 'claimed' AND lock_expires_at <= ?3)
                     )
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT 1",
                    params![channel.to_string(), account_id, now, MAX_OUTBOUND_ATTEMPTS],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = next else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE outbound_messages SET status = 'claimed', processor_id = ?2,
                 lock_expires_at = ?3, attempt_count = attempt_count + 1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id, processor_id, now.saturating_add(lock_ms)],
            )?;
            let claimed = select_outbound(&tx, &id)?;
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a claimed message sent. Only the current claim holder may settle it.
pub async fn complete_outbound(
    db: &Database,
    id: &OutboundId,
    processor_id: &str,
) -> Result<bool, CorvidError> {
    let id = id.to_string();
    let processor_id = processor_id.to_string();
    db.connection()
        .call(move |conn| {
            let updated = conn.execute(
                "UPDATE outbound_messages SET status = 'sent', processor_id = NULL,
                 lock_expires_at = NULL, last_error = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'claimed' AND processor_id = ?2",
                params![id, processor_id],
            )?;
            Ok(updated > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn fail_outbound(
    db: &Database,
    id: &OutboundId,
    processor_id: &str,
    error: &str,
    retry_after: Option<Duration>,
) -> Result<bool, CorvidError> {
    let id = id.to_string();
    let processor_id = processor_id.to_string();
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            let next_attempt_at = retry_after.map(|d| now_ms().saturating_add(duration_ms(d)));
            let updated = conn.execute(
                "UPDATE outbound_messages SET status = 'failed', retry = ?3,
                 next_attempt_at = ?4, last_error = ?5, processor_id = NULL,
                 lock_expires_at = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'claimed' AND processor_id = ?2",
                params![id, processor_id, retry_after.is_some(), next_attempt_at, error],
            )?;
            Ok(updated > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_outbound(
    db: &Database,
    id: &OutboundId,
) -> Result<Option<OutboundMessage>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_outbound(conn, &id))
        .await
        .map_err(map_tr_err)
}
