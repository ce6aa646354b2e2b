// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human approval requests for gated tool calls.

use std::str::FromStr;

use corvid_core::types::{
    ApprovalId, ApprovalRequest, ApprovalStatus, ConversationId, JobId, NewApproval,
};
use corvid_core::{Channel, CorvidError};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};

const APPROVAL_COLUMNS: &str = "id, job_id, conversation_id, channel, phone, tool_name, input,
     status, created_at, resolved_at";

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let channel: String = row.get(3)?;
    let input: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(ApprovalRequest {
        id: ApprovalId(row.get(0)?),
        job_id: JobId(row.get(1)?),
        conversation_id: ConversationId(row.get(2)?),
        channel: Channel::from_str(&channel).unwrap_or(Channel::Web),
        phone: row.get(4)?,
        tool_name: row.get(5)?,
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        status: ApprovalStatus::from_str(&status).unwrap_or(ApprovalStatus::Expired),
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

pub async fn create_approval(
    db: &Database,
    request: &NewApproval,
) -> Result<ApprovalId, CorvidError> {
    let id = ApprovalId::generate();
    let row_id = id.to_string();
    let request = request.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO approvals (id, job_id, conversation_id, channel, phone, tool_name, input, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')",
                params![
                    row_id,
                    request.job_id.as_str(),
                    request.conversation_id.as_str(),
                    request.channel.to_string(),
                    request.phone,
                    request.tool_name,
                    request.input.to_string(),
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

pub async fn get_approval(
    db: &Database,
    id: &ApprovalId,
) -> Result<Option<ApprovalRequest>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?1"),
                params![id],
                row_to_approval,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Pending requests, oldest first.
pub async fn list_pending_approvals(db: &Database) -> Result<Vec<ApprovalRequest>, CorvidError> {
    db.connection()
        .call(|conn| -> Result<Vec<ApprovalRequest>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE status = 'pending'
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map([], row_to_approval)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Resolve a pending request. A request already resolved keeps its first decision.
pub async fn resolve_approval(
    db: &Database,
    id: &ApprovalId,
    status: ApprovalStatus,
) -> Result<bool, CorvidError> {
    let id = id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE approvals SET status = ?2,
                 resolved_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id, status.to_string()],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}
