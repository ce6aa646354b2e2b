// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `corvid approvals` command implementation.
//!
//! Operators resolve gated tool calls here. The waiting worker picks up the
//! decision on its next poll.

use std::sync::Arc;

use corvid_config::model::CorvidConfig;
use corvid_core::types::{ApprovalId, ApprovalRequest, ApprovalStatus};
use corvid_core::{ApprovalStore, CorvidError, StorageAdapter};
use corvid_storage::SqliteStorage;

async fn open_store(config: &CorvidConfig) -> Result<Arc<SqliteStorage>, CorvidError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(Arc::new(storage))
}

/// Prints pending approvals as a table, or as JSON with `--json`.
pub async fn list(config: &CorvidConfig, json: bool) -> Result<(), CorvidError> {
    let store = open_store(config).await?;
    let pending = store.list_pending_approvals().await?;
    if json {
        let out = serde_json::to_string_pretty(&pending)
            .map_err(|e| CorvidError::Internal(format!("failed to serialize approvals: {e}")))?;
        println!("{out}");
    } else {
        print!("{}", render_table(&pending));
    }
    Ok(())
}

pub async fn approve(config: &CorvidConfig, id: &str) -> Result<(), CorvidError> {
    let store = open_store(config).await?;
    let message = resolve(store.as_ref(), id, ApprovalStatus::Approved).await?;
    println!("{message}");
    Ok(())
}

pub async fn deny(config: &CorvidConfig, id: &str) -> Result<(), CorvidError> {
    let store = open_store(config).await?;
    let message = resolve(store.as_ref(), id, ApprovalStatus::Denied).await?;
    println!("{message}");
    Ok(())
}

/// Resolves one request and describes the result for the operator.
async fn resolve(
    store: &dyn ApprovalStore,
    id: &str,
    status: ApprovalStatus,
) -> Result<String, CorvidError> {
    let id = ApprovalId::from(id);
    let Some(request) = store.get_approval(&id).await? else {
        return Err(CorvidError::Internal(format!("approval {id} not found")));
    };
    if store.resolve_approval(&id, status).await? {
        Ok(format!("{} {} ({})", status, id, request.tool_name))
    } else {
        Err(CorvidError::Internal(format!(
            "approval {id} is already {}",
            request.status
        )))
    }
}

fn render_table(pending: &[ApprovalRequest]) -> String {
    if pending.is_empty() {
        return "no pending approvals\n".to_string();
    }
    let mut out = format!(
        "{:<38} {:<22} {:<9} {:<16} {}\n",
        "ID", "TOOL", "CHANNEL", "PHONE", "CREATED"
    );
    for request in pending {
        out.push_str(&format!(
            "{:<38} {:<22} {:<9} {:<16} {}\n",
            request.id,
            request.tool_name,
            request.channel,
            request.phone.as_deref().unwrap_or("-"),
            request.created_at,
        ));
    }
    out
}
