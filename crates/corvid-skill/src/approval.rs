// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human approval for high-risk tools.
//!
//! [`ApprovalGate::wrap`] replaces each [`ToolRisk::High`] tool in a registry
//! with an [`ApprovalGatedTool`]. Invoking the gated tool records a pending
//! [`ApprovalRequest`](corvid_core::types::ApprovalRequest) and waits until an
//! operator approves or denies it, or the timeout passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corvid_config::model::ApprovalConfig;
use corvid_core::types::{ApprovalId, ApprovalStatus, ConversationId, JobId, NewApproval};
use corvid_core::{ApprovalStore, Channel, CorvidError};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::tool::{Tool, ToolOutput, ToolRegistry, ToolRisk};

/// The job an approval request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalScope {
    pub job_id: JobId,
    pub conversation_id: ConversationId,
    pub channel: Channel,
    pub phone: Option<String>,
}

/// Wraps risky tools with an approval wait.
#[derive(Clone)]
pub struct ApprovalGate {
    store: Arc<dyn ApprovalStore>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn ApprovalStore>, config: &ApprovalConfig) -> Self {
        Self {
            store,
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }

    /// Returns a registry where every high-risk tool waits for approval.
    pub fn wrap(&self, registry: &ToolRegistry, scope: ApprovalScope) -> ToolRegistry {
        let mut wrapped = registry.clone();
        for tool in registry.iter().filter(|t| t.risk() == ToolRisk::High) {
            wrapped.replace(Arc::new(ApprovalGatedTool {
                inner: tool.clone(),
                store: self.store.clone(),
                scope: scope.clone(),
                poll_interval: self.poll_interval,
                timeout: self.timeout,
            }));
        }
        wrapped
    }
}

/// A high-risk tool held behind operator approval.
pub struct ApprovalGatedTool {
    inner: Arc<dyn Tool>,
    store: Arc<dyn ApprovalStore>,
    scope: ApprovalScope,
    poll_interval: Duration,
    timeout: Duration,
}

impl ApprovalGatedTool {
    /// Polls until the request leaves `pending` or the deadline passes.
    async fn await_decision(&self, id: &ApprovalId) -> Result<ApprovalStatus, CorvidError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(request) = self.store.get_approval(id).await?
                && request.status != ApprovalStatus::Pending
            {
                return Ok(request.status);
            }

            if Instant::now() >= deadline {
                if self
                    .store
                    .resolve_approval(id, ApprovalStatus::Expired)
                    .await?
                {
                    return Ok(ApprovalStatus::Expired);
                }
                // Resolved between the last poll and the expiry write.
                return Ok(self
                    .store
                    .get_approval(id)
                    .await?
                    .map_or(ApprovalStatus::Expired, |r| r.status));
            }

            let now = Instant::now();
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl Tool for ApprovalGatedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.inner.parameters_schema()
    }

    fn risk(&self) -> ToolRisk {
        self.inner.risk()
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
        let name = self.inner.name();
        let request = NewApproval {
            job_id: self.scope.job_id.clone(),
            conversation_id: self.scope.conversation_id.clone(),
            channel: self.scope.channel,
            phone: self.scope.phone.clone(),
            tool_name: name.to_string(),
            input: input.clone(),
        };
        let id = self.store.create_approval(&request).await?;
        info!(
            approval_id = %id,
            job_id = %self.scope.job_id,
            tool = name,
            "tool call awaiting approval"
        );

        match self.await_decision(&id).await? {
            ApprovalStatus::Approved => {
                info!(approval_id = %id, tool = name, "tool call approved");
                self.inner.invoke(input).await
            }
            ApprovalStatus::Denied => {
                info!(approval_id = %id, tool = name, "tool call denied");
                Ok(ToolOutput::error(format!(
                    "Tool \"{name}\" was denied by the user."
                )))
            }
            ApprovalStatus::Expired | ApprovalStatus::Pending => {
                warn!(
                    approval_id = %id,
                    tool = name,
                    timeout_secs = self.timeout.as_secs(),
                    "tool call approval expired"
                );
                Ok(ToolOutput::error(format!(
                    "Tool \"{name}\" approval expired after {}s without a decision.",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}
