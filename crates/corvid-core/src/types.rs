// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across Corvid traits and crates.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::FailureReason;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a queued job.
    JobId
);
string_id!(
    /// Unique identifier for a conversation.
    ConversationId
);
string_id!(
    /// Unique identifier for a stored message.
    MessageId
);
string_id!(
    /// Unique identifier for a contact.
    ContactId
);
string_id!(
    /// Unique identifier for an approval request.
    ApprovalId
);
string_id!(
    /// Unique identifier for an outbound message.
    OutboundId
);
string_id!(
    /// Unique identifier for a scheduled task.
    ScheduledTaskId
);
string_id!(
    /// Unique identifier for a stored memory.
    MemoryId
);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Provider,
    Storage,
    Messaging,
}

// --- Conversation model ---

/// Delivery channel a conversation lives on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Interactive web client; replies stream into a placeholder message.
    Web,
    /// Store-and-forward WhatsApp; replies go through the outbound queue.
    #[strum(serialize = "whatsapp")]
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

/// Author of a conversation turn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One role-tagged message as fed to the context budgeter and the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Lifecycle of a stored message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Sent,
    Failed,
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub channel: Channel,
    pub status: MessageStatus,
    pub tool_calls: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

impl StoredMessage {
    pub fn to_turn(&self) -> Turn {
        Turn::new(self.role, self.content.clone())
    }
}

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub channel: Channel,
    pub contact_id: Option<ContactId>,
    pub agent_id: Option<String>,
    pub title: Option<String>,
}

/// An external party reachable over the messaging channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub phone: String,
    pub name: String,
    pub is_allowed: bool,
}

/// Per-agent persona and model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub tool_policy: Option<ToolPolicy>,
}

/// An installed skill; enabled skills contribute tool policy fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub tool_policy: Option<ToolPolicy>,
}

/// Everything a worker needs to run one turn for a conversation.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation: Conversation,
    pub contact: Option<Contact>,
    pub agent: Option<AgentProfile>,
    pub skills: Vec<Skill>,
    pub messages: Vec<StoredMessage>,
}

// --- Tool policy ---

/// An allow/deny fragment over tool names.
///
/// Fragments are unioned component-wise; a name is admissible when some
/// fragment allows it and no fragment denies it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allow: BTreeSet<String>,
    #[serde(default)]
    pub deny: BTreeSet<String>,
}

impl ToolPolicy {
    pub fn new<A, D, S>(allow: A, deny: D) -> Self
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            deny: deny.into_iter().map(Into::into).collect(),
        }
    }

    /// Unions both sets of `other` into `self`.
    pub fn absorb(&mut self, other: &ToolPolicy) {
        self.allow.extend(other.allow.iter().cloned());
        self.deny.extend(other.deny.iter().cloned());
    }

    pub fn admits(&self, tool: &str) -> bool {
        self.allow.contains(tool) && !self.deny.contains(tool)
    }
}

// --- Jobs ---

/// Lifecycle state of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A queued conversation turn awaiting an agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub error_reason: Option<FailureReason>,
    pub error_message: Option<String>,
    pub model_used: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of the store-side retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Attempt recorded and the job is back in `pending`.
    Requeued { attempt_count: u32 },
    /// Attempt recorded but the ceiling was reached; the job was left as is.
    Exhausted { attempt_count: u32 },
}

// --- Approvals ---

/// State of a human approval request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// Fields supplied when a gated tool call asks for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApproval {
    pub job_id: JobId,
    pub conversation_id: ConversationId,
    pub channel: Channel,
    pub phone: Option<String>,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// A persisted approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub job_id: JobId,
    pub conversation_id: ConversationId,
    pub channel: Channel,
    pub phone: Option<String>,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub status: ApprovalStatus,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

// --- Leases ---

/// Exclusive ownership of one messaging account, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLease {
    pub account_id: String,
    pub owner_id: String,
    /// Expiry as milliseconds since the Unix epoch.
    pub expires_at: i64,
}

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquisition {
    Acquired(ChannelLease),
    Held { owner_id: String, expires_at: i64 },
}

impl LeaseAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LeaseAcquisition::Acquired(_))
    }
}

// --- Outbound queue ---

/// Delivery state of an outbound message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboundStatus {
    Queued,
    Claimed,
    Sent,
    Failed,
}

/// Fields supplied when enqueueing an outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutbound {
    pub channel: Channel,
    pub account_id: String,
    pub conversation_id: Option<ConversationId>,
    pub to: Option<String>,
    pub content: String,
}

/// A durable "send text to recipient" record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: OutboundId,
    pub channel: Channel,
    pub account_id: String,
    pub conversation_id: Option<ConversationId>,
    pub to: Option<String>,
    pub content: String,
    pub status: OutboundStatus,
    pub retry: bool,
    pub attempt_count: u32,
    pub processor_id: Option<String>,
    pub lock_expires_at: Option<i64>,
    pub last_error: Option<String>,
}

// --- Job retention ---

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgedJobs {
    pub completed: u64,
    pub failed: u64,
}

impl PurgedJobs {
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }
}

// --- Scheduled tasks ---

/// Fields supplied when registering a scheduled task.
///
/// A task repeats on `cron_expression` or every `interval_ms`; with neither it
/// fires once at `next_run_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScheduledTask {
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: Option<String>,
    pub interval_ms: Option<i64>,
    /// Text handed to the agent each time the task fires.
    pub payload: String,
    /// Conversation the task posts into. `None` opens one on first run.
    pub conversation_id: Option<ConversationId>,
    /// First due time, epoch milliseconds.
    pub next_run_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: ScheduledTaskId,
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: Option<String>,
    pub interval_ms: Option<i64>,
    pub payload: String,
    pub enabled: bool,
    pub conversation_id: Option<ConversationId>,
    pub last_run_at: Option<i64>,
    /// Epoch milliseconds; `None` once a one-shot task has fired.
    pub next_run_at: Option<i64>,
}

impl ScheduledTask {
    /// The user turn the agent sees when the task fires.
    pub fn prompt(&self) -> String {
        format!("[Scheduled Task: {}] {}", self.name, self.payload)
    }
}

/// What firing a due task produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFiring {
    pub task_id: ScheduledTaskId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub job_id: JobId,
}

// --- Memories ---

/// A fact the agent chose to remember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub conversation_id: Option<ConversationId>,
    pub content: String,
    pub source: String,
    pub created_at: String,
}

// --- Provider wire-neutral types ---

/// A content block inside a provider message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A message in a provider request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ProviderMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// Tool metadata presented to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A full (non-streaming) completion response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

impl ProviderResponse {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// An event from a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStreamEvent {
    MessageStart { id: String, model: String },
    TextDelta(String),
    /// A tool call whose input JSON has been fully received.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Usage(TokenUsage),
    MessageStop { stop_reason: Option<String> },
}
