// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence traits.
//!
//! Each trait groups the transactional primitives one component needs. A
//! single backend usually implements all of them and is shared as several
//! `Arc<dyn ...>` handles. Operations that coordinate workers (job claim,
//! lease acquire/heartbeat, outbound claim) must be atomic in the backend.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CorvidError, FailureReason};
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    AgentProfile, ApprovalId, ApprovalRequest, ApprovalStatus, Channel, ContactId, Contact,
    ConversationContext, ConversationId, Job, JobId, LeaseAcquisition, ChannelLease, Memory,
    MemoryId, MessageId, NewApproval, NewOutbound, NewScheduledTask, OutboundId,
    OutboundMessage, PurgedJobs, RetryOutcome, ScheduledTask, ScheduledTaskId, Skill,
    TaskFiring,
};

/// Lifecycle of a storage backend.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connections).
    async fn initialize(&self) -> Result<(), CorvidError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), CorvidError>;
}

/// Job queue primitives.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueues a pending job for a conversation message.
    async fn enqueue_job(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<JobId, CorvidError>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, CorvidError>;

    /// Pending jobs, oldest first.
    async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, CorvidError>;

    /// Atomically moves a job from `pending` to `processing`.
    ///
    /// Returns `None` when the job is missing or not pending.
    async fn claim_job(&self, id: &JobId) -> Result<Option<Job>, CorvidError>;

    /// Moves a job from `processing` to `completed`.
    ///
    /// Returns `false` if it was already completed.
    async fn complete_job(&self, id: &JobId, model_used: Option<&str>)
    -> Result<bool, CorvidError>;

    /// Marks a job `failed` with a classified reason and message.
    async fn fail_job(
        &self,
        id: &JobId,
        reason: FailureReason,
        message: &str,
    ) -> Result<(), CorvidError>;

    /// Records one more attempt and requeues the job if under `max_attempts`.
    async fn retry_job(&self, id: &JobId, max_attempts: u32) -> Result<RetryOutcome, CorvidError>;

    /// Whether the conversation has a pending or processing job.
    async fn is_conversation_busy(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, CorvidError>;

    /// Deletes completed and failed jobs created more than `older_than` ago.
    async fn purge_finished_jobs(&self, older_than: Duration) -> Result<PurgedJobs, CorvidError>;
}

/// Conversation, message, contact and agent configuration storage.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation_context(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationContext>, CorvidError>;

    async fn create_conversation(
        &self,
        channel: Channel,
        contact_id: Option<&ContactId>,
        agent_id: Option<&str>,
    ) -> Result<ConversationId, CorvidError>;

    /// Returns the contact's conversation on `channel`, creating it if needed.
    async fn get_or_create_conversation(
        &self,
        contact_id: &ContactId,
        channel: Channel,
    ) -> Result<ConversationId, CorvidError>;

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, CorvidError>;

    async fn create_contact(
        &self,
        phone: &str,
        name: &str,
        is_allowed: bool,
    ) -> Result<Contact, CorvidError>;

    /// Inserts a user message and enqueues its job in one transaction.
    async fn submit_user_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        channel: Channel,
    ) -> Result<(MessageId, JobId), CorvidError>;

    async fn add_assistant_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        channel: Channel,
        tool_calls: Option<serde_json::Value>,
    ) -> Result<MessageId, CorvidError>;

    /// Persists a compaction summary as a system message.
    async fn add_summary_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        channel: Channel,
        original_count: usize,
    ) -> Result<MessageId, CorvidError>;

    /// Creates an empty assistant message in `streaming` state.
    async fn create_placeholder(
        &self,
        conversation_id: &ConversationId,
        channel: Channel,
    ) -> Result<MessageId, CorvidError>;

    async fn update_streaming_content(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<(), CorvidError>;

    async fn finalize_message(
        &self,
        message_id: &MessageId,
        content: &str,
        tool_calls: Option<serde_json::Value>,
    ) -> Result<(), CorvidError>;

    async fn mark_message_failed(&self, message_id: &MessageId) -> Result<(), CorvidError>;

    async fn save_agent(&self, agent: &AgentProfile) -> Result<(), CorvidError>;

    async fn save_skill(&self, skill: &Skill) -> Result<(), CorvidError>;
}

/// Human approval requests.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn create_approval(&self, request: &NewApproval) -> Result<ApprovalId, CorvidError>;

    async fn get_approval(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, CorvidError>;

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, CorvidError>;

    /// Moves a pending request to `status`. Returns `false` if it was not pending.
    async fn resolve_approval(
        &self,
        id: &ApprovalId,
        status: ApprovalStatus,
    ) -> Result<bool, CorvidError>;
}

/// Channel lease table.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Installs a lease if none exists, the current one expired, or `owner_id`
    /// already holds it.
    async fn acquire_lease(
        &self,
        account_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, CorvidError>;

    /// Extends the lease if `owner_id` is still the recorded owner.
    async fn heartbeat_lease(
        &self,
        account_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, CorvidError>;

    /// Removes the lease if held by `owner_id`.
    async fn release_lease(&self, account_id: &str, owner_id: &str) -> Result<bool, CorvidError>;

    async fn get_lease(&self, account_id: &str) -> Result<Option<ChannelLease>, CorvidError>;
}

/// Durable outbound message queue.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue_outbound(&self, message: &NewOutbound) -> Result<OutboundId, CorvidError>;

    /// Claims the oldest deliverable message for an account under a processor lock.
    async fn claim_next_outbound(
        &self,
        channel: Channel,
        account_id: &str,
        processor_id: &str,
        lock: Duration,
    ) -> Result<Option<OutboundMessage>, CorvidError>;

    /// Marks a message sent. Returns `false` when `processor_id` no longer
    /// holds the claim.
    async fn complete_outbound(
        &self,
        id: &OutboundId,
        processor_id: &str,
    ) -> Result<bool, CorvidError>;

    /// Marks a message failed. With `retry_after` set, the message becomes
    /// claimable again after that delay until its attempt ceiling is reached.
    /// Returns `false` when `processor_id` no longer holds the claim.
    async fn fail_outbound(
        &self,
        id: &OutboundId,
        processor_id: &str,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<bool, CorvidError>;

    async fn get_outbound(&self, id: &OutboundId) -> Result<Option<OutboundMessage>, CorvidError>;
}

/// Recurring and one-shot tasks that enqueue agent turns.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_scheduled_task(
        &self,
        task: &NewScheduledTask,
    ) -> Result<ScheduledTaskId, CorvidError>;

    async fn get_scheduled_task(
        &self,
        id: &ScheduledTaskId,
    ) -> Result<Option<ScheduledTask>, CorvidError>;

    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>, CorvidError>;

    /// Returns `false` when the task does not exist.
    async fn set_task_enabled(&self, id: &ScheduledTaskId, enabled: bool)
    -> Result<bool, CorvidError>;

    /// Enabled tasks whose `next_run_at` is at or before `now_ms`, earliest first.
    async fn due_scheduled_tasks(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, CorvidError>;

    /// Atomically advances a due task to `next_run_at` and enqueues its turn.
    ///
    /// Writes the task prompt as a user message, opening a web conversation
    /// when the task has none, and a pending job for it. Returns `None` when
    /// the task is no longer due at `now_ms`, so concurrent schedulers fire
    /// each occurrence once.
    async fn fire_scheduled_task(
        &self,
        id: &ScheduledTaskId,
        now_ms: i64,
        next_run_at: Option<i64>,
    ) -> Result<Option<TaskFiring>, CorvidError>;
}

/// Long-term memories written and searched by the agent's memory tools.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store_memory(
        &self,
        conversation_id: Option<&ConversationId>,
        content: &str,
        source: &str,
    ) -> Result<MemoryId, CorvidError>;

    /// Full-text search, best match first. A conversation restricts the
    /// search to memories stored from it.
    async fn search_memories(
        &self,
        conversation_id: Option<&ConversationId>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, CorvidError>;
}
