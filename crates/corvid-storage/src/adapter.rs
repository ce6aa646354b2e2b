// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the storage traits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use corvid_config::model::StorageConfig;
use corvid_core::types::{
    AgentProfile, ApprovalId, ApprovalRequest, ApprovalStatus, ChannelLease, Contact, ContactId,
    ConversationContext, ConversationId, Job, JobId, LeaseAcquisition, Memory, MemoryId,
    MessageId, NewApproval, NewOutbound, NewScheduledTask, OutboundId, OutboundMessage,
    PurgedJobs, RetryOutcome, ScheduledTask, ScheduledTaskId, Skill, TaskFiring,
};
use corvid_core::{
    AdapterType, ApprovalStore, Channel, ConversationStore, CorvidError, FailureReason,
    HealthStatus, JobStore, LeaseStore, MemoryStore, OutboxStore, PluginAdapter, ScheduleStore,
    StorageAdapter,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`StorageAdapter::initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, CorvidError> {
        self.db.get().ok_or_else(|| CorvidError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }

    async fn checkpoint(db: &Database) -> Result<(), CorvidError> {
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, CorvidError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CorvidError> {
        if let Some(db) = self.db.get() {
            Self::checkpoint(db).await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), CorvidError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| CorvidError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), CorvidError> {
        Self::checkpoint(self.db()?).await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn enqueue_job(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<JobId, CorvidError> {
        queries::jobs::enqueue_job(self.db()?, conversation_id, message_id).await
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, CorvidError> {
        queries::jobs::get_job(self.db()?, id).await
    }

    async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, CorvidError> {
        queries::jobs::list_pending_jobs(self.db()?, limit).await
    }

    async fn claim_job(&self, id: &JobId) -> Result<Option<Job>, CorvidError> {
        queries::jobs::claim_job(self.db()?, id).await
    }

    async fn complete_job(
        &self,
        id: &JobId,
        model_used: Option<&str>,
    ) -> Result<bool, CorvidError> {
        queries::jobs::complete_job(self.db()?, id, model_used).await
    }

    async fn fail_job(
        &self,
        id: &JobId,
        reason: FailureReason,
        message: &str,
    ) -> Result<(), CorvidError> {
        queries::jobs::fail_job(self.db()?, id, reason, message).await
    }

    async fn retry_job(&self, id: &JobId, max_attempts: u32) -> Result<RetryOutcome, CorvidError> {
        queries::jobs::retry_job(self.db()?, id, max_attempts).await
    }

    async fn is_conversation_busy(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<bool, CorvidError> {
        queries::jobs::is_conversation_busy(self.db()?, conversation_id).await
    }

    async fn purge_finished_jobs(&self, older_than: Duration) -> Result<PurgedJobs, CorvidError> {
        queries::jobs::purge_finished_jobs(self.db()?, older_than).await
    }
}

#[async_trait]
impl ConversationStore for SqliteStorage {
    async fn get_conversation_context(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationContext>, CorvidError> {
        queries::conversations::get_conversation_context(self.db()?, id).await
    }

    async fn create_conversation(
        &self,
        channel: Channel,
        contact_id: Option<&ContactId>,
        agent_id: Option<&str>,
    ) -> Result<ConversationId, CorvidError> {
        queries::conversations::create_conversation(self.db()?, channel, contact_id, agent_id).await
    }

    async fn get_or_create_conversation(
        &self,
        contact_id: &ContactId,
        channel: Channel,
    ) -> Result<ConversationId, CorvidError> {
        queries::conversations::get_or_create_conversation(self.db()?, contact_id, channel).await
    }

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, CorvidError> {
        queries::conversations::get_contact_by_phone(self.db()?, phone).await
    }

    async fn create_contact(
        &self,
        phone: &str,
        name: &str,
        is_allowed: bool,
    ) -> Result<Contact, CorvidError> {
        queries::conversations::create_contact(self.db()?, phone, name, is_allowed).await
    }

    async fn submit_user_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        channel: Channel,
    ) -> Result<(MessageId, JobId), CorvidError> {
        queries::conversations::submit_user_message(self.db()?, conversation_id, content, channel)
            .await
    }

    async fn add_assistant_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        channel: Channel,
        tool_calls: Option<serde_json::Value>,
    ) -> Result<MessageId, CorvidError> {
        queries::conversations::add_assistant_message(
            self.db()?,
            conversation_id,
            content,
            channel,
            tool_calls,
        )
        .await
    }

    async fn add_summary_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
        channel: Channel,
        original_count: usize,
    ) -> Result<MessageId, CorvidError> {
        queries::conversations::add_summary_message(
            self.db()?,
            conversation_id,
            content,
            channel,
            original_count,
        )
        .await
    }

    async fn create_placeholder(
        &self,
        conversation_id: &ConversationId,
        channel: Channel,
    ) -> Result<MessageId, CorvidError> {
        queries::conversations::create_placeholder(self.db()?, conversation_id, channel).await
    }

    async fn update_streaming_content(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> Result<(), CorvidError> {
        queries::conversations::update_streaming_content(self.db()?, message_id, content).await
    }

    async fn finalize_message(
        &self,
        message_id: &MessageId,
        content: &str,
        tool_calls: Option<serde_json::Value>,
    ) -> Result<(), CorvidError> {
        queries::conversations::finalize_message(self.db()?, message_id, content, tool_calls).await
    }

    async fn mark_message_failed(&self, message_id: &MessageId) -> Result<(), CorvidError> {
        queries::conversations::mark_message_failed(self.db()?, message_id).await
    }

    async fn save_agent(&self, agent: &AgentProfile) -> Result<(), CorvidError> {
        queries::conversations::save_agent(self.db()?, agent).await
    }

    async fn save_skill(&self, skill: &Skill) -> Result<(), CorvidError> {
        queries::conversations::save_skill(self.db()?, skill).await
    }
}

#[async_trait]
impl ApprovalStore for SqliteStorage {
    async fn create_approval(&self, request: &NewApproval) -> Result<ApprovalId, CorvidError> {
        queries::approvals::create_approval(self.db()?, request).await
    }

    async fn get_approval(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, CorvidError> {
        queries::approvals::get_approval(self.db()?, id).await
    }

    async fn list_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, CorvidError> {
        queries::approvals::list_pending_approvals(self.db()?).await
    }

    async fn resolve_approval(
        &self,
        id: &ApprovalId,
        status: ApprovalStatus,
    ) -> Result<bool, CorvidError> {
        queries::approvals::resolve_approval(self.db()?, id, status).await
    }
}

#[async_trait]
impl LeaseStore for SqliteStorage {
    async fn acquire_lease(
        &self,
        account_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, CorvidError> {
        queries::leases::acquire_lease(self.db()?, account_id, owner_id, ttl).await
    }

    async fn heartbeat_lease(
        &self,
        account_id: &str,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<bool, CorvidError> {
        queries::leases::heartbeat_lease(self.db()?, account_id, owner_id, ttl).await
    }

    async fn release_lease(&self, account_id: &str, owner_id: &str) -> Result<bool, CorvidError> {
        queries::leases::release_lease(self.db()?, account_id, owner_id).await
    }

    async fn get_lease(&self, account_id: &str) -> Result<Option<ChannelLease>, CorvidError> {
        queries::leases::get_lease(self.db()?, account_id).await
    }
}

#[async_trait]
impl OutboxStore for SqliteStorage {
    async fn enqueue_outbound(&self, message: &NewOutbound) -> Result<OutboundId, CorvidError> {
        queries::outbound::enqueue_outbound(self.db()?, message).await
    }

    async fn claim_next_outbound(
        &self,
        channel: Channel,
        account_id: &str,
        processor_id: &str,
        lock: Duration,
    ) -> Result<Option<OutboundMessage>, CorvidError> {
        queries::outbound::claim_next_outbound(self.db()?, channel, account_id, processor_id, lock)
            .await
    }

    async fn complete_outbound(
        &self,
        id: &OutboundId,
        processor_id: &str,
    ) -> Result<bool, CorvidError> {
        queries::outbound::complete_outbound(self.db()?, id, processor_id).await
    }

    async fn fail_outbound(
        &self,
        id: &OutboundId,
        processor_id: &str,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<bool, CorvidError> {
        queries::outbound::fail_outbound(self.db()?, id, processor_id, error, retry_after).await
    }

    async fn get_outbound(&self, id: &OutboundId) -> Result<Option<OutboundMessage>, CorvidError> {
        queries::outbound::get_outbound(self.db()?, id).await
    }
}

#[async_trait]
impl ScheduleStore for SqliteStorage {
    async fn create_scheduled_task(
        &self,
        task: &NewScheduledTask,
    ) -> Result<ScheduledTaskId, CorvidError> {
        queries::scheduled::create_scheduled_task(self.db()?, task).await
    }

    async fn get_scheduled_task(
        &self,
        id: &ScheduledTaskId,
    ) -> Result<Option<ScheduledTask>, CorvidError> {
        queries::scheduled::get_scheduled_task(self.db()?, id).await
    }

    async fn list_scheduled_tasks(&self) -> Result<Vec<ScheduledTask>, CorvidError> {
        queries::scheduled::list_scheduled_tasks(self.db()?).await
    }

    async fn set_task_enabled(
        &self,
        id: &ScheduledTaskId,
        enabled: bool,
    ) -> Result<bool, CorvidError> {
        queries::scheduled::set_task_enabled(self.db()?, id, enabled).await
    }

    async fn due_scheduled_tasks(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, CorvidError> {
        queries::scheduled::due_scheduled_tasks(self.db()?, now_ms, limit).await
    }

    async fn fire_scheduled_task(
        &self,
        id: &ScheduledTaskId,
        now_ms: i64,
        next_run_at: Option<i64>,
    ) -> Result<Option<TaskFiring>, CorvidError> {
        queries::scheduled::fire_scheduled_task(self.db()?, id, now_ms, next_run_at).await
    }
}

#[async_trait]
impl MemoryStore for SqliteStorage {
    async fn store_memory(
        &self,
        conversation_id: Option<&ConversationId>,
        content: &str,
        source: &str,
    ) -> Result<MemoryId, CorvidError> {
        queries::memories::store_memory(self.db()?, conversation_id, content, source).await
    }

    async fn search_memories(
        &self,
        conversation_id: Option<&ConversationId>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, CorvidError> {
        queries::memories::search_memories(self.db()?, conversation_id, query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
        let result = storage.initialize().await;
        assert!(result.is_err(), "second initialize should fail");
    }

    #[tokio::test]
    async fn health_check_requires_initialize() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert!(storage.health_check().await.is_err());
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn one_backend_serves_every_store_trait() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("traits.db");
        let storage = Arc::new(SqliteStorage::new(make_config(db_path.to_str().unwrap())));
        storage.initialize().await.unwrap();

        let conversations: Arc<dyn ConversationStore> = storage.clone();
        let jobs: Arc<dyn JobStore> = storage.clone();
        let outbox: Arc<dyn OutboxStore> = storage.clone();

        let contact = conversations
            .create_contact("15551234567", "Ada", true)
            .await
            .unwrap();
        let conv = conversations
            .get_or_create_conversation(&contact.id, Channel::WhatsApp)
            .await
            .unwrap();
        let (_, job_id) = conversations
            .submit_user_message(&conv, "what time is it?", Channel::WhatsApp)
            .await
            .unwrap();

        let claimed = jobs.claim_job(&job_id).await.unwrap().unwrap();
        assert_eq!(claimed.conversation_id, conv);

        outbox
            .enqueue_outbound(&NewOutbound {
                channel: Channel::WhatsApp,
                account_id: "default".into(),
                conversation_id: Some(conv.clone()),
                to: Some(contact.phone.clone()),
                content: "It is noon.".into(),
            })
            .await
            .unwrap();
        assert!(jobs.complete_job(&job_id, Some("claude")).await.unwrap());

        let memory: Arc<dyn MemoryStore> = storage.clone();
        memory
            .store_memory(Some(&conv), "Ada likes noon meetings", "manual")
            .await
            .unwrap();
        let found = memory.search_memories(Some(&conv), "meetings", 5).await.unwrap();
        assert_eq!(found.len(), 1);

        let schedule: Arc<dyn ScheduleStore> = storage.clone();
        let task = schedule
            .create_scheduled_task(&NewScheduledTask {
                name: "noon".into(),
                description: None,
                cron_expression: None,
                interval_ms: None,
                payload: "Say noon".into(),
                conversation_id: Some(conv.clone()),
                next_run_at: Some(0),
            })
            .await
            .unwrap();
        let fired = schedule.fire_scheduled_task(&task, 1, None).await.unwrap().unwrap();
        assert_eq!(fired.conversation_id, conv);

        storage.shutdown().await.unwrap();
    }
}
