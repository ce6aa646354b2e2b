// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for integration testing.
//!
//! `TestHarness` assembles a temp SQLite database, a mock provider, a mock
//! messaging session and a configuration tuned for fast tests.

use std::sync::Arc;

use corvid_config::CorvidConfig;
use corvid_core::types::{Contact, ConversationId, JobId, MessageId};
use corvid_core::{Channel, ConversationStore, CorvidError, StorageAdapter};
use corvid_storage::SqliteStorage;

use crate::mock_provider::MockProvider;
use crate::mock_session::MockSession;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    responses: Vec<String>,
    config: CorvidConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = CorvidConfig::default();
        config.agent.system_prompt = Some("You are a test assistant.".to_string());
        config.jobs.poll_interval_ms = 20;
        config.jobs.stream_throttle_ms = 10;
        config.scheduler.poll_interval_ms = 20;
        config.approval.poll_interval_ms = 10;
        config.approval.timeout_secs = 2;
        config.whatsapp.worker_id = Some("test-worker".to_string());
        config.whatsapp.retry_delay_ms = 10;
        Self {
            responses: Vec::new(),
            config,
        }
    }

    /// Set mock provider text responses.
    pub fn with_mock_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses = responses.into_iter().map(Into::into).collect();
        self
    }

    /// Adjust the configuration before the harness is built.
    pub fn with_config(mut self, f: impl FnOnce(&mut CorvidConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Build the test harness, creating the temp database.
    pub async fn build(mut self) -> Result<TestHarness, CorvidError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| CorvidError::Storage { source: e.into() })?;
        self.config.storage.database_path =
            temp_dir.path().join("test.db").to_string_lossy().into_owned();

        let storage = SqliteStorage::new(self.config.storage.clone());
        storage.initialize().await?;

        Ok(TestHarness {
            storage: Arc::new(storage),
            mock_provider: Arc::new(MockProvider::with_responses(self.responses)),
            mock_session: Arc::new(MockSession::new()),
            config: self.config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock adapters and temp storage.
pub struct TestHarness {
    /// SQLite storage (temp DB, cleaned up on drop).
    pub storage: Arc<SqliteStorage>,
    pub mock_provider: Arc<MockProvider>,
    pub mock_session: Arc<MockSession>,
    pub config: CorvidConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Builds a harness with defaults.
    ///
    /// # Panics
    /// If the temp database cannot be created.
    pub async fn new() -> Self {
        match Self::builder().build().await {
            Ok(harness) => harness,
            Err(e) => panic!("failed to build test harness: {e}"),
        }
    }

    /// Creates an empty web conversation.
    pub async fn web_conversation(&self) -> ConversationId {
        match self
            .storage
            .create_conversation(Channel::Web, None, None)
            .await
        {
            Ok(id) => id,
            Err(e) => panic!("failed to create conversation: {e}"),
        }
    }

    /// Creates an allowed contact and its WhatsApp conversation.
    pub async fn whatsapp_conversation(&self, phone: &str) -> (Contact, ConversationId) {
        let result = async {
            let contact = self.storage.create_contact(phone, phone, true).await?;
            let conversation = self
                .storage
                .get_or_create_conversation(&contact.id, Channel::WhatsApp)
                .await?;
            Ok::<_, CorvidError>((contact, conversation))
        }
        .await;
        match result {
            Ok(pair) => pair,
            Err(e) => panic!("failed to create WhatsApp conversation: {e}"),
        }
    }

    /// Inserts a user message and enqueues its job.
    pub async fn submit(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        channel: Channel,
    ) -> (MessageId, JobId) {
        match self
            .storage
            .submit_user_message(conversation_id, text, channel)
            .await
        {
            Ok(ids) => ids,
            Err(e) => panic!("failed to submit message: {e}"),
        }
    }
}
