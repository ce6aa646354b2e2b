// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `memory_search` and `memory_store`: long-term facts kept per conversation.
//!
//! The registered instances are unscoped. [`bind_memory_tools`] swaps in
//! copies bound to the job's conversation before a turn runs.

use std::sync::Arc;

use async_trait::async_trait;
use corvid_core::types::ConversationId;
use corvid_core::{CorvidError, MemoryStore, truncate_chars};

use crate::tool::{Tool, ToolOutput, ToolRegistry};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const MAX_SEARCH_LIMIT: usize = 20;
const PREVIEW_CHARS: usize = 100;
const RESULT_SEPARATOR: &str = "\n\n---\n\n";
const MANUAL_SOURCE: &str = "manual";

pub struct MemorySearch {
    store: Arc<dyn MemoryStore>,
    conversation_id: Option<ConversationId>,
}

impl MemorySearch {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            conversation_id: None,
        }
    }

    pub fn scoped(store: Arc<dyn MemoryStore>, conversation_id: ConversationId) -> Self {
        Self {
            store,
            conversation_id: Some(conversation_id),
        }
    }
}

#[async_trait]
impl Tool for MemorySearch {
    fn name(&self) -> &str {
        super::MEMORY_SEARCH
    }

    fn description(&self) -> &str {
        "Search your long-term memory for relevant past information, facts, or conversation context"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for in memory" },
                "limit": { "type": "number", "description": "Max results (default 5)" }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
        let query = input["query"].as_str().unwrap_or_default().trim();
        if query.is_empty() {
            return Ok(ToolOutput::error("Missing search query"));
        }
        let limit = input["limit"]
            .as_u64()
            .map_or(DEFAULT_SEARCH_LIMIT, |n| n as usize)
            .clamp(1, MAX_SEARCH_LIMIT);

        let memories = self
            .store
            .search_memories(self.conversation_id.as_ref(), query, limit)
            .await?;
        if memories.is_empty() {
            return Ok(ToolOutput::text("No relevant memories found."));
        }
        let joined = memories
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(RESULT_SEPARATOR);
        Ok(ToolOutput::text(joined))
    }
}

pub struct MemoryStoreTool {
    store: Arc<dyn MemoryStore>,
    conversation_id: Option<ConversationId>,
}

impl MemoryStoreTool {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            conversation_id: None,
        }
    }

    pub fn scoped(store: Arc<dyn MemoryStore>, conversation_id: ConversationId) -> Self {
        Self {
            store,
            conversation_id: Some(conversation_id),
        }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        super::MEMORY_STORE
    }

    fn description(&self) -> &str {
        "Store an important fact, preference, or piece of information in long-term memory for future reference"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact or information to remember" }
            },
            "required": ["content"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
        let content = input["content"].as_str().unwrap_or_default().trim();
        if content.is_empty() {
            return Ok(ToolOutput::error("Nothing to remember: content is empty"));
        }
        let id = self
            .store
            .store_memory(self.conversation_id.as_ref(), content, MANUAL_SOURCE)
            .await?;
        tracing::debug!(memory_id = %id, "memory stored");

        Ok(ToolOutput::text(format!(
            "Stored in memory: \"{}...\"",
            truncate_chars(content, PREVIEW_CHARS)
        )))
    }
}

/// Rebinds whichever memory tools `registry` holds to `conversation_id`.
pub fn bind_memory_tools(
    registry: &ToolRegistry,
    store: &Arc<dyn MemoryStore>,
    conversation_id: &ConversationId,
) -> ToolRegistry {
    let mut bound = registry.clone();
    if registry.get(super::MEMORY_SEARCH).is_some() {
        bound.replace(Arc::new(MemorySearch::scoped(
            store.clone(),
            conversation_id.clone(),
        )));
    }
    if registry.get(super::MEMORY_STORE).is_some() {
        bound.replace(Arc::new(MemoryStoreTool::scoped(
            store.clone(),
            conversation_id.clone(),
        )));
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_test_utils::TestHarness;
    use serde_json::json;

    fn store(harness: &TestHarness) -> Arc<dyn MemoryStore> {
        harness.storage.clone()
    }

    #[tokio::test]
    async fn stored_memories_are_found_again() {
        let harness = TestHarness::new().await;
        let conversation = ConversationId::from("conv-1");
        let save = MemoryStoreTool::scoped(store(&harness), conversation.clone());
        let search = MemorySearch::scoped(store(&harness), conversation);

        let output = save
            .invoke(json!({"content": "Prefers window seats on flights"}))
            .await
            .unwrap();
        assert_eq!(
            output,
            ToolOutput::text("Stored in memory: \"Prefers window seats on flights...\"")
        );
        save.invoke(json!({"content": "Allergic to peanuts"})).await.unwrap();

        let found = search.invoke(json!({"query": "flights"})).await.unwrap();
        assert_eq!(found, ToolOutput::text("Prefers window seats on flights"));

        let both = search
            .invoke(json!({"query": "peanuts window"}))
            .await
            .unwrap();
        assert_eq!(both.content.matches(RESULT_SEPARATOR).count(), 1);
    }

    #[tokio::test]
    async fn misses_and_bad_input() {
        let harness = TestHarness::new().await;
        let search = MemorySearch::new(store(&harness));
        let save = MemoryStoreTool::new(store(&harness));

        let none = search.invoke(json!({"query": "anything"})).await.unwrap();
        assert_eq!(none, ToolOutput::text("No relevant memories found."));
        assert!(search.invoke(json!({})).await.unwrap().is_error);
        assert!(save.invoke(json!({"content": "  "})).await.unwrap().is_error);
    }

    #[tokio::test]
    async fn long_content_preview_is_truncated() {
        let harness = TestHarness::new().await;
        let save = MemoryStoreTool::new(store(&harness));
        let long = "a".repeat(250);
        let output = save.invoke(json!({ "content": long })).await.unwrap();
        assert_eq!(output.content.len(), "Stored in memory: \"".len() + 100 + "...\"".len());
    }

    #[tokio::test]
    async fn binding_scopes_search_to_one_conversation() {
        let harness = TestHarness::new().await;
        let memory = store(&harness);
        let mine = ConversationId::from("conv-a");
        memory
            .store_memory(Some(&ConversationId::from("conv-b")), "Lives in Lisbon", "manual")
            .await
            .unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MemorySearch::new(memory.clone()))).unwrap();
        registry.register(Arc::new(MemoryStoreTool::new(memory.clone()))).unwrap();

        let unscoped = registry.dispatch("memory_search", json!({"query": "Lisbon"})).await;
        assert_eq!(unscoped.content, "Lives in Lisbon");

        let bound = bind_memory_tools(&registry, &memory, &mine);
        let scoped = bound.dispatch("memory_search", json!({"query": "Lisbon"})).await;
        assert_eq!(scoped.content, "No relevant memories found.");

        bound
            .dispatch("memory_store", json!({"content": "Moving to Lisbon"}))
            .await;
        let stored = memory.search_memories(Some(&mine), "Lisbon", 5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Moving to Lisbon");
    }

    #[tokio::test]
    async fn binding_adds_nothing_the_policy_removed() {
        let harness = TestHarness::new().await;
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(MemorySearch::new(store(&harness))))
            .unwrap();

        let bound = bind_memory_tools(&registry, &store(&harness), &ConversationId::from("c"));
        assert_eq!(bound.names(), vec!["memory_search"]);
    }
}
