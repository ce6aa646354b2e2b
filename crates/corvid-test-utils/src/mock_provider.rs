// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock LLM provider adapter for deterministic testing.
//!
//! `MockProvider` implements `ProviderAdapter` with a scripted FIFO of
//! responses and errors, and records every request it receives.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream;

use corvid_core::types::{
    ContentBlock, ProviderRequest, ProviderResponse, ProviderStreamEvent, TokenUsage,
};
use corvid_core::{
    AdapterType, CorvidError, HealthStatus, PluginAdapter, ProviderAdapter, ProviderStream,
};

const DEFAULT_TEXT: &str = "mock response";

enum Scripted {
    Response(ProviderResponse),
    Error(CorvidError),
}

/// A mock LLM provider that returns pre-configured responses.
///
/// Scripted items are popped in order by both `complete` and `stream`. When
/// the script is empty, a default "mock response" text is returned.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ProviderRequest>>,
    failing_models: Mutex<HashSet<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn canned(content: Vec<ContentBlock>, stop_reason: &str) -> ProviderResponse {
    ProviderResponse {
        id: format!("mock-resp-{}", uuid::Uuid::new_v4()),
        content,
        model: String::new(),
        stop_reason: Some(stop_reason.to_string()),
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
        },
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provider pre-loaded with text responses.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for text in responses {
            provider.push_text(text);
        }
        provider
    }

    /// Queue a plain text answer.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push_response(canned(
            vec![ContentBlock::Text { text: text.into() }],
            "end_turn",
        ));
    }

    /// Queue a response that asks for one tool call.
    pub fn push_tool_use(&self, id: &str, name: &str, input: serde_json::Value) {
        self.push_response(canned(
            vec![ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }],
            "tool_use",
        ));
    }

    pub fn push_response(&self, response: ProviderResponse) {
        lock(&self.script).push_back(Scripted::Response(response));
    }

    /// Queue an error for the next call.
    pub fn push_error(&self, error: CorvidError) {
        lock(&self.script).push_back(Scripted::Error(error));
    }

    /// Every request naming `model` fails with a transient error.
    pub fn fail_model(&self, model: &str) {
        lock(&self.failing_models).insert(model.to_string());
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next(&self, request: ProviderRequest) -> Result<ProviderResponse, CorvidError> {
        let model = request.model.clone();
        lock(&self.requests).push(request);

        if lock(&self.failing_models).contains(&model) {
            return Err(CorvidError::TransientProvider {
                message: format!("model {model} is overloaded"),
                source: None,
            });
        }

        let scripted = lock(&self.script).pop_front();
        let mut response = match scripted {
            Some(Scripted::Response(r)) => r,
            Some(Scripted::Error(e)) => return Err(e),
            None => canned(
                vec![ContentBlock::Text {
                    text: DEFAULT_TEXT.to_string(),
                }],
                "end_turn",
            ),
        };
        response.model = model;
        Ok(response)
    }
}

/// Splits a response into the event sequence a streaming provider emits.
fn stream_events(response: ProviderResponse) -> Vec<ProviderStreamEvent> {
    let mut events = vec![ProviderStreamEvent::MessageStart {
        id: response.id,
        model: response.model,
    }];
    for block in response.content {
        match block {
            ContentBlock::Text { text } => events.extend(
                text.split_inclusive(' ')
                    .map(|chunk| ProviderStreamEvent::TextDelta(chunk.to_string())),
            ),
            ContentBlock::ToolUse { id, name, input } => {
                events.push(ProviderStreamEvent::ToolUse { id, name, input });
            }
            ContentBlock::ToolResult { .. } => {}
        }
    }
    events.push(ProviderStreamEvent::Usage(response.usage));
    events.push(ProviderStreamEvent::MessageStop {
        stop_reason: response.stop_reason,
    });
    events
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, CorvidError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CorvidError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, CorvidError> {
        self.next(request)
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, CorvidError> {
        let response = self.next(request)?;
        Ok(Box::pin(stream::iter(
            stream_events(response).into_iter().map(Ok),
        )))
    }
}
