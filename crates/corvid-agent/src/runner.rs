// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The model interaction loop for one conversation turn.
//!
//! [`TurnRunner`] issues completion requests, dispatches the tool calls the
//! model asks for through a (filtered, approval-gated) [`ToolRegistry`], and
//! feeds the results back until the model answers in plain text or the
//! iteration limit is hit. On the web channel the same loop runs over the
//! provider's event stream and pushes accumulated text to a forwarder.

use std::sync::Arc;

use corvid_core::types::{
    ContentBlock, ProviderMessage, ProviderRequest, ProviderResponse, ProviderStreamEvent,
    TokenUsage, ToolDefinition,
};
use corvid_core::{CorvidError, ProviderAdapter, Role, Turn};
use corvid_skill::ToolRegistry;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default cap on model round trips that may request tools.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Inputs for one turn.
#[derive(Debug, Clone)]
pub struct TurnPlan {
    pub model: String,
    pub fallback_model: Option<String>,
    pub system_prompt: Option<String>,
    pub turns: Vec<Turn>,
}

/// A tool call made during a turn, as persisted with the assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub output: String,
    pub is_error: bool,
}

/// Final result of a turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub text: String,
    /// The model that produced the final answer.
    pub model_used: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
    pub iterations: usize,
}

impl TurnResult {
    /// Tool calls as JSON for storage, `None` when there were none.
    pub fn tool_calls_json(&self) -> Option<serde_json::Value> {
        if self.tool_calls.is_empty() {
            return None;
        }
        serde_json::to_value(&self.tool_calls).ok()
    }
}

/// Runs the completion/tool-use loop against a provider.
#[derive(Clone)]
pub struct TurnRunner {
    provider: Arc<dyn ProviderAdapter>,
    max_tokens: u32,
    max_iterations: usize,
}

impl TurnRunner {
    pub fn new(provider: Arc<dyn ProviderAdapter>, max_tokens: u32, max_iterations: usize) -> Self {
        Self {
            provider,
            max_tokens,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Runs a turn with non-streaming completions.
    pub async fn run(
        &self,
        plan: &TurnPlan,
        tools: &ToolRegistry,
    ) -> Result<TurnResult, CorvidError> {
        self.drive(plan, tools, None).await
    }

    /// Runs a turn over the provider's event stream.
    ///
    /// Accumulated text of the response in flight is sent on `updates` after
    /// every delta. The channel closes when this future completes.
    pub async fn run_streaming(
        &self,
        plan: &TurnPlan,
        tools: &ToolRegistry,
        updates: mpsc::Sender<String>,
    ) -> Result<TurnResult, CorvidError> {
        self.drive(plan, tools, Some(&updates)).await
    }

    async fn drive(
        &self,
        plan: &TurnPlan,
        tools: &ToolRegistry,
        updates: Option<&mpsc::Sender<String>>,
    ) -> Result<TurnResult, CorvidError> {
        let mut messages: Vec<ProviderMessage> = plan
            .turns
            .iter()
            .map(|t| ProviderMessage::text(t.role, t.content.clone()))
            .collect();
        let definitions = tools.definitions();
        let mut model = plan.model.clone();
        let mut tool_calls = Vec::new();
        let mut usage = TokenUsage::default();

        for iteration in 1..=self.max_iterations {
            let response = self
                .call(&mut model, plan, &messages, definitions.clone(), updates)
                .await?;
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;

            let requested: Vec<(String, String, serde_json::Value)> = response
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if requested.is_empty() {
                debug!(iteration, model = model.as_str(), "turn converged");
                return Ok(TurnResult {
                    text: response.text(),
                    model_used: model,
                    tool_calls,
                    usage,
                    iterations: iteration,
                });
            }

            messages.push(ProviderMessage {
                role: Role::Assistant,
                content: response.content,
            });

            let mut results = Vec::with_capacity(requested.len());
            for (id, name, input) in requested {
                let output = tools.dispatch(&name, input.clone()).await;
                info!(
                    tool = name.as_str(),
                    is_error = output.is_error,
                    iteration,
                    "tool call finished"
                );
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content: output.content.clone(),
                    is_error: output.is_error,
                });
                tool_calls.push(ToolCallRecord {
                    id,
                    name,
                    input,
                    output: output.content,
                    is_error: output.is_error,
                });
            }
            messages.push(ProviderMessage {
                role: Role::User,
                content: results,
            });
        }

        warn!(
            max_iterations = self.max_iterations,
            "tool loop did not converge, requesting a final answer without tools"
        );
        let response = self
            .call(&mut model, plan, &messages, Vec::new(), updates)
            .await?;
        usage.input_tokens += response.usage.input_tokens;
        usage.output_tokens += response.usage.output_tokens;

        Ok(TurnResult {
            text: response.text(),
            model_used: model,
            tool_calls,
            usage,
            iterations: self.max_iterations + 1,
        })
    }

    /// One provider round trip, retried once on the fallback model.
    ///
    /// Once the fallback has been used, `model` stays switched for the rest
    /// of the turn.
    async fn call(
        &self,
        model: &mut String,
        plan: &TurnPlan,
        messages: &[ProviderMessage],
        tools: Vec<ToolDefinition>,
        updates: Option<&mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, CorvidError> {
        let request = ProviderRequest {
            model: model.clone(),
            system_prompt: plan.system_prompt.clone(),
            messages: messages.to_vec(),
            tools,
            max_tokens: self.max_tokens,
        };

        let err = match self.request_once(request.clone(), updates).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        let fallback = match plan.fallback_model.as_deref() {
            Some(fallback)
                if err.is_retryable() && *model == plan.model && fallback != model.as_str() =>
            {
                fallback.to_string()
            }
            _ => return Err(err),
        };

        warn!(
            model = model.as_str(),
            fallback = fallback.as_str(),
            error = %err,
            "primary model failed, retrying with fallback"
        );
        *model = fallback;
        self.request_once(
            ProviderRequest {
                model: model.clone(),
                ..request
            },
            updates,
        )
        .await
    }

    async fn request_once(
        &self,
        request: ProviderRequest,
        updates: Option<&mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, CorvidError> {
        match updates {
            None => self.provider.complete(request).await,
            Some(tx) => self.collect_stream(request, tx).await,
        }
    }

    /// Folds a provider event stream into a response, forwarding text.
    async fn collect_stream(
        &self,
        request: ProviderRequest,
        updates: &mpsc::Sender<String>,
    ) -> Result<ProviderResponse, CorvidError> {
        let model = request.model.clone();
        let mut stream = self.provider.stream(request).await?;

        let mut id = String::new();
        let mut text = String::new();
        let mut tool_uses = Vec::new();
        let mut usage = TokenUsage::default();
        let mut stop_reason = None;

        while let Some(event) = stream.next().await {
            match event? {
                ProviderStreamEvent::MessageStart { id: message_id, .. } => id = message_id,
                ProviderStreamEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    // A closed forwarder only means nobody is watching.
                    let _ = updates.send(text.clone()).await;
                }
                ProviderStreamEvent::ToolUse { id, name, input } => {
                    tool_uses.push(ContentBlock::ToolUse { id, name, input });
                }
                ProviderStreamEvent::Usage(u) => usage = u,
                ProviderStreamEvent::MessageStop { stop_reason: reason } => {
                    stop_reason = reason;
                    break;
                }
            }
        }

        let mut content = Vec::with_capacity(tool_uses.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        content.extend(tool_uses);

        Ok(ProviderResponse {
            id,
            content,
            model,
            stop_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corvid_skill::{Tool, ToolOutput};
    use corvid_test_utils::MockProvider;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
            Ok(ToolOutput::text(input["text"].as_str().unwrap_or_default()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        registry
    }

    fn plan(fallback: Option<&str>) -> TurnPlan {
        TurnPlan {
            model: "primary".into(),
            fallback_model: fallback.map(str::to_string),
            system_prompt: Some("Be brief.".into()),
            turns: vec![Turn::user("hello")],
        }
    }

    fn runner(provider: &Arc<MockProvider>) -> TurnRunner {
        TurnRunner::new(provider.clone(), 256, DEFAULT_MAX_ITERATIONS)
    }

    #[tokio::test]
    async fn plain_answer_needs_one_request() {
        let provider = Arc::new(MockProvider::with_responses(["hi there"]));
        let result = runner(&provider).run(&plan(None), &registry()).await.unwrap();

        assert_eq!(result.text, "hi there");
        assert_eq!(result.model_used, "primary");
        assert_eq!(result.iterations, 1);
        assert!(result.tool_calls_json().is_none());

        let requests = provider.requests();
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].system_prompt.as_deref(), Some("Be brief."));
    }

    #[tokio::test]
    async fn tool_results_are_fed_back() {
        let provider = Arc::new(MockProvider::new());
        provider.push_tool_use("t1", "echo", json!({"text": "ping"}));
        provider.push_text("done");

        let result = runner(&provider).run(&plan(None), &registry()).await.unwrap();
        assert_eq!(result.text, "done");
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].output, "ping");

        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(
            last.content,
            vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "ping".into(),
                is_error: false,
            }]
        );
        assert_eq!(second.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let provider = Arc::new(MockProvider::new());
        provider.push_tool_use("t1", "teleport", json!({}));
        provider.push_text("sorry");

        let result = runner(&provider).run(&plan(None), &registry()).await.unwrap();
        assert_eq!(result.text, "sorry");
        assert!(result.tool_calls[0].is_error);
        assert!(result.tool_calls[0].output.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn exhausted_loop_asks_once_more_without_tools() {
        let provider = Arc::new(MockProvider::new());
        for i in 0..3 {
            provider.push_tool_use(&format!("t{i}"), "echo", json!({"text": "again"}));
        }
        provider.push_text("final");

        let runner = TurnRunner::new(provider.clone(), 256, 3);
        let result = runner.run(&plan(None), &registry()).await.unwrap();

        assert_eq!(result.text, "final");
        assert_eq!(result.tool_calls.len(), 3);
        let requests = provider.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[3].tools.is_empty());
    }

    #[tokio::test]
    async fn retryable_error_switches_to_fallback() {
        let provider = Arc::new(MockProvider::with_responses(["from backup"]));
        provider.fail_model("primary");

        let result = runner(&provider)
            .run(&plan(Some("backup")), &registry())
            .await
            .unwrap();
        assert_eq!(result.text, "from backup");
        assert_eq!(result.model_used, "backup");
    }

    #[tokio::test]
    async fn terminal_error_skips_fallback() {
        let provider = Arc::new(MockProvider::new());
        provider.push_error(CorvidError::Provider {
            message: "401 unauthorized".into(),
            source: None,
        });

        let err = runner(&provider)
            .run(&plan(Some("backup")), &registry())
            .await
            .unwrap_err();
        assert!(matches!(err, CorvidError::Provider { .. }));
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn retryable_error_without_fallback_propagates() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_model("primary");

        let err = runner(&provider).run(&plan(None), &registry()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn streaming_forwards_accumulated_text() {
        let provider = Arc::new(MockProvider::new());
        provider.push_tool_use("t1", "echo", json!({"text": "x"}));
        provider.push_text("hello big world");

        let (tx, mut rx) = mpsc::channel(64);
        let result = runner(&provider)
            .run_streaming(&plan(None), &registry(), tx)
            .await
            .unwrap();
        assert_eq!(result.text, "hello big world");
        assert_eq!(result.tool_calls.len(), 1);

        let mut updates = Vec::new();
        while let Some(text) = rx.recv().await {
            updates.push(text);
        }
        assert_eq!(updates, vec!["hello ", "hello big ", "hello big world"]);
    }
}
