// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic Claude provider adapter for the Corvid agent runtime.
//!
//! This crate implements [`ProviderAdapter`] for the Anthropic Messages API,
//! providing both single-shot completion and streaming SSE responses.

pub mod client;
pub mod sse;
pub mod types;

use std::collections::HashMap;

use async_trait::async_trait;
use corvid_config::model::AnthropicConfig;
use corvid_core::types::{
    ContentBlock, ProviderMessage, ProviderRequest, ProviderResponse, ProviderStreamEvent,
    TokenUsage,
};
use corvid_core::{
    AdapterType, CorvidError, HealthStatus, PluginAdapter, ProviderAdapter, ProviderStream, Role,
};
use futures::stream::StreamExt;
use tracing::{debug, info};

use crate::client::AnthropicClient;
use crate::sse::StreamEvent;
use crate::types::{
    ApiContent, ApiContentBlock, ApiMessage, ApiTool, ApiUsage, MessageRequest,
    ResponseContentBlock, SseDelta,
};

/// Anthropic Claude provider implementing [`ProviderAdapter`].
///
/// API key resolution order: config -> `ANTHROPIC_API_KEY` env var -> error.
pub struct AnthropicProvider {
    client: AnthropicClient,
}

impl AnthropicProvider {
    /// Creates a provider from configuration.
    pub fn new(config: &AnthropicConfig) -> Result<Self, CorvidError> {
        let api_key = resolve_api_key(config.api_key.as_deref())?;
        let client = AnthropicClient::new(&api_key, &config.api_version, &config.base_url)?;

        info!(
            model = config.default_model.as_str(),
            "Anthropic provider initialized"
        );
        Ok(Self { client })
    }

    /// Creates a provider with an existing client.
    pub fn with_client(client: AnthropicClient) -> Self {
        Self { client }
    }
}

/// Converts a [`ProviderRequest`] to an Anthropic [`MessageRequest`].
///
/// The Messages API has no system role inside `messages`, so system turns
/// (compaction summaries) are appended to the system prompt.
///
/// The API expects the conversation to open with a user turn. Assistant turns
/// left at the front by truncation are dropped, unless nothing else remains.
fn to_message_request(request: &ProviderRequest) -> MessageRequest {
    let mut system: Vec<String> = request.system_prompt.iter().cloned().collect();
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        match message.role {
            Role::System => system.push(message_text(message)),
            Role::User | Role::Assistant => messages.push(ApiMessage {
                role: message.role.to_string(),
                content: convert_content_blocks(&message.content),
            }),
        }
    }

    if let Some(first_user) = messages.iter().position(|m| m.role == "user")
        && first_user > 0
    {
        debug!(dropped = first_user, "dropping leading assistant turns");
        messages.drain(..first_user);
    }

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    });

    MessageRequest {
        model: request.model.clone(),
        messages,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        max_tokens: request.max_tokens,
        stream: false,
        tools,
    }
}

fn message_text(message: &ProviderMessage) -> String {
    message
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl PluginAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, CorvidError> {
        // Avoids spending tokens on health checks.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CorvidError> {
        debug!("Anthropic provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, CorvidError> {
        let api_request = to_message_request(&request);
        let response = self.client.complete_message(&api_request).await?;

        let content = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                ResponseContentBlock::Unsupported => None,
            })
            .collect();

        Ok(ProviderResponse {
            id: response.id,
            content,
            model: response.model,
            stop_reason: response.stop_reason,
            usage: token_usage(&response.usage),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, CorvidError> {
        let api_request = to_message_request(&request);
        let event_stream = self.client.stream_message(&api_request).await?;

        let mut state = StreamState::default();
        let mapped = event_stream.filter_map(move |result| {
            let event = match result {
                Ok(event) => state.map(event).map(Ok),
                Err(e) => Some(Err(e)),
            };
            async move { event }
        });

        Ok(Box::pin(mapped))
    }
}

fn token_usage(usage: &ApiUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
    }
}

/// Folds raw SSE events into provider events.
///
/// Tool input arrives as partial JSON across deltas; a tool call is emitted
/// only when its content block stops.
#[derive(Debug, Default)]
struct StreamState {
    /// Content block index -> (tool_use_id, tool_name, accumulated_json)
    tool_blocks: HashMap<usize, (String, String, String)>,
    input_tokens: u32,
    stop_reason: Option<String>,
}

impl StreamState {
    fn map(&mut self, event: StreamEvent) -> Option<ProviderStreamEvent> {
        match event {
            StreamEvent::MessageStart(ms) => {
                self.input_tokens = ms.message.usage.input_tokens;
                Some(ProviderStreamEvent::MessageStart {
                    id: ms.message.id,
                    model: ms.message.model,
                })
            }
            StreamEvent::ContentBlockStart(cbs) => match cbs.content_block {
                ResponseContentBlock::ToolUse { id, name, .. } => {
                    self.tool_blocks.insert(cbs.index, (id, name, String::new()));
                    None
                }
                ResponseContentBlock::Text { text } if !text.is_empty() => {
                    Some(ProviderStreamEvent::TextDelta(text))
                }
                _ => None,
            },
            StreamEvent::ContentBlockDelta(delta) => match delta.delta {
                SseDelta::TextDelta { text } => Some(ProviderStreamEvent::TextDelta(text)),
                SseDelta::InputJsonDelta { partial_json } => {
                    if let Some((_, _, json)) = self.tool_blocks.get_mut(&delta.index) {
                        json.push_str(&partial_json);
                    }
                    None
                }
                SseDelta::Unsupported => None,
            },
            StreamEvent::ContentBlockStop(cbs) => {
                let (id, name, json) = self.tool_blocks.remove(&cbs.index)?;
                let input = if json.trim().is_empty() {
                    serde_json::Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&json).unwrap_or_else(|e| {
                        tracing::warn!(error = %e, tool = name.as_str(), "failed to parse tool_use input JSON");
                        serde_json::json!({"_parse_error": e.to_string(), "_raw": json})
                    })
                };
                Some(ProviderStreamEvent::ToolUse { id, name, input })
            }
            StreamEvent::MessageDelta(md) => {
                if md.delta.stop_reason.is_some() {
                    self.stop_reason = md.delta.stop_reason;
                }
                md.usage.map(|u| {
                    ProviderStreamEvent::Usage(TokenUsage {
                        input_tokens: self.input_tokens.max(u.input_tokens),
                        output_tokens: u.output_tokens,
                    })
                })
            }
            StreamEvent::MessageStop => Some(ProviderStreamEvent::MessageStop {
                stop_reason: self.stop_reason.take(),
            }),
            StreamEvent::Ping => None,
        }
    }
}

/// Resolves the API key from config or environment.
fn resolve_api_key(config_key: Option<&str>) -> Result<String, CorvidError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.to_string());
    }

    std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
        CorvidError::Config(
            "Anthropic API key not found. Set anthropic.api_key in config or ANTHROPIC_API_KEY environment variable.".into(),
        )
    })
}

/// Converts core [`ContentBlock`]s to Anthropic API [`ApiContent`].
fn convert_content_blocks(blocks: &[ContentBlock]) -> ApiContent {
    if let [ContentBlock::Text { text }] = blocks {
        return ApiContent::Text(text.clone());
    }

    ApiContent::Blocks(
        blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => ApiContentBlock::Text { text: text.clone() },
                ContentBlock::ToolUse { id, name, input } => ApiContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                },
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => ApiContentBlock::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                },
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use corvid_core::FailureReason;
    use corvid_core::types::ToolDefinition;
    use serial_test::serial;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AnthropicProvider {
        let client = AnthropicClient::new("k", "2023-06-01", &server.uri())
            .unwrap()
            .with_retry_delay(Duration::from_millis(5));
        AnthropicProvider::with_client(client)
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            system_prompt: Some("Be brief.".into()),
            messages: vec![ProviderMessage::text(Role::User, "What is 2+2?")],
            tools: vec![ToolDefinition {
                name: "calculate".into(),
                description: "math".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
            max_tokens: 256,
        }
    }

    #[test]
    #[serial]
    fn resolve_api_key_prefers_config() {
        // SAFETY: serialized with the other tests touching this variable.
        unsafe { std::env::set_var("ANTHROPIC_API_KEY", "sk-from-env") };
        assert_eq!(resolve_api_key(Some("sk-test-123")).unwrap(), "sk-test-123");
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
    }

    #[test]
    #[serial]
    fn resolve_api_key_falls_back_to_env() {
        // SAFETY: serialized with the other tests touching this variable.
        unsafe { std::env::set_var("ANTHROPIC_API_KEY", "sk-from-env") };
        assert_eq!(resolve_api_key(Some("")).unwrap(), "sk-from-env");
        assert_eq!(resolve_api_key(None).unwrap(), "sk-from-env");
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
    }

    #[test]
    #[serial]
    fn missing_api_key_is_a_config_error() {
        // SAFETY: serialized with the other tests touching this variable.
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        assert!(matches!(resolve_api_key(None), Err(CorvidError::Config(_))));
    }

    #[test]
    fn system_turns_fold_into_system_prompt() {
        let mut req = request();
        req.messages.insert(
            0,
            ProviderMessage::text(Role::System, "Earlier chat."),
        );
        let api = to_message_request(&req);
        assert_eq!(api.messages.len(), 1);
        assert_eq!(api.messages[0].role, "user");
        assert_eq!(api.system.as_deref(), Some("Be brief.\n\nEarlier chat."));
        assert_eq!(api.tools.as_ref().unwrap()[0].name, "calculate");
    }

    #[test]
    fn leading_assistant_turns_are_dropped() {
        let mut req = request();
        req.messages = vec![
            ProviderMessage::text(Role::System, "Summary."),
            ProviderMessage::text(Role::Assistant, "re 1"),
            ProviderMessage::text(Role::Assistant, "re 3"),
            ProviderMessage::text(Role::User, "msg 4"),
            ProviderMessage::text(Role::Assistant, "re 5"),
        ];
        let api = to_message_request(&req);
        let roles: Vec<_> = api.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
        assert_eq!(api.system.as_deref(), Some("Be brief.\n\nSummary."));
    }

    #[test]
    fn assistant_only_history_is_left_alone() {
        let mut req = request();
        req.messages = vec![ProviderMessage::text(Role::Assistant, "hello")];
        let api = to_message_request(&req);
        assert_eq!(api.messages.len(), 1);
        assert_eq!(api.messages[0].role, "assistant");
    }

    #[test]
    fn empty_tool_list_is_omitted() {
        let mut req = request();
        req.tools.clear();
        req.system_prompt = None;
        let api = to_message_request(&req);
        assert!(api.tools.is_none());
        assert!(api.system.is_none());
    }

    #[test]
    fn tool_results_become_blocks() {
        let blocks = vec![ContentBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            content: "4".into(),
            is_error: false,
        }];
        match convert_content_blocks(&blocks) {
            ApiContent::Blocks(b) => {
                assert!(matches!(&b[0], ApiContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "tu_1"));
            }
            ApiContent::Text(_) => panic!("expected blocks"),
        }
    }

    #[tokio::test]
    async fn complete_maps_text_and_tool_use() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"system": "Be brief.", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Let me compute."},
                    {"type": "tool_use", "id": "tu_1", "name": "calculate", "input": {"expression": "2+2"}}
                ],
                "model": "claude-sonnet-4-20250514",
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 12, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let response = provider(&server).complete(request()).await.unwrap();
        assert_eq!(response.text(), "Let me compute.");
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(response.usage.output_tokens, 7);
        assert!(matches!(
            &response.content[1],
            ContentBlock::ToolUse { name, input, .. } if name == "calculate" && input["expression"] == "2+2"
        ));
    }

    #[tokio::test]
    async fn stream_assembles_tool_calls() {
        let sse = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_s\",\"content\":[],\"model\":\"claude-sonnet-4-20250514\",\"stop_reason\":null,\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\ndata: {\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: content_block_stop\ndata: {\"index\":0}\n\n",
            "event: content_block_start\ndata: {\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_9\",\"name\":\"calculate\",\"input\":{}}}\n\n",
            "event: content_block_delta\ndata: {\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"expression\\\":\"}}\n\n",
            "event: content_block_delta\ndata: {\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"1+1\\\"}\"}}\n\n",
            "event: content_block_stop\ndata: {\"index\":1}\n\n",
            "event: message_delta\ndata: {\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":15}}\n\n",
            "event: message_stop\ndata: {}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let stream = provider(&server).stream(request()).await.unwrap();
        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(
            events,
            vec![
                ProviderStreamEvent::MessageStart {
                    id: "msg_s".into(),
                    model: "claude-sonnet-4-20250514".into()
                },
                ProviderStreamEvent::TextDelta("Hel".into()),
                ProviderStreamEvent::TextDelta("lo".into()),
                ProviderStreamEvent::ToolUse {
                    id: "tu_9".into(),
                    name: "calculate".into(),
                    input: serde_json::json!({"expression": "1+1"}),
                },
                ProviderStreamEvent::Usage(TokenUsage {
                    input_tokens: 9,
                    output_tokens: 15
                }),
                ProviderStreamEvent::MessageStop {
                    stop_reason: Some("tool_use".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn stream_start_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow"}
            })))
            .mount(&server)
            .await;

        let Err(err) = provider(&server).stream(request()).await else {
            panic!("expected an error");
        };
        assert_eq!(err.failure_reason(), FailureReason::RateLimited);
    }
}
