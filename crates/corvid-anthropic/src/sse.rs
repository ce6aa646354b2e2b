// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SSE stream parser for Anthropic Messages API streaming responses.
//!
//! Converts a reqwest response byte stream into typed [`StreamEvent`] variants
//! using the `eventsource-stream` crate for SSE protocol compliance. In-band
//! `error` events surface as classified [`CorvidError`]s.

use std::pin::Pin;

use corvid_core::CorvidError;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::types::{
    ApiErrorResponse, SseContentBlockDelta, SseContentBlockStart, SseContentBlockStop,
    SseMessageDelta, SseMessageStart,
};

/// Stream of parsed SSE events.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, CorvidError>> + Send>>;

/// Typed SSE events from the Anthropic streaming protocol.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart(SseMessageStart),
    ContentBlockStart(SseContentBlockStart),
    ContentBlockDelta(SseContentBlockDelta),
    ContentBlockStop(SseContentBlockStop),
    /// Message-level delta (stop_reason, usage update).
    MessageDelta(SseMessageDelta),
    MessageStop,
    Ping,
}

fn parse<T: DeserializeOwned>(name: &str, data: &str) -> Result<T, CorvidError> {
    serde_json::from_str(data).map_err(|e| CorvidError::Provider {
        message: format!("failed to parse {name}: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Classifies an in-band `error` event.
fn stream_error(data: &str) -> CorvidError {
    let Ok(api) = serde_json::from_str::<ApiErrorResponse>(data) else {
        return CorvidError::Provider {
            message: format!("unparseable stream error: {data}"),
            source: None,
        };
    };
    let message = format!("{}: {}", api.error.type_, api.error.message);
    match api.error.type_.as_str() {
        "rate_limit_error" => CorvidError::RateLimited {
            message,
            retry_after: None,
        },
        "overloaded_error" | "api_error" => CorvidError::TransientProvider {
            message,
            source: None,
        },
        _ => CorvidError::Provider {
            message,
            source: None,
        },
    }
}

/// Parses a reqwest streaming response into a stream of typed [`StreamEvent`]s.
///
/// Unknown event types are skipped per Anthropic's API versioning policy.
pub fn parse_sse_stream(response: reqwest::Response) -> SseStream {
    let event_stream = response.bytes_stream().eventsource();

    let mapped = event_stream.filter_map(|result| async move {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                return Some(Err(CorvidError::TransientProvider {
                    message: format!("SSE stream error: {e}"),
                    source: None,
                }));
            }
        };
        let data = event.data.as_str();
        let parsed = match event.event.as_str() {
            "message_start" => parse("message_start", data).map(StreamEvent::MessageStart),
            "content_block_start" => {
                parse("content_block_start", data).map(StreamEvent::ContentBlockStart)
            }
            "content_block_delta" => {
                parse("content_block_delta", data).map(StreamEvent::ContentBlockDelta)
            }
            "content_block_stop" => {
                parse("content_block_stop", data).map(StreamEvent::ContentBlockStop)
            }
            "message_delta" => parse("message_delta", data).map(StreamEvent::MessageDelta),
            "message_stop" => Ok(StreamEvent::MessageStop),
            "ping" => Ok(StreamEvent::Ping),
            "error" => Err(stream_error(data)),
            _ => return None,
        };
        Some(parsed)
    });

    Box::pin(mapped)
}
