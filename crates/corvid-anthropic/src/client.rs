// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Anthropic Messages API.
//!
//! Provides [`AnthropicClient`] which handles request construction,
//! authentication, streaming SSE responses, one retry on server-side
//! failures, and the classification of every failure into [`CorvidError`].

use std::time::Duration;

use corvid_core::CorvidError;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use tracing::{debug, warn};

use crate::sse::{self, SseStream};
use crate::types::{ApiErrorResponse, MessageRequest, MessageResponse};

/// HTTP client for Anthropic API communication.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl AnthropicClient {
    /// Creates a new Anthropic API client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key for authentication
    /// * `api_version` - API version string (e.g., "2023-06-01")
    /// * `base_url` - Messages endpoint URL
    pub fn new(api_key: &str, api_version: &str, base_url: &str) -> Result<Self, CorvidError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| CorvidError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(api_version).map_err(|e| {
                CorvidError::Config(format!("invalid API version header value: {e}"))
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| CorvidError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            max_retries: 1,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Overrides the delay before retrying a server-side failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sends a streaming request and returns a stream of SSE events.
    pub async fn stream_message(&self, request: &MessageRequest) -> Result<SseStream, CorvidError> {
        let mut req = request.clone();
        req.stream = true;
        let response = self.send(&req).await?;
        Ok(sse::parse_sse_stream(response))
    }

    /// Sends a non-streaming request and returns the full response.
    pub async fn complete_message(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageResponse, CorvidError> {
        let mut req = request.clone();
        req.stream = false;
        let response = self.send(&req).await?;

        let body = response
            .text()
            .await
            .map_err(|e| CorvidError::TransientProvider {
                message: format!("failed to read response body: {e}"),
                source: Some(Box::new(e)),
            })?;
        serde_json::from_str(&body).map_err(|e| CorvidError::Provider {
            message: format!("failed to parse API response: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// Posts `request`, retrying server-side failures, and returns the
    /// successful response.
    async fn send(&self, request: &MessageRequest) -> Result<reqwest::Response, CorvidError> {
        let mut attempt = 0;
        loop {
            let result = self.client.post(&self.base_url).json(request).send().await;
            let error = match result {
                Ok(response) if response.status().is_success() => {
                    debug!(status = %response.status(), attempt, "response received");
                    return Ok(response);
                }
                Ok(response) => error_from_response(response).await,
                Err(e) => CorvidError::TransientProvider {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                },
            };

            // Rate limits are retried at the job level, where the backoff lives.
            if !matches!(error, CorvidError::TransientProvider { .. }) || attempt >= self.max_retries
            {
                return Err(error);
            }
            attempt += 1;
            warn!(attempt, error = %error, "transient provider error, retrying");
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

/// Classifies a non-success HTTP response.
async fn error_from_response(response: reqwest::Response) -> CorvidError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    classify_error(status, retry_after, &body)
}

/// Maps an HTTP failure onto the error taxonomy.
///
/// | Status | Error |
/// |---|---|
/// | 429 | [`CorvidError::RateLimited`] |
/// | 500, 502, 503, 504, 529 | [`CorvidError::TransientProvider`] |
/// | 400, 413 mentioning prompt length | [`CorvidError::InvalidContext`] |
/// | anything else | [`CorvidError::Provider`] |
pub fn classify_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> CorvidError {
    let detail = serde_json::from_str::<ApiErrorResponse>(body).ok();
    let message = match &detail {
        Some(api) => format!(
            "Anthropic API error {status} ({}): {}",
            api.error.type_, api.error.message
        ),
        None => format!("API returned {status}: {body}"),
    };

    match status.as_u16() {
        429 => CorvidError::RateLimited {
            message,
            retry_after,
        },
        500 | 502 | 503 | 504 | 529 => CorvidError::TransientProvider {
            message,
            source: None,
        },
        400 | 413 if mentions_prompt_length(body) => CorvidError::InvalidContext(message),
        _ => CorvidError::Provider {
            message,
            source: None,
        },
    }
}

fn mentions_prompt_length(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["prompt is too long", "too many tokens", "context length", "context window"]
        .iter()
        .any(|needle| lower.contains(needle))
}
