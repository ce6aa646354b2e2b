// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the WhatsApp bridge sidecar.
//!
//! The sidecar owns the actual WhatsApp Web connection. This process sends
//! through it with `POST {bridge_url}/send` and checks `GET {bridge_url}/health`.

use std::time::Duration;

use async_trait::async_trait;
use corvid_config::model::WhatsAppConfig;
use corvid_core::{AdapterType, CorvidError, HealthStatus, MessagingSession, PluginAdapter};
use serde::Serialize;
use tracing::debug;

const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: String,
    text: &'a str,
}

/// Messaging session backed by the bridge sidecar.
pub struct BridgeSession {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BridgeSession {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, CorvidError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CorvidError::Channel {
                message: format!("failed to build bridge HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, CorvidError> {
        let base_url = config.bridge_url.as_deref().ok_or_else(|| {
            CorvidError::Config("whatsapp.bridge_url is required to send messages".to_string())
        })?;
        Self::new(base_url, config.bridge_token.clone())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Accepts bare phones as well as full JIDs.
fn to_jid(recipient: &str) -> String {
    if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{recipient}{USER_JID_SUFFIX}")
    }
}

#[async_trait]
impl PluginAdapter for BridgeSession {
    fn name(&self) -> &str {
        "whatsapp-bridge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Messaging
    }

    async fn health_check(&self) -> Result<HealthStatus, CorvidError> {
        let url = format!("{}/health", self.base_url);
        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) if response.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(response) => Ok(HealthStatus::Degraded(format!(
                "bridge returned {}",
                response.status()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("bridge unreachable: {e}"))),
        }
    }

    async fn shutdown(&self) -> Result<(), CorvidError> {
        Ok(())
    }
}

#[async_trait]
impl MessagingSession for BridgeSession {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), CorvidError> {
        let url = format!("{}/send", self.base_url);
        let body = SendRequest {
            to: to_jid(recipient),
            text,
        };

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CorvidError::Delivery {
                message: format!("bridge request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CorvidError::Delivery {
                message: format!("bridge returned {status}: {}", detail.trim()),
                source: None,
            });
        }

        debug!(to = body.to.as_str(), "bridge accepted message");
        Ok(())
    }
}
