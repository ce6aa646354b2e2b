// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `send_message`: queues a WhatsApp text to an arbitrary phone number.
//!
//! High risk: every call is held for operator approval when wrapped by the
//! approval gate.

use std::sync::Arc;

use async_trait::async_trait;
use corvid_core::types::NewOutbound;
use corvid_core::{Channel, CorvidError, OutboxStore};

use crate::tool::{Tool, ToolOutput, ToolRisk};

pub struct SendMessage {
    outbox: Arc<dyn OutboxStore>,
    account_id: String,
}

impl SendMessage {
    pub fn new(outbox: Arc<dyn OutboxStore>, account_id: impl Into<String>) -> Self {
        Self {
            outbox,
            account_id: account_id.into(),
        }
    }
}

/// Keeps the digits of a phone number.
fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

#[async_trait]
impl Tool for SendMessage {
    fn name(&self) -> &str {
        super::SEND_MESSAGE
    }

    fn description(&self) -> &str {
        "Send a WhatsApp text message to a phone number"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Recipient phone number in international format (e.g. +5511999999999)"
                },
                "text": { "type": "string", "description": "Message body" }
            },
            "required": ["to", "text"]
        })
    }

    fn risk(&self) -> ToolRisk {
        ToolRisk::High
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
        let phone = input["to"].as_str().map(normalize_phone).unwrap_or_default();
        let text = input["text"].as_str().unwrap_or_default().trim();
        if phone.is_empty() {
            return Ok(ToolOutput::error("Missing or invalid recipient phone number"));
        }
        if text.is_empty() {
            return Ok(ToolOutput::error("Message text must not be empty"));
        }

        let id = self
            .outbox
            .enqueue_outbound(&NewOutbound {
                channel: Channel::WhatsApp,
                account_id: self.account_id.clone(),
                conversation_id: None,
                to: Some(phone.clone()),
                content: text.to_string(),
            })
            .await?;
        tracing::info!(outbound_id = %id, to = phone.as_str(), "message queued by tool");

        Ok(ToolOutput::text(format!("Message queued for {phone}.")))
    }
}
