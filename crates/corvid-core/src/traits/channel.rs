// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messaging session trait for the external network connector.

use async_trait::async_trait;

use crate::error::CorvidError;
use crate::traits::adapter::PluginAdapter;

/// One authenticated session to a messaging network for a single account.
#[async_trait]
pub trait MessagingSession: PluginAdapter {
    /// Sends a plain text message to `recipient` (a phone number).
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), CorvidError>;
}
