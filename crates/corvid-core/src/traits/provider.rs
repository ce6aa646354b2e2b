// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait for language model integrations.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::CorvidError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ProviderRequest, ProviderResponse, ProviderStreamEvent};

/// Boxed stream of provider events.
pub type ProviderStream =
    Pin<Box<dyn Stream<Item = Result<ProviderStreamEvent, CorvidError>> + Send>>;

/// Adapter for language model providers.
///
/// Implementations classify failures at the source: throttling becomes
/// [`CorvidError::RateLimited`], overload and network faults become
/// [`CorvidError::TransientProvider`], and rejected oversized prompts become
/// [`CorvidError::InvalidContext`].
#[async_trait]
pub trait ProviderAdapter: PluginAdapter {
    /// Sends a completion request and returns the full response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, CorvidError>;

    /// Sends a completion request and returns a stream of events.
    ///
    /// Tool calls are only emitted once their input is complete.
    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, CorvidError>;
}
