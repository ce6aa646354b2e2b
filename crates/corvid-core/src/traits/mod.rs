// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for the collaborators the runtime is wired from.
//!
//! Adapters extend the [`PluginAdapter`] base trait and use `#[async_trait]`
//! so they can be shared as `Arc<dyn Trait>` and injected at startup.

pub mod adapter;
pub mod channel;
pub mod provider;
pub mod storage;

pub use adapter::PluginAdapter;
pub use channel::MessagingSession;
pub use provider::{ProviderAdapter, ProviderStream};
pub use storage::{
    ApprovalStore, ConversationStore, JobStore, LeaseStore, MemoryStore, OutboxStore,
    ScheduleStore, StorageAdapter,
};
