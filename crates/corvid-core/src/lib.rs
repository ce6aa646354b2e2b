// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Corvid agent runtime.
//!
//! This crate provides the error taxonomy, domain types, and the traits
//! through which the runtime talks to its collaborators: persistence, the
//! model provider, and the messaging session.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{CorvidError, FailureReason};
pub use types::{AdapterType, Channel, HealthStatus, Role, ToolPolicy, Turn};

pub use traits::{
    ApprovalStore, ConversationStore, JobStore, LeaseStore, MemoryStore, MessagingSession,
    OutboxStore, PluginAdapter, ProviderAdapter, ProviderStream, ScheduleStore, StorageAdapter,
};

/// Truncates `s` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
