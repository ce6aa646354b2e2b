// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Built-in tools available to every agent, subject to tool policy.

pub mod calculate;
pub mod current_time;
pub mod memory;
pub mod send_message;

use std::sync::Arc;

use corvid_core::{CorvidError, MemoryStore, OutboxStore};

pub use calculate::{Calculate, evaluate};
pub use current_time::CurrentTime;
pub use memory::{MemorySearch, MemoryStoreTool, bind_memory_tools};
pub use send_message::SendMessage;

use crate::tool::ToolRegistry;

pub const GET_CURRENT_TIME: &str = "get_current_time";
pub const CALCULATE: &str = "calculate";
pub const SEND_MESSAGE: &str = "send_message";
pub const MEMORY_SEARCH: &str = "memory_search";
pub const MEMORY_STORE: &str = "memory_store";

/// Registers all built-in tools. The memory tools start unscoped; see
/// [`bind_memory_tools`].
pub fn register_builtins(
    registry: &mut ToolRegistry,
    default_timezone: chrono_tz::Tz,
    outbox: Arc<dyn OutboxStore>,
    memory: Arc<dyn MemoryStore>,
    account_id: &str,
) -> Result<(), CorvidError> {
    registry.register(Arc::new(CurrentTime::new(default_timezone)))?;
    registry.register(Arc::new(Calculate))?;
    registry.register(Arc::new(SendMessage::new(outbox, account_id)))?;
    registry.register(Arc::new(MemorySearch::new(memory.clone())))?;
    registry.register(Arc::new(MemoryStoreTool::new(memory)))?;
    Ok(())
}
