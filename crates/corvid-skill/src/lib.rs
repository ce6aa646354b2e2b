// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tools for the Corvid agent runtime.
//!
//! Provides the [`Tool`] trait and [`ToolRegistry`], the built-in tools, tool
//! policy resolution and the approval gate for high-risk tools.

pub mod approval;
pub mod builtin;
pub mod policy;
pub mod tool;

pub use approval::{ApprovalGate, ApprovalGatedTool, ApprovalScope};
pub use builtin::{bind_memory_tools, register_builtins};
pub use policy::{default_policy, filter_tools, merge_policies, resolve_policy};
pub use tool::{Tool, ToolOutput, ToolRegistry, ToolRisk};
