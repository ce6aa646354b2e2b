// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool trait and registry.
//!
//! The [`Tool`] trait is the interface every callable tool implements. The
//! [`ToolRegistry`] validates names at registration, looks tools up for the
//! turn runner, and produces the tool definitions sent to the provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use corvid_core::CorvidError;
use corvid_core::types::ToolDefinition;
use serde::{Deserialize, Serialize};

/// Maximum tool name length accepted by the provider.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Output from a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The content returned by the tool (text output, JSON, etc.).
    pub content: String,
    /// Whether the tool invocation resulted in an error.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// How much damage a tool call can do without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToolRisk {
    #[default]
    Low,
    /// Invocations are held for operator approval.
    High,
}

/// Unified trait for all tools.
///
/// The turn runner calls `invoke` with the parsed JSON input from the
/// model's `tool_use` content block.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's unique name (used for lookup and API serialization).
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON Schema describing the tool's input parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    fn risk(&self) -> ToolRisk {
        ToolRisk::Low
    }

    /// Invokes the tool with the given JSON input and returns the output.
    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError>;
}

/// Checks a tool name against the provider's naming rules.
pub fn validate_tool_name(name: &str) -> Result<(), CorvidError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CorvidError::Config(format!(
            "invalid tool name `{name}`: expected 1-{MAX_TOOL_NAME_LEN} characters of [a-zA-Z0-9_-]"
        )))
    }
}

/// Registry of available tools, indexed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates an empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its `name()`.
    ///
    /// Fails on an invalid name or a name that is already registered.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), CorvidError> {
        let name = tool.name().to_string();
        validate_tool_name(&name)?;
        if self.tools.contains_key(&name) {
            return Err(CorvidError::Config(format!(
                "tool `{name}` is already registered"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Inserts or replaces a tool whose name was already validated.
    pub(crate) fn replace(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tools in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Registered tool names in order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Tool definitions for the provider request, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }

    /// Invokes a tool by name.
    ///
    /// Unknown tools and tool errors come back as error outputs so the model
    /// can see and react to them.
    pub async fn dispatch(&self, name: &str, input: serde_json::Value) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            return ToolOutput::error(format!("Unknown tool: {name}"));
        };
        match tool.invoke(input).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool invocation failed");
                ToolOutput::error(e.to_string())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
