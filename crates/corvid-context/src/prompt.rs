// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! System prompt resolution.
//!
//! A conversation's agent profile supplies its own prompt; otherwise the
//! process-wide prompt loaded from configuration applies.

use corvid_config::model::AgentConfig;
use corvid_core::types::AgentProfile;
use tracing::{info, warn};

/// The process-wide default system prompt.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    default_prompt: String,
}

impl SystemPrompt {
    /// Loads the default prompt from configuration.
    ///
    /// # Priority
    /// 1. `config.system_prompt_file` -- reads from disk
    /// 2. `config.system_prompt` -- inline string
    /// 3. Default: "You are {name}, a concise personal assistant."
    pub async fn load(config: &AgentConfig) -> Self {
        Self {
            default_prompt: load_system_prompt(config).await,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            default_prompt: text.into(),
        }
    }

    /// The prompt for a conversation, preferring a non-empty agent prompt.
    pub fn for_agent(&self, agent: Option<&AgentProfile>) -> String {
        match agent {
            Some(agent) if !agent.system_prompt.trim().is_empty() => agent.system_prompt.clone(),
            _ => self.default_prompt.clone(),
        }
    }

    pub fn default_prompt(&self) -> &str {
        &self.default_prompt
    }
}

/// Loads the system prompt following config priority: file > inline > default.
async fn load_system_prompt(config: &AgentConfig) -> String {
    if let Some(ref file_path) = config.system_prompt_file {
        match tokio::fs::read_to_string(file_path).await {
            Ok(content) => {
                let trimmed = content.trim().to_string();
                if !trimmed.is_empty() {
                    info!(path = file_path.as_str(), "loaded system prompt from file");
                    return trimmed;
                }
            }
            Err(e) => {
                warn!(
                    path = file_path.as_str(),
                    error = %e,
                    "failed to read system prompt file, falling back"
                );
            }
        }
    }

    if let Some(ref prompt) = config.system_prompt
        && !prompt.is_empty()
    {
        return prompt.clone();
    }

    format!("You are {}, a concise personal assistant.", config.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_prompt_names_the_agent() {
        let prompt = SystemPrompt::load(&AgentConfig::default()).await;
        assert!(prompt.default_prompt().contains("corvid"));
        assert!(prompt.default_prompt().contains("concise personal assistant"));
    }

    #[tokio::test]
    async fn file_beats_inline() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("prompt.md");
        std::fs::write(&file_path, "  File-based prompt.\n").unwrap();

        let config = AgentConfig {
            system_prompt: Some("Inline.".into()),
            system_prompt_file: Some(file_path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let prompt = SystemPrompt::load(&config).await;
        assert_eq!(prompt.default_prompt(), "File-based prompt.");
    }

    #[tokio::test]
    async fn unreadable_file_falls_back_to_inline() {
        let config = AgentConfig {
            system_prompt: Some("Inline.".into()),
            system_prompt_file: Some("/nonexistent/corvid/prompt.md".into()),
            ..Default::default()
        };
        let prompt = SystemPrompt::load(&config).await;
        assert_eq!(prompt.default_prompt(), "Inline.");
    }

    #[test]
    fn agent_prompt_overrides_default() {
        let prompt = SystemPrompt::from_text("Default.");
        let mut agent = AgentProfile {
            id: "a".into(),
            name: "A".into(),
            system_prompt: "Agent prompt.".into(),
            model: None,
            fallback_model: None,
            tool_policy: None,
        };
        assert_eq!(prompt.for_agent(Some(&agent)), "Agent prompt.");
        agent.system_prompt = "   ".into();
        assert_eq!(prompt.for_agent(Some(&agent)), "Default.");
        assert_eq!(prompt.for_agent(None), "Default.");
    }
}
