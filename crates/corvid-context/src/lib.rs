// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context budgeting for Corvid conversations.
//!
//! [`ContextBudgeter::fit`] keeps a conversation history within a character
//! budget in two steps:
//! - **Compaction**: the history older than the protected tail is summarized
//!   by the provider and replaced with a single system turn.
//! - **Guard**: the oldest turns are dropped until the history fits, never
//!   removing the most recent turn.

pub mod budget;
pub mod compaction;
pub mod prompt;

use std::sync::Arc;

use corvid_config::model::ContextConfig;
use corvid_core::{ProviderAdapter, Turn};
use tracing::{debug, warn};

pub use budget::{estimate_size, truncate_to_budget};
pub use compaction::{generate_compaction_summary, summary_turn};
pub use prompt::SystemPrompt;

/// Result of fitting a history into a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetOutcome {
    /// The history to send to the provider.
    pub turns: Vec<Turn>,
    /// Content of the summary turn, when compaction produced one.
    pub summary: Option<String>,
    pub compacted: bool,
    /// Number of turns the summary replaced.
    pub summarized: usize,
    /// Number of turns dropped by the guard.
    pub truncated: usize,
}

impl BudgetOutcome {
    fn unchanged(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            summary: None,
            compacted: false,
            summarized: 0,
            truncated: 0,
        }
    }
}

/// Fits conversation histories into a character budget.
pub struct ContextBudgeter {
    provider: Arc<dyn ProviderAdapter>,
    model: String,
    keep_recent: usize,
    max_tokens: u32,
}

impl ContextBudgeter {
    /// Creates a budgeter that compacts with `compaction_model`, or
    /// `default_model` when none is configured.
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        config: &ContextConfig,
        default_model: &str,
    ) -> Self {
        Self {
            provider,
            model: config
                .compaction_model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            keep_recent: config.keep_recent,
            max_tokens: config.compaction_max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Fits `turns` into `budget` characters.
    ///
    /// Provider failures during compaction are logged and skipped; the guard
    /// still enforces the budget.
    pub async fn fit(&self, turns: Vec<Turn>, budget: usize) -> BudgetOutcome {
        let size = estimate_size(&turns);
        if size <= budget {
            return BudgetOutcome::unchanged(turns);
        }

        let mut outcome = BudgetOutcome::unchanged(turns);

        if outcome.turns.len() > 1 {
            let keep = self.keep_recent.clamp(1, outcome.turns.len() - 1);
            let split = outcome.turns.len() - keep;
            let older = &outcome.turns[..split];

            match generate_compaction_summary(
                self.provider.as_ref(),
                older,
                &self.model,
                self.max_tokens,
            )
            .await
            {
                Ok(summary) if !summary.is_empty() => {
                    let turn = summary_turn(&summary);
                    outcome.summary = Some(turn.content.clone());
                    outcome.summarized = split;
                    outcome.compacted = true;
                    outcome.turns.splice(..split, std::iter::once(turn));
                }
                Ok(_) => warn!(older = split, "compaction returned an empty summary, skipping"),
                Err(e) => warn!(error = %e, older = split, "compaction failed, skipping"),
            }
        }

        outcome.truncated = truncate_to_budget(&mut outcome.turns, budget);
        if outcome.truncated > 0 {
            debug!(
                dropped = outcome.truncated,
                remaining = outcome.turns.len(),
                "history truncated to budget"
            );
        }

        outcome
    }
}
