// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compaction: summarizes older conversation history via an LLM call
//! to keep the context window within budget.

use corvid_core::types::{ProviderMessage, ProviderRequest};
use corvid_core::{CorvidError, ProviderAdapter, Role, Turn};

/// System prompt for the compaction summarization LLM call.
const COMPACTION_PROMPT: &str = r#"You are a conversation summarizer. Your job is to create a concise summary of the conversation below.

PRESERVE the following in your summary:
- User preferences and settings
- Names, identifiers, and references to people/things
- Commitments made by either party
- Key decisions and their rationale
- Action items and their status
- Any facts the user has shared about themselves

OMIT:
- Greetings and small talk
- Redundant back-and-forth
- Failed attempts that were corrected

Format: Write a clear, third-person narrative summary in 1-3 short paragraphs."#;

/// Renders turns as `role: content` lines for the summarizer.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Asks the provider for a summary of `turns`.
///
/// Returns the trimmed summary text, which may be empty.
pub async fn generate_compaction_summary(
    provider: &dyn ProviderAdapter,
    turns: &[Turn],
    model: &str,
    max_tokens: u32,
) -> Result<String, CorvidError> {
    let request = ProviderRequest {
        model: model.to_string(),
        system_prompt: Some(COMPACTION_PROMPT.to_string()),
        messages: vec![ProviderMessage::text(
            Role::User,
            format!("Summarize this conversation:\n\n{}", render_transcript(turns)),
        )],
        tools: Vec::new(),
        max_tokens,
    };

    let response = provider.complete(request).await?;

    tracing::info!(
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        model = model,
        original_turns = turns.len(),
        "compaction summary generated"
    );

    Ok(response.text().trim().to_string())
}

/// The system turn that replaces the compacted prefix.
///
/// Carries only the summary text. The persisted copy is tagged through
/// message metadata.
pub fn summary_turn(summary: &str) -> Turn {
    Turn::system(summary)
}
