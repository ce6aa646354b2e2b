// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memories with BM25 search over the `memories_fts` index.

use corvid_core::CorvidError;
use corvid_core::types::{ConversationId, Memory, MemoryId};
use rusqlite::{Row, params};

use crate::database::{Database, map_tr_err};

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: MemoryId(row.get(0)?),
        conversation_id: row.get::<_, Option<String>>(1)?.map(ConversationId),
        content: row.get(2)?,
        source: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Turns free text into an FTS5 query matching any of its words.
///
/// Every word is quoted so operators and punctuation in the input are taken
/// literally. Returns `None` when the text has no searchable words.
pub(crate) fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

pub async fn store_memory(
    db: &Database,
    conversation_id: Option<&ConversationId>,
    content: &str,
    source: &str,
) -> Result<MemoryId, CorvidError> {
    let id = MemoryId::generate();
    let row_id = id.to_string();
    let conversation_id = conversation_id.map(ToString::to_string);
    let content = content.to_string();
    let source = source.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO memories (id, conversation_id, content, source) VALUES (?1, ?2, ?3, ?4)",
                params![row_id, conversation_id, content, source],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

/// Best matches first. `conversation_id` limits the search to one conversation.
pub async fn search_memories(
    db: &Database,
    conversation_id: Option<&ConversationId>,
    query: &str,
    limit: usize,
) -> Result<Vec<Memory>, CorvidError> {
    let Some(expression) = match_expression(query) else {
        return Ok(Vec::new());
    };
    let conversation_id = conversation_id.map(ToString::to_string);
    db.connection()
        .call(move |conn| -> Result<Vec<Memory>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.content, m.source, m.created_at
                 FROM memories_fts JOIN memories m ON m.rowid = memories_fts.rowid
                 WHERE memories_fts MATCH ?1
                 AND (?2 IS NULL OR m.conversation_id = ?2)
                 ORDER BY bm25(memories_fts) LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![expression, conversation_id, limit as i64],
                row_to_memory,
            )?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
