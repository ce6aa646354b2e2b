// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversations, messages, contacts, agents and skills.

use std::str::FromStr;

use corvid_core::types::{
    AgentProfile, Contact, ContactId, Conversation, ConversationContext, ConversationId, JobId,
    MessageId, MessageStatus, Skill, StoredMessage, ToolPolicy,
};
use corvid_core::{Channel, CorvidError, Role, truncate_chars};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use crate::database::{Database, map_tr_err};
use crate::queries::jobs::insert_job;

/// Characters of the first user message used as the conversation title.
const TITLE_CHARS: usize = 50;

pub(crate) fn parse_channel(s: &str) -> rusqlite::Result<Channel> {
    Channel::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json(raw: Option<String>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn parse_policy(raw: Option<String>) -> Option<ToolPolicy> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let channel: String = row.get(1)?;
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        channel: parse_channel(&channel)?,
        contact_id: row.get::<_, Option<String>>(2)?.map(ContactId),
        agent_id: row.get(3)?,
        title: row.get(4)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let channel: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(StoredMessage {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        role: Role::from_str(&role).unwrap_or(Role::User),
        content: row.get(3)?,
        channel: parse_channel(&channel)?,
        status: MessageStatus::from_str(&status).unwrap_or(MessageStatus::Sent),
        tool_calls: parse_json(row.get(6)?),
        metadata: parse_json(row.get(7)?),
        created_at: row.get(8)?,
    })
}

fn row_to_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: ContactId(row.get(0)?),
        phone: row.get(1)?,
        name: row.get(2)?,
        is_allowed: row.get(3)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_message(
    conn: &rusqlite::Connection,
    conversation_id: &str,
    role: Role,
    content: &str,
    channel: Channel,
    status: MessageStatus,
    tool_calls: Option<&Value>,
    metadata: Option<&Value>,
) -> rusqlite::Result<MessageId> {
    let id = MessageId::generate();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content, channel, status, tool_calls, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.as_str(),
            conversation_id,
            role.to_string(),
            content,
            channel.to_string(),
            status.to_string(),
            tool_calls.map(Value::to_string),
            metadata.map(Value::to_string),
        ],
    )?;
    conn.execute(
        "UPDATE conversations SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
        params![conversation_id],
    )?;
    Ok(id)
}

/// Load a conversation with its contact, agent, enabled skills and messages.
pub async fn get_conversation_context(
    db: &Database,
    id: &ConversationId,
) -> Result<Option<ConversationContext>, CorvidError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ConversationContext>, rusqlite::Error> {
            let conversation = conn
                .query_row(
                    "SELECT id, channel, contact_id, agent_id, title FROM conversations WHERE id = ?1",
                    params![id],
                    row_to_conversation,
                )
                .optional()?;
            let Some(conversation) = conversation else {
                return Ok(None);
            };

            let contact = match &conversation.contact_id {
                Some(contact_id) => conn
                    .query_row(
                        "SELECT id, phone, name, is_allowed FROM contacts WHERE id = ?1",
                        params![contact_id.as_str()],
                        row_to_contact,
                    )
                    .optional()?,
                None => None,
            };

            let agent = match &conversation.agent_id {
                Some(agent_id) => conn
                    .query_row(
                        "SELECT id, name, system_prompt, model, fallback_model, tool_policy
                         FROM agents WHERE id = ?1",
                        params![agent_id],
                        |row| {
                            Ok(AgentProfile {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                system_prompt: row.get(2)?,
                                model: row.get(3)?,
                                fallback_model: row.get(4)?,
                                tool_policy: parse_policy(row.get(5)?),
                            })
                        },
                    )
                    .optional()?,
                None => None,
            };

            let skills = {
                let mut stmt = conn.prepare(
                    "SELECT id, name, enabled, tool_policy FROM skills
                     WHERE enabled = 1 ORDER BY rowid ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(Skill {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        enabled: row.get(2)?,
                        tool_policy: parse_policy(row.get(3)?),
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let messages = {
                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, channel, status, tool_calls,
                            metadata, created_at
                     FROM messages WHERE conversation_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )?;
                let rows = stmt.query_map(params![id], row_to_message)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            Ok(Some(ConversationContext {
                conversation,
                contact,
                agent,
                skills,
                messages,
            }))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn create_conversation(
    db: &Database,
    channel: Channel,
    contact_id: Option<&ContactId>,
    agent_id: Option<&str>,
) -> Result<ConversationId, CorvidError> {
    let id = ConversationId::generate();
    let row_id = id.to_string();
    let contact_id = contact_id.map(ToString::to_string);
    let agent_id = agent_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations (id, channel, contact_id, agent_id) VALUES (?1, ?2, ?3, ?4)",
                params![row_id, channel.to_string(), contact_id, agent_id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(id)
}

/// Most recently active conversation for a contact on a channel, created on first contact.
pub async fn get_or_create_conversation(
    db: &Database,
    contact_id: &ContactId,
    channel: Channel,
) -> Result<ConversationId, CorvidError> {
    let contact_id = contact_id.to_string();
    db.connection()
        .call(move |conn| -> Result<ConversationId, rusqlite::Error> {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM conversations WHERE contact_id = ?1 AND channel = ?2
                     ORDER BY updated_at DESC, rowid DESC LIMIT 1",
                    params![contact_id, channel.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let id = match existing {
                Some(id) => ConversationId(id),
                None => {
                    let id = ConversationId::generate();
                    tx.execute(
                        "INSERT INTO conversations (id, channel, contact_id) VALUES (?1, ?2, ?3)",
                        params![id.as_str(), channel.to_string(), contact_id],
                    )?;
                    id
                }
            };
            tx.commit()?;
            Ok(id)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_contact_by_phone(
    db: &Database,
    phone: &str,
) -> Result<Option<Contact>, CorvidError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, phone, name, is_allowed FROM contacts WHERE phone = ?1",
                params![phone],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a contact, or return the existing one for the same phone.
pub async fn create_contact(
    db: &Database,
    phone: &str,
    name: &str,
    is_allowed: bool,
) -> Result<Contact, CorvidError> {
    let phone = phone.to_string();
    let name = name.to_string();
    db.connection()
        .call(move |conn| -> Result<Contact, rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO contacts (id, phone, name, is_allowed) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(phone) DO NOTHING",
                params![ContactId::generate().as_str(), phone, name, is_allowed],
            )?;
            let contact = tx.query_row(
                "SELECT id, phone, name, is_allowed FROM contacts WHERE phone = ?1",
                params![phone],
                row_to_contact,
            )?;
            tx.commit()?;
            Ok(contact)
        })
        .await
        .map_err(map_tr_err)
}

/// Store a user message and enqueue its job atomically.
pub async fn submit_user_message(
    db: &Database,
    conversation_id: &ConversationId,
    content: &str,
    channel: Channel,
) -> Result<(MessageId, JobId), CorvidError> {
    let conversation_id = conversation_id.clone();
    let content = content.to_string();
    db.connection()
        .call(move |conn| -> Result<(MessageId, JobId), rusqlite::Error> {
            let tx = conn.transaction()?;
            let message_id = insert_message(
                &tx,
                conversation_id.as_str(),
                Role::User,
                &content,
                channel,
                MessageStatus::Sent,
                None,
                None,
            )?;
            tx.execute(
                "UPDATE conversations SET title = ?2 WHERE id = ?1 AND title IS NULL",
                params![conversation_id.as_str(), truncate_chars(&content, TITLE_CHARS)],
            )?;
            let job_id = JobId::generate();
            insert_job(&tx, &job_id, &conversation_id, &message_id)?;
            tx.commit()?;
            Ok((message_id, job_id))
        })
        .await
        .map_err(map_tr_err)
}

pub async fn add_assistant_message(
    db: &Database,
    conversation_id: &ConversationId,
    content: &str,
    channel: Channel,
    tool_calls: Option<Value>,
) -> Result<MessageId, CorvidError> {
    let conversation_id = conversation_id.to_string();
    let content = content.to_string();
    db.connection()
        .call(move |conn| {
            insert_message(
                conn,
                &conversation_id,
                Role::Assistant,
                &content,
                channel,
                MessageStatus::Sent,
                tool_calls.as_ref(),
                None,
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Persist a compaction summary as a system message tagged with its origin.
pub async fn add_summary_message(
    db: &Database,
    conversation_id: &ConversationId,
    content: &str,
    channel: Channel,
    original_count: usize,
) -> Result<MessageId, CorvidError> {
    let conversation_id = conversation_id.to_string();
    let content = content.to_string();
    let metadata = serde_json::json!({
        "type": "compaction_summary",
        "original_count": original_count,
    });
    db.connection()
        .call(move |conn| {
            insert_message(
                conn,
                &conversation_id,
                Role::System,
                &content,
                channel,
                MessageStatus::Sent,
                None,
                Some(&metadata),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn create_placeholder(
    db: &Database,
    conversation_id: &ConversationId,
    channel: Channel,
) -> Result<MessageId, CorvidError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            insert_message(
                conn,
                &conversation_id,
                Role::Assistant,
                "",
                channel,
                MessageStatus::Streaming,
                None,
                None,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_streaming_content(
    db: &Database,
    message_id: &MessageId,
    content: &str,
) -> Result<(), CorvidError> {
    let message_id = message_id.to_string();
    let content = content.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET content = ?2,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'streaming'",
                params![message_id, content],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn finalize_message(
    db: &Database,
    message_id: &MessageId,
    content: &str,
    tool_calls: Option<Value>,
) -> Result<(), CorvidError> {
    let message_id = message_id.to_string();
    let content = content.to_string();
    let tool_calls = tool_calls.map(|v| v.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, tool_calls = ?3, status = 'sent',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![message_id, content, tool_calls],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn mark_message_failed(db: &Database, message_id: &MessageId) -> Result<(), CorvidError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET status = 'failed',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![message_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn save_agent(db: &Database, agent: &AgentProfile) -> Result<(), CorvidError> {
    let agent = agent.clone();
    let policy = agent
        .tool_policy
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CorvidError::Storage {
            source: Box::new(e),
        })?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO agents (id, name, system_prompt, model, fallback_model, tool_policy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                   system_prompt = excluded.system_prompt, model = excluded.model,
                   fallback_model = excluded.fallback_model, tool_policy = excluded.tool_policy",
                params![
                    agent.id,
                    agent.name,
                    agent.system_prompt,
                    agent.model,
                    agent.fallback_model,
                    policy,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn save_skill(db: &Database, skill: &Skill) -> Result<(), CorvidError> {
    let skill = skill.clone();
    let policy = skill
        .tool_policy
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CorvidError::Storage {
            source: Box::new(e),
        })?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO skills (id, name, enabled, tool_policy) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                   enabled = excluded.enabled, tool_policy = excluded.tool_policy",
                params![skill.id, skill.name, skill.enabled, policy],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
