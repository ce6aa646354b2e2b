// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound WhatsApp events.
//!
//! The bridge sidecar posts every received message to `POST /inbound`.
//! Messages from allowed contacts become a user message plus a pending job;
//! everything else is acknowledged and dropped.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
};
use corvid_config::model::WhatsAppConfig;
use corvid_core::types::{ConversationId, JobId, MessageId};
use corvid_core::{Channel, ConversationStore, CorvidError};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const BROADCAST_JID: &str = "status@broadcast";

/// A message event as delivered by the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    /// Chat JID, e.g. `15551234567@s.whatsapp.net`.
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub text: Option<String>,
    /// Display name the sender set in WhatsApp.
    #[serde(default)]
    pub push_name: Option<String>,
}

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Broadcast,
    FromMe,
    EmptyText,
    NotAllowed,
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    Queued {
        conversation_id: ConversationId,
        message_id: MessageId,
        job_id: JobId,
    },
    Ignored(IgnoreReason),
}

/// Turns inbound events into conversation messages and jobs.
pub struct Ingress {
    conversations: Arc<dyn ConversationStore>,
    allowed_senders: HashSet<String>,
    worker: Option<Arc<Notify>>,
}

impl Ingress {
    pub fn new(conversations: Arc<dyn ConversationStore>, config: &WhatsAppConfig) -> Self {
        Self {
            conversations,
            allowed_senders: config
                .allowed_senders
                .iter()
                .map(|p| normalize_phone(p))
                .collect(),
            worker: None,
        }
    }

    /// Wakes an in-process worker whenever a job is queued.
    pub fn with_worker_notify(mut self, notify: Arc<Notify>) -> Self {
        self.worker = Some(notify);
        self
    }

    pub async fn handle_inbound(&self, event: InboundEvent) -> Result<IngressOutcome, CorvidError> {
        if event.remote_jid == BROADCAST_JID {
            return Ok(IngressOutcome::Ignored(IgnoreReason::Broadcast));
        }
        if event.from_me {
            return Ok(IngressOutcome::Ignored(IgnoreReason::FromMe));
        }
        let Some(text) = event.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(IngressOutcome::Ignored(IgnoreReason::EmptyText));
        };

        let phone = phone_from_jid(&event.remote_jid);
        let contact = match self.conversations.get_contact_by_phone(&phone).await? {
            Some(contact) => contact,
            None => {
                let name = event.push_name.as_deref().unwrap_or(&phone);
                let allowed = self.allowed_senders.contains(&phone);
                info!(phone = phone.as_str(), allowed, "new WhatsApp contact");
                self.conversations
                    .create_contact(&phone, name, allowed)
                    .await?
            }
        };

        if !contact.is_allowed {
            info!(phone = phone.as_str(), "ignoring message from non-allowed contact");
            return Ok(IngressOutcome::Ignored(IgnoreReason::NotAllowed));
        }

        let conversation_id = self
            .conversations
            .get_or_create_conversation(&contact.id, Channel::WhatsApp)
            .await?;
        let (message_id, job_id) = self
            .conversations
            .submit_user_message(&conversation_id, text, Channel::WhatsApp)
            .await?;
        info!(
            phone = phone.as_str(),
            conversation_id = %conversation_id,
            job_id = %job_id,
            "queued inbound message"
        );

        if let Some(notify) = &self.worker {
            notify.notify_one();
        }

        Ok(IngressOutcome::Queued {
            conversation_id,
            message_id,
            job_id,
        })
    }
}

/// `15551234567:12@s.whatsapp.net` → `15551234567`.
pub fn phone_from_jid(jid: &str) -> String {
    let user = jid.split('@').next().unwrap_or(jid);
    let user = user.split(':').next().unwrap_or(user);
    normalize_phone(user)
}

fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

// --- HTTP ---

#[derive(Clone)]
struct IngressState {
    ingress: Arc<Ingress>,
    token: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
struct InboundResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<IgnoreReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Builds the webhook router. With a token, requests must carry
/// `Authorization: Bearer <token>`.
pub fn router(ingress: Arc<Ingress>, token: Option<String>) -> Router {
    let state = IngressState {
        ingress,
        token: token.filter(|t| !t.is_empty()).map(Arc::from),
    };
    Router::new()
        .route("/inbound", post(post_inbound))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

/// Serves the webhook on `bind` until `cancel` fires.
pub async fn serve(
    ingress: Arc<Ingress>,
    bind: &str,
    token: Option<String>,
    cancel: CancellationToken,
) -> Result<(), CorvidError> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| CorvidError::Channel {
            message: format!("failed to bind inbound webhook to {bind}: {e}"),
            source: Some(Box::new(e)),
        })?;
    info!(bind, "inbound webhook listening");

    axum::serve(listener, router(ingress, token))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| CorvidError::Channel {
            message: format!("inbound webhook error: {e}"),
            source: Some(Box::new(e)),
        })
}

async fn require_token(
    State(state): State<IngressState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(next.run(request).await);
    };
    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        debug!("rejected inbound request with missing or wrong token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn post_inbound(
    State(state): State<IngressState>,
    Json(event): Json<InboundEvent>,
) -> Response {
    match state.ingress.handle_inbound(event).await {
        Ok(IngressOutcome::Queued { job_id, .. }) => (
            StatusCode::ACCEPTED,
            Json(InboundResponse {
                status: "queued",
                reason: None,
                job_id: Some(job_id.to_string()),
            }),
        )
            .into_response(),
        Ok(IngressOutcome::Ignored(reason)) => (
            StatusCode::OK,
            Json(InboundResponse {
                status: "ignored",
                reason: Some(reason),
                job_id: None,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to handle inbound message");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to queue message".to_string(),
                }),
            )
                .into_response()
        }
    }
}
