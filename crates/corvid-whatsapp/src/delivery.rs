// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound delivery loop.
//!
//! Drains the durable outbox of one leased account through the messaging
//! session. Delivery is at-least-once: a message whose processor lock
//! expires is claimed again.

use std::sync::Arc;
use std::time::Duration;

use corvid_config::model::WhatsAppConfig;
use corvid_core::types::OutboundId;
use corvid_core::{Channel, CorvidError, MessagingSession, OutboxStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sleep when the outbox is empty.
pub const IDLE_SLEEP: Duration = Duration::from_secs(1);
/// Sleep after a store error.
pub const ERROR_SLEEP: Duration = Duration::from_secs(2);

const MISSING_RECIPIENT: &str = "missing recipient";

/// What one delivery step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent(OutboundId),
    /// The send failed; the message is retried after the retry delay.
    Failed { id: OutboundId, attempt: u32 },
    /// The message can never be delivered and was failed without retry.
    Rejected(OutboundId),
}

/// Sends queued outbound messages for one account.
pub struct DeliveryLoop {
    outbox: Arc<dyn OutboxStore>,
    session: Arc<dyn MessagingSession>,
    account_id: String,
    processor_id: String,
    lock: Duration,
    retry_delay: Duration,
    idle_sleep: Duration,
    error_sleep: Duration,
}

impl DeliveryLoop {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        session: Arc<dyn MessagingSession>,
        config: &WhatsAppConfig,
        processor_id: impl Into<String>,
    ) -> Self {
        Self {
            outbox,
            session,
            account_id: config.account_id.clone(),
            processor_id: processor_id.into(),
            lock: config.outbound_lock(),
            retry_delay: config.retry_delay(),
            idle_sleep: IDLE_SLEEP,
            error_sleep: ERROR_SLEEP,
        }
    }

    /// Overrides the idle and error sleeps.
    pub fn with_sleeps(mut self, idle: Duration, error: Duration) -> Self {
        self.idle_sleep = idle;
        self.error_sleep = error;
        self
    }

    /// Delivers messages until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            account_id = self.account_id.as_str(),
            processor_id = self.processor_id.as_str(),
            "outbound delivery loop started"
        );

        while !cancel.is_cancelled() {
            let pause = match self.deliver_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.idle_sleep,
                Err(e) => {
                    error!(account_id = self.account_id.as_str(), error = %e, "outbound loop error");
                    self.error_sleep
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(account_id = self.account_id.as_str(), "outbound delivery loop stopped");
    }

    /// Claims and delivers at most one message.
    ///
    /// Returns `None` when nothing is deliverable. Send failures are recorded
    /// on the message; only store errors are returned.
    pub async fn deliver_next(&self) -> Result<Option<Delivery>, CorvidError> {
        let Some(message) = self
            .outbox
            .claim_next_outbound(
                Channel::WhatsApp,
                &self.account_id,
                &self.processor_id,
                self.lock,
            )
            .await?
        else {
            return Ok(None);
        };

        let Some(to) = message.to.as_deref().filter(|to| !to.trim().is_empty()) else {
            warn!(outbound_id = %message.id, "outbound message has no recipient");
            let settled = self
                .outbox
                .fail_outbound(&message.id, &self.processor_id, MISSING_RECIPIENT, None)
                .await?;
            self.warn_if_reclaimed(&message.id, settled);
            return Ok(Some(Delivery::Rejected(message.id)));
        };

        match self.session.send_text(to, &message.content).await {
            Ok(()) => {
                let settled = self
                    .outbox
                    .complete_outbound(&message.id, &self.processor_id)
                    .await?;
                self.warn_if_reclaimed(&message.id, settled);
                debug!(outbound_id = %message.id, to, "outbound message sent");
                Ok(Some(Delivery::Sent(message.id)))
            }
            Err(e) => {
                warn!(
                    outbound_id = %message.id,
                    attempt = message.attempt_count,
                    error = %e,
                    "outbound send failed"
                );
                let settled = self
                    .outbox
                    .fail_outbound(
                        &message.id,
                        &self.processor_id,
                        &e.to_string(),
                        Some(self.retry_delay),
                    )
                    .await?;
                self.warn_if_reclaimed(&message.id, settled);
                Ok(Some(Delivery::Failed {
                    id: message.id,
                    attempt: message.attempt_count,
                }))
            }
        }
    }

    /// The lock lapsed mid-send and another claim now owns the message.
    fn warn_if_reclaimed(&self, id: &OutboundId, settled: bool) {
        if !settled {
            warn!(
                outbound_id = %id,
                processor_id = self.processor_id.as_str(),
                "outbound claim lost before its outcome was recorded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::types::{NewOutbound, OutboundStatus};
    use corvid_storage::MAX_OUTBOUND_ATTEMPTS;
    use corvid_test_utils::TestHarness;

    async fn enqueue(harness: &TestHarness, to: Option<&str>, text: &str) -> OutboundId {
        harness
            .storage
            .enqueue_outbound(&NewOutbound {
                channel: Channel::WhatsApp,
                account_id: harness.config.whatsapp.account_id.clone(),
                conversation_id: None,
                to: to.map(str::to_string),
                content: text.to_string(),
            })
            .await
            .unwrap()
    }

    fn delivery(harness: &TestHarness) -> DeliveryLoop {
        DeliveryLoop::new(
            harness.storage.clone(),
            harness.mock_session.clone(),
            &harness.config.whatsapp,
            "test-worker",
        )
        .with_sleeps(Duration::from_millis(5), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn empty_outbox_yields_nothing() {
        let harness = TestHarness::new().await;
        assert_eq!(delivery(&harness).deliver_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sends_and_marks_sent() {
        let harness = TestHarness::new().await;
        let id = enqueue(&harness, Some("15551234567"), "hello").await;

        let result = delivery(&harness).deliver_next().await.unwrap();
        assert_eq!(result, Some(Delivery::Sent(id.clone())));

        let sent = harness.mock_session.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "15551234567");
        assert_eq!(sent[0].text, "hello");

        let stored = harness.storage.get_outbound(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboundStatus::Sent);
    }

    #[tokio::test]
    async fn missing_recipient_fails_without_retry() {
        let harness = TestHarness::new().await;
        let id = enqueue(&harness, None, "orphan").await;

        let result = delivery(&harness).deliver_next().await.unwrap();
        assert_eq!(result, Some(Delivery::Rejected(id.clone())));
        assert_eq!(harness.mock_session.attempts(), 0);

        let stored = harness.storage.get_outbound(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboundStatus::Failed);
        assert!(!stored.retry);
        assert_eq!(stored.last_error.as_deref(), Some(MISSING_RECIPIENT));
    }

    #[tokio::test]
    async fn failed_send_is_retried_after_delay() {
        let harness = TestHarness::new().await;
        let id = enqueue(&harness, Some("15550001111"), "retry me").await;
        harness.mock_session.fail_next(1);
        let delivery = delivery(&harness);

        let first = delivery.deliver_next().await.unwrap();
        assert!(matches!(first, Some(Delivery::Failed { attempt: 1, .. })));
        let stored = harness.storage.get_outbound(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboundStatus::Failed);
        assert!(stored.retry);

        // Not claimable until the retry delay passes.
        assert_eq!(delivery.deliver_next().await.unwrap(), None);
        tokio::time::sleep(harness.config.whatsapp.retry_delay() * 3).await;

        assert_eq!(
            delivery.deliver_next().await.unwrap(),
            Some(Delivery::Sent(id))
        );
        assert_eq!(harness.mock_session.sent().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_at_attempt_ceiling() {
        let harness = TestHarness::new().await;
        let id = enqueue(&harness, Some("15550002222"), "never").await;
        harness.mock_session.fail_always(true);
        let delivery = delivery(&harness);

        for _ in 0..MAX_OUTBOUND_ATTEMPTS {
            let result = loop {
                if let Some(result) = delivery.deliver_next().await.unwrap() {
                    break result;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            };
            assert!(matches!(result, Delivery::Failed { .. }));
        }

        tokio::time::sleep(harness.config.whatsapp.retry_delay() * 3).await;
        assert_eq!(delivery.deliver_next().await.unwrap(), None);
        let stored = harness.storage.get_outbound(&id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, MAX_OUTBOUND_ATTEMPTS);
        assert_eq!(stored.status, OutboundStatus::Failed);
    }

    #[tokio::test]
    async fn run_drains_until_cancelled() {
        let harness = TestHarness::new().await;
        enqueue(&harness, Some("1"), "one").await;
        enqueue(&harness, Some("2"), "two").await;

        let cancel = CancellationToken::new();
        let delivery = delivery(&harness);
        let session = harness.mock_session.clone();
        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                session.wait_for_attempts(2).await;
                cancel.cancel();
            })
        };

        tokio::time::timeout(Duration::from_secs(5), delivery.run(cancel))
            .await
            .unwrap();
        stopper.await.unwrap();

        let texts: Vec<_> = harness
            .mock_session
            .sent()
            .into_iter()
            .map(|s| s.text)
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
