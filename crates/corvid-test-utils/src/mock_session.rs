// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock messaging session for deterministic testing.
//!
//! `MockSession` implements `MessagingSession`, capturing every successful
//! send and failing on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use corvid_core::{AdapterType, CorvidError, HealthStatus, MessagingSession, PluginAdapter};

/// A captured outbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub recipient: String,
    pub text: String,
}

/// A mock messaging session for testing.
#[derive(Default)]
pub struct MockSession {
    sent: Mutex<Vec<SentText>>,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    attempts: AtomicUsize,
    notify: Notify,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` sends fail with a delivery error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every send fails until turned off.
    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Messages that were delivered.
    pub fn sent(&self) -> Vec<SentText> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of send attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` send attempts have been made.
    pub async fn wait_for_attempts(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.attempts() >= count {
                return;
            }
            notified.await;
        }
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PluginAdapter for MockSession {
    fn name(&self) -> &str {
        "mock-session"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Messaging
    }

    async fn health_check(&self) -> Result<HealthStatus, CorvidError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CorvidError> {
        Ok(())
    }
}

#[async_trait]
impl MessagingSession for MockSession {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), CorvidError> {
        let result = if self.should_fail() {
            Err(CorvidError::Delivery {
                message: format!("mock send to {recipient} failed"),
                source: None,
            })
        } else {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(SentText {
                    recipient: recipient.to_string(),
                    text: text.to_string(),
                });
            Ok(())
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        result
    }
}
