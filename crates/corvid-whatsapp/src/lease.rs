// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exclusive, heartbeat-renewed ownership of one messaging account.
//!
//! Only the process holding the lease may keep the account's session open
//! and drain its outbox. Leases expire on their own, so a crashed owner is
//! replaced once its TTL passes.

use std::sync::Arc;
use std::time::Duration;

use corvid_config::model::WhatsAppConfig;
use corvid_core::types::{ChannelLease, LeaseAcquisition};
use corvid_core::{CorvidError, LeaseStore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Acquires, renews and releases the lease for one account.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    account_id: String,
    owner_id: String,
    ttl: Duration,
    acquire_retry: Duration,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        account_id: impl Into<String>,
        owner_id: impl Into<String>,
        ttl: Duration,
        acquire_retry: Duration,
    ) -> Self {
        Self {
            store,
            account_id: account_id.into(),
            owner_id: owner_id.into(),
            ttl,
            acquire_retry,
        }
    }

    pub fn from_config(store: Arc<dyn LeaseStore>, config: &WhatsAppConfig) -> Self {
        Self::new(
            store,
            config.account_id.clone(),
            config.resolved_worker_id(),
            config.lease_ttl(),
            config.acquire_retry(),
        )
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// One acquisition attempt.
    pub async fn acquire(&self) -> Result<LeaseAcquisition, CorvidError> {
        self.store
            .acquire_lease(&self.account_id, &self.owner_id, self.ttl)
            .await
    }

    /// Retries acquisition until it succeeds or `cancel` fires.
    ///
    /// Store errors are logged and retried like a held lease.
    pub async fn acquire_blocking(&self, cancel: &CancellationToken) -> Option<ChannelLease> {
        loop {
            match self.acquire().await {
                Ok(LeaseAcquisition::Acquired(lease)) => {
                    info!(
                        account_id = self.account_id.as_str(),
                        owner_id = self.owner_id.as_str(),
                        "lease acquired"
                    );
                    return Some(lease);
                }
                Ok(LeaseAcquisition::Held {
                    owner_id,
                    expires_at,
                }) => {
                    info!(
                        account_id = self.account_id.as_str(),
                        holder = owner_id.as_str(),
                        expires_at,
                        "lease held by another worker, retrying"
                    );
                }
                Err(e) => {
                    warn!(
                        account_id = self.account_id.as_str(),
                        error = %e,
                        "lease acquisition failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(account_id = self.account_id.as_str(), "lease acquisition cancelled");
                    return None;
                }
                _ = tokio::time::sleep(self.acquire_retry) => {}
            }
        }
    }

    /// Extends the lease. `false` means another owner has taken over.
    pub async fn heartbeat(&self) -> Result<bool, CorvidError> {
        self.store
            .heartbeat_lease(&self.account_id, &self.owner_id, self.ttl)
            .await
    }

    /// Gives the lease up if this owner still holds it.
    pub async fn release(&self) -> Result<bool, CorvidError> {
        let released = self
            .store
            .release_lease(&self.account_id, &self.owner_id)
            .await?;
        if released {
            info!(
                account_id = self.account_id.as_str(),
                owner_id = self.owner_id.as_str(),
                "lease released"
            );
        }
        Ok(released)
    }

    /// Heartbeats every `interval` until `cancel` fires or ownership is lost.
    ///
    /// The returned ownership token is a child of `cancel` and is also
    /// cancelled when a heartbeat reports the lease was taken over.
    pub fn spawn_heartbeat(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, CancellationToken) {
        let ownership = cancel.child_token();
        let token = ownership.clone();
        let manager = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the lease was just acquired.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match manager.heartbeat().await {
                    Ok(true) => debug!(account_id = manager.account_id.as_str(), "lease renewed"),
                    Ok(false) => {
                        error!(
                            account_id = manager.account_id.as_str(),
                            owner_id = manager.owner_id.as_str(),
                            "lease heartbeat lost ownership"
                        );
                        token.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!(
                            account_id = manager.account_id.as_str(),
                            error = %e,
                            "lease heartbeat failed, retrying next tick"
                        );
                    }
                }
            }
        });

        (handle, ownership)
    }
}
