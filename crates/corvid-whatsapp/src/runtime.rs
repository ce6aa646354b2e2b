// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp runtime: lease lifecycle around outbound delivery, plus the
//! inbound webhook.
//!
//! Egress only runs while this process owns the account lease. When a
//! heartbeat reports that ownership was lost, delivery stops and the runtime
//! goes back to waiting for the lease. Ingress does not need the lease and
//! serves for the whole life of the runtime.

use std::sync::Arc;
use std::time::Duration;

use corvid_config::model::WhatsAppConfig;
use corvid_core::CorvidError;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::delivery::DeliveryLoop;
use crate::ingress::{self, Ingress};
use crate::lease::LeaseManager;

struct IngressEndpoint {
    ingress: Arc<Ingress>,
    bind: String,
    token: Option<String>,
}

/// Runs the WhatsApp side of the process for one account.
pub struct WhatsAppRuntime {
    lease: LeaseManager,
    heartbeat: Duration,
    egress: Option<DeliveryLoop>,
    ingress: Option<IngressEndpoint>,
}

impl WhatsAppRuntime {
    pub fn new(lease: LeaseManager, config: &WhatsAppConfig) -> Self {
        Self {
            lease,
            heartbeat: config.heartbeat_interval(),
            egress: None,
            ingress: None,
        }
    }

    /// Delivers outbound messages while holding the lease.
    pub fn with_egress(mut self, delivery: DeliveryLoop) -> Self {
        self.egress = Some(delivery);
        self
    }

    /// Serves `POST /inbound` on `bind`.
    pub fn with_ingress(
        mut self,
        ingress: Arc<Ingress>,
        bind: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        self.ingress = Some(IngressEndpoint {
            ingress,
            bind: bind.into(),
            token,
        });
        self
    }

    /// Overrides the heartbeat interval taken from config.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Runs until `cancel` fires or the webhook fails.
    ///
    /// A held lease is released before returning.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), CorvidError> {
        let runtime = cancel.child_token();

        let ingress_task = self.ingress.map(|endpoint| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                let result = ingress::serve(
                    endpoint.ingress,
                    &endpoint.bind,
                    endpoint.token,
                    runtime.clone(),
                )
                .await;
                if let Err(e) = &result {
                    error!(error = %e, "inbound webhook stopped");
                    runtime.cancel();
                }
                result
            })
        });

        if let Some(delivery) = &self.egress {
            own_and_deliver(&self.lease, self.heartbeat, delivery, &runtime).await;
            if let Err(e) = self.lease.release().await {
                warn!(
                    account_id = self.lease.account_id(),
                    error = %e,
                    "failed to release lease"
                );
            }
        }

        match ingress_task {
            Some(task) => task
                .await
                .map_err(|e| CorvidError::Internal(format!("inbound webhook task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

/// Acquire, deliver until ownership ends, repeat until cancelled.
async fn own_and_deliver(
    lease: &LeaseManager,
    heartbeat: Duration,
    delivery: &DeliveryLoop,
    cancel: &CancellationToken,
) {
    loop {
        if lease.acquire_blocking(cancel).await.is_none() {
            return;
        }

        let (heartbeat_task, ownership) = lease.spawn_heartbeat(heartbeat, cancel.clone());
        delivery.run(ownership.clone()).await;
        ownership.cancel();
        if let Err(e) = heartbeat_task.await {
            error!(error = %e, "lease heartbeat task ended abnormally");
        }

        if cancel.is_cancelled() {
            return;
        }
        warn!(
            account_id = lease.account_id(),
            "lost lease ownership, waiting to reacquire"
        );
    }
}
