// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic deletion of finished jobs.

use std::sync::Arc;
use std::time::Duration;

use corvid_config::model::RetentionConfig;
use corvid_core::types::PurgedJobs;
use corvid_core::{CorvidError, JobStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct RetentionSweeper {
    jobs: Arc<dyn JobStore>,
    max_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(jobs: Arc<dyn JobStore>, config: &RetentionConfig) -> Self {
        Self {
            jobs,
            max_age: config.job_max_age(),
            interval: config.sweep_interval(),
        }
    }

    /// Deletes completed and failed jobs past the retention age.
    pub async fn sweep_once(&self) -> Result<PurgedJobs, CorvidError> {
        let purged = self.jobs.purge_finished_jobs(self.max_age).await?;
        if purged.total() > 0 {
            info!(
                completed = purged.completed,
                failed = purged.failed,
                "purged finished jobs"
            );
        } else {
            debug!("no finished jobs past retention");
        }
        Ok(purged)
    }

    /// Sweeps immediately, then every interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            max_age_days = self.max_age.as_secs() / 86_400,
            interval_ms = self.interval.as_millis() as u64,
            "retention sweeper running"
        );
        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "retention sweep failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("retention sweeper stopped");
    }
}
