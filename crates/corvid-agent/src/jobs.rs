// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job lifecycle controller.
//!
//! Owns the `pending → processing → {completed | failed | pending}` state
//! machine on top of the atomic primitives of a [`JobStore`].

use std::sync::Arc;

use corvid_core::types::{Job, JobId, RetryOutcome};
use corvid_core::{CorvidError, FailureReason, JobStore, truncate_chars};
use tracing::{debug, info, warn};

/// Attempts after which a retryable job is failed for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Error messages recorded on failed jobs are cut to this many characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job is back in `pending`; `attempt` attempts have been recorded.
    Retried { attempt: u32 },
    /// The job is terminally `failed`.
    Failed { reason: FailureReason },
}

/// Claims, completes, fails and retries queued jobs.
#[derive(Clone)]
pub struct JobController {
    store: Arc<dyn JobStore>,
    max_attempts: u32,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pending jobs in arrival order.
    pub async fn pending(&self, limit: usize) -> Result<Vec<Job>, CorvidError> {
        self.store.list_pending_jobs(limit).await
    }

    /// Atomically moves a job to `processing`.
    ///
    /// `None` means another worker got there first or the job is no longer
    /// pending.
    pub async fn claim(&self, job_id: &JobId) -> Result<Option<Job>, CorvidError> {
        let claimed = self.store.claim_job(job_id).await?;
        match &claimed {
            Some(job) => debug!(job_id = %job_id, attempt = job.attempt_count, "job claimed"),
            None => debug!(job_id = %job_id, "job not claimed"),
        }
        Ok(claimed)
    }

    /// Marks a processing job completed. Completing twice is a no-op.
    pub async fn complete(
        &self,
        job_id: &JobId,
        model_used: Option<&str>,
    ) -> Result<(), CorvidError> {
        if self.store.complete_job(job_id, model_used).await? {
            info!(job_id = %job_id, model = model_used.unwrap_or("-"), "job completed");
        } else {
            debug!(job_id = %job_id, "job already completed");
        }
        Ok(())
    }

    /// Marks a job failed with a classified reason.
    pub async fn fail(
        &self,
        job_id: &JobId,
        reason: FailureReason,
        message: &str,
    ) -> Result<(), CorvidError> {
        let message = truncate_chars(message, MAX_ERROR_MESSAGE_CHARS);
        self.store.fail_job(job_id, reason, message).await?;
        warn!(job_id = %job_id, reason = %reason, error = message, "job failed");
        Ok(())
    }

    /// Records an attempt and requeues the job if attempts remain.
    ///
    /// Returns `false` once the ceiling is reached; the caller must then
    /// [`fail`](Self::fail) the job.
    pub async fn retry(&self, job_id: &JobId) -> Result<bool, CorvidError> {
        match self.store.retry_job(job_id, self.max_attempts).await? {
            RetryOutcome::Requeued { attempt_count } => {
                info!(job_id = %job_id, attempt = attempt_count, "job requeued");
                Ok(true)
            }
            RetryOutcome::Exhausted { attempt_count } => {
                warn!(job_id = %job_id, attempt = attempt_count, "job retries exhausted");
                Ok(false)
            }
        }
    }

    /// Routes a failed attempt to retry or terminal failure.
    pub async fn handle_failure(
        &self,
        job_id: &JobId,
        error: &CorvidError,
    ) -> Result<JobOutcome, CorvidError> {
        let reason = error.failure_reason();
        if reason.is_retryable() && self.retry(job_id).await? {
            let attempt = self
                .store
                .get_job(job_id)
                .await?
                .map(|job| job.attempt_count)
                .unwrap_or_default();
            return Ok(JobOutcome::Retried { attempt });
        }
        self.fail(job_id, reason, &error.to_string()).await?;
        Ok(JobOutcome::Failed { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::Channel;
    use corvid_core::types::JobStatus;
    use corvid_test_utils::TestHarness;

    fn transient() -> CorvidError {
        CorvidError::TransientProvider {
            message: "503 service unavailable".into(),
            source: None,
        }
    }

    async fn setup() -> (TestHarness, JobController, JobId) {
        let harness = TestHarness::new().await;
        let conversation = harness.web_conversation().await;
        let (_, job_id) = harness.submit(&conversation, "hello", Channel::Web).await;
        let controller = JobController::new(harness.storage.clone(), DEFAULT_MAX_ATTEMPTS);
        (harness, controller, job_id)
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let (_harness, controller, job_id) = setup().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = controller.clone();
            let job_id = job_id.clone();
            handles.push(tokio::spawn(async move { controller.claim(&job_id).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let (harness, controller, job_id) = setup().await;
        controller.claim(&job_id).await.unwrap().unwrap();
        controller.complete(&job_id, Some("m1")).await.unwrap();
        controller.complete(&job_id, Some("m2")).await.unwrap();

        let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.model_used.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn complete_from_pending_is_rejected() {
        let (_harness, controller, job_id) = setup().await;
        let err = controller.complete(&job_id, None).await.unwrap_err();
        assert!(matches!(err, CorvidError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn fail_truncates_long_messages() {
        let (harness, controller, job_id) = setup().await;
        controller.claim(&job_id).await.unwrap();
        let long = "é".repeat(800);
        controller
            .fail(&job_id, FailureReason::Unknown, &long)
            .await
            .unwrap();

        let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.unwrap().chars().count(),
            MAX_ERROR_MESSAGE_CHARS
        );
    }

    #[tokio::test]
    async fn transient_failures_retry_until_the_ceiling() {
        let (harness, controller, job_id) = setup().await;

        for expected in 1..=2 {
            controller.claim(&job_id).await.unwrap().unwrap();
            let outcome = controller.handle_failure(&job_id, &transient()).await.unwrap();
            assert_eq!(outcome, JobOutcome::Retried { attempt: expected });
            let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.attempt_count, expected);
            assert!(job.error_reason.is_none());
        }

        controller.claim(&job_id).await.unwrap().unwrap();
        let outcome = controller.handle_failure(&job_id, &transient()).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: FailureReason::Transient
            }
        );
        let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.error_reason, Some(FailureReason::Transient));

        // Never a fourth retry.
        assert!(controller.claim(&job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_errors_fail_immediately() {
        let (harness, controller, job_id) = setup().await;
        controller.claim(&job_id).await.unwrap();
        let outcome = controller
            .handle_failure(&job_id, &CorvidError::InvalidContext("missing".into()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: FailureReason::InvalidContext
            }
        );
        let job = harness.storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.attempt_count, 0);
        assert!(job.error_message.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn pending_lists_in_arrival_order() {
        let (harness, controller, first) = setup().await;
        let conversation = harness.web_conversation().await;
        let (_, second) = harness.submit(&conversation, "later", Channel::Web).await;

        let pending = controller.pending(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }
}
