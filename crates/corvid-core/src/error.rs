// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Corvid agent runtime.
//!
//! [`CorvidError`] is a closed set of failure kinds. Each variant is built
//! once, where the failure originates, and handling sites pattern-match on
//! [`CorvidError::failure_reason`] instead of inspecting message strings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type used across all Corvid traits and core operations.
#[derive(Debug, Error)]
pub enum CorvidError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage { source: BoxError },

    /// Non-retryable model provider errors (bad request, auth, malformed response).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<BoxError>,
    },

    /// Provider failures expected to clear on their own (5xx, overload, network).
    #[error("transient provider error: {message}")]
    TransientProvider {
        message: String,
        source: Option<BoxError>,
    },

    /// The provider rejected the request because of rate limiting.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The assembled context was rejected as invalid or oversized.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// A tool invocation failed.
    #[error("tool `{tool}` failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// An operator denied a gated tool call.
    #[error("approval denied for tool `{tool}`")]
    ApprovalDenied { tool: String },

    /// A gated tool call was not resolved before its deadline.
    #[error("approval expired for tool `{tool}`")]
    ApprovalExpired { tool: String },

    /// The process no longer owns the channel lease for an account.
    #[error("lease for account `{account_id}` lost by `{owner_id}`")]
    LeaseLost { account_id: String, owner_id: String },

    /// An outbound message could not be delivered.
    #[error("delivery failed: {message}")]
    Delivery {
        message: String,
        source: Option<BoxError>,
    },

    /// Messaging channel errors (connector misconfiguration, malformed event).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<BoxError>,
    },

    /// The referenced job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A job state change was requested from a state that does not allow it.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CorvidError {
    /// Classifies this error into the job failure taxonomy.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            CorvidError::TransientProvider { .. } | CorvidError::Timeout { .. } => {
                FailureReason::Transient
            }
            CorvidError::RateLimited { .. } => FailureReason::RateLimited,
            CorvidError::InvalidContext(_) => FailureReason::InvalidContext,
            CorvidError::ToolExecution { .. } => FailureReason::ToolExecution,
            CorvidError::ApprovalDenied { .. } => FailureReason::ApprovalDenied,
            CorvidError::ApprovalExpired { .. } => FailureReason::ApprovalExpired,
            CorvidError::LeaseLost { .. } => FailureReason::LeaseLost,
            CorvidError::Delivery { .. } => FailureReason::DeliveryFailure,
            CorvidError::Config(_)
            | CorvidError::Storage { .. }
            | CorvidError::Provider { .. }
            | CorvidError::Channel { .. }
            | CorvidError::JobNotFound(_)
            | CorvidError::InvalidTransition { .. }
            | CorvidError::Internal(_) => FailureReason::Unknown,
        }
    }

    /// Whether a job failing with this error may be returned to `pending`.
    pub fn is_retryable(&self) -> bool {
        self.failure_reason().is_retryable()
    }
}

/// Classified reason recorded on a failed job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Transient,
    RateLimited,
    InvalidContext,
    ToolExecution,
    ApprovalDenied,
    ApprovalExpired,
    LeaseLost,
    DeliveryFailure,
    Unknown,
}

impl FailureReason {
    /// Only transient and rate-limit failures are retried at the job level.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureReason::Transient | FailureReason::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn transient_and_rate_limit_are_retryable() {
        let transient = CorvidError::TransientProvider {
            message: "503".into(),
            source: None,
        };
        let limited = CorvidError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        let timeout = CorvidError::Timeout {
            duration: Duration::from_secs(30),
        };
        assert!(transient.is_retryable());
        assert!(limited.is_retryable());
        assert!(timeout.is_retryable());
        assert_eq!(limited.failure_reason(), FailureReason::RateLimited);
    }

    #[test]
    fn everything_else_is_terminal() {
        let terminal = [
            CorvidError::InvalidContext("too long".into()),
            CorvidError::ToolExecution {
                tool: "calculate".into(),
                message: "bad input".into(),
            },
            CorvidError::ApprovalDenied {
                tool: "send_message".into(),
            },
            CorvidError::LeaseLost {
                account_id: "default".into(),
                owner_id: "worker-1".into(),
            },
            CorvidError::Provider {
                message: "401".into(),
                source: None,
            },
            CorvidError::Storage {
                source: Box::new(std::io::Error::other("disk")),
            },
            CorvidError::Internal("bug".into()),
        ];
        for err in &terminal {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn failure_reason_round_trips_through_strings() {
        for reason in [
            FailureReason::Transient,
            FailureReason::RateLimited,
            FailureReason::InvalidContext,
            FailureReason::DeliveryFailure,
            FailureReason::Unknown,
        ] {
            let s = reason.to_string();
            assert_eq!(FailureReason::from_str(&s).unwrap(), reason);
        }
        assert_eq!(FailureReason::RateLimited.to_string(), "rate_limited");
    }
}
