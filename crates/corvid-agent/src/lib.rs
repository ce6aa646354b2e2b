// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job processing for the Corvid agent runtime.
//!
//! The [`AgentWorker`] is the central coordinator that:
//! - Claims pending jobs through the [`JobController`]
//! - Fits conversation history into the context budget
//! - Resolves the tool policy and gates high-risk tools behind approval
//! - Runs the model turn, streaming on the web channel
//! - Persists the reply and queues WhatsApp deliveries
//! - Classifies failures into retry or terminal failure
//!
//! Alongside it, the [`TaskScheduler`] turns due scheduled tasks into jobs
//! and the [`RetentionSweeper`] deletes old finished jobs.

pub mod jobs;
pub mod retention;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod streaming;
pub mod worker;

pub use jobs::{DEFAULT_MAX_ATTEMPTS, JobController, JobOutcome};
pub use retention::RetentionSweeper;
pub use runner::{ToolCallRecord, TurnPlan, TurnResult, TurnRunner};
pub use scheduler::{TaskScheduler, next_run_after};
pub use streaming::forward_throttled;
pub use worker::{AgentWorker, JobRun, WorkerStores};
