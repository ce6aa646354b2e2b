// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Corvid integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockProvider`] - Mock LLM provider with a scripted response queue
//! - [`MockSession`] - Mock messaging session capturing sent texts
//! - [`TestHarness`] - Temp database plus mocks and a fast test config

pub mod harness;
pub mod mock_provider;
pub mod mock_session;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_provider::MockProvider;
pub use mock_session::{MockSession, SentText};
