// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the storage tables, one per store trait.

pub mod approvals;
pub mod conversations;
pub mod jobs;
pub mod leases;
pub mod memories;
pub mod outbound;
pub mod scheduled;
