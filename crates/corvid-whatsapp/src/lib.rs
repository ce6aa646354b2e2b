// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp channel for Corvid.
//!
//! - [`lease`]: exclusive ownership of an account across worker processes
//! - [`delivery`]: outbox drain through a [`corvid_core::MessagingSession`]
//! - [`ingress`]: inbound webhook that turns messages into jobs
//! - [`bridge`]: HTTP session against the bridge sidecar
//! - [`runtime`]: ties the above together for `corvid serve`

pub mod bridge;
pub mod delivery;
pub mod ingress;
pub mod lease;
pub mod runtime;

pub use bridge::BridgeSession;
pub use delivery::{Delivery, DeliveryLoop};
pub use ingress::{IgnoreReason, InboundEvent, Ingress, IngressOutcome};
pub use lease::LeaseManager;
pub use runtime::WhatsAppRuntime;
