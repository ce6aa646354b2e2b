// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throttled forwarding of partial response text.

use std::future::Future;
use std::time::Duration;

use corvid_core::CorvidError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Default minimum spacing between two forwarded updates.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(200);

/// Drains accumulated-text updates from `rx` into `sink`.
///
/// At most one update is forwarded per `min_interval`; updates arriving
/// inside the window coalesce to the newest one, which is forwarded when the
/// window closes. Returns the number of forwarded updates once the channel
/// closes. Whatever is still pending at close is dropped, since the caller
/// writes the final text itself.
pub async fn forward_throttled<F, Fut>(
    mut rx: mpsc::Receiver<String>,
    min_interval: Duration,
    mut sink: F,
) -> usize
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), CorvidError>>,
{
    let mut forwarded = 0;
    let mut last_sent: Option<Instant> = None;
    let mut pending: Option<String> = None;

    loop {
        let deadline = last_sent.map(|t| t + min_interval);
        tokio::select! {
            update = rx.recv() => {
                let Some(text) = update else { break };
                if deadline.is_none_or(|d| Instant::now() >= d) {
                    pending = None;
                    last_sent = Some(Instant::now());
                    forwarded += 1;
                    if let Err(e) = sink(text).await {
                        debug!(error = %e, "failed to forward streaming update");
                    }
                } else {
                    pending = Some(text);
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if pending.is_some() =>
            {
                if let Some(text) = pending.take() {
                    last_sent = Some(Instant::now());
                    forwarded += 1;
                    if let Err(e) = sink(text).await {
                        debug!(error = %e, "failed to forward streaming update");
                    }
                }
            }
        }
    }

    forwarded
}
