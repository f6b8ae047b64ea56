//! Per-host pacing.
//!
//! A scan hammering one origin from many workers can trip WAF throttling or
//! distort timing-based checks. The pacer spaces exchanges to the same host
//! by a configured minimum delay; different hosts are independent. Each
//! caller reserves its slot before sleeping, so concurrent workers serialize
//! fairly instead of stampeding when the window opens.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

/// Spaces exchanges per host by a fixed minimum delay.
pub(crate) struct HostPacer {
    delay: Duration,
    next_slot: DashMap<String, Instant>,
}

impl HostPacer {
    /// A zero delay disables pacing entirely.
    pub(crate) fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            next_slot: DashMap::new(),
        }
    }

    /// Waits until this caller's slot for the host arrives. This is a legal
    /// suspension point in the pipeline, ahead of the wire exchange.
    pub(crate) async fn pace(&self, host: &str) {
        if self.delay.is_zero() {
            return;
        }

        let now = Instant::now();
        let wait = {
            let mut slot = self
                .next_slot
                .entry(host.to_string())
                .or_insert(now);
            let scheduled = (*slot).max(now);
            *slot = scheduled + self.delay;
            scheduled.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(host, wait_ms = wait.as_millis() as u64, "pacing host");
            tokio::time::sleep(wait).await;
        }
    }
}
