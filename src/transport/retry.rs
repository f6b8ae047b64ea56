//! Failure classification and retry backoff.
//!
//! Only idempotent requests are retried, and only on failures where a second
//! attempt can plausibly differ: connection-level trouble on a loaded or
//! flapping target. Configuration, TLS, and protocol failures repeat
//! deterministically and are surfaced immediately.

use std::time::Duration;

use rand::Rng;

use crate::transport::error::TransportErrorKind;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureType {
    /// May succeed on retry (refused, reset, timed out).
    Transient,
    /// Will fail the same way again.
    Permanent,
}

/// Classifies a transport failure for retry purposes.
pub(crate) fn classify(kind: &TransportErrorKind) -> FailureType {
    match kind {
        TransportErrorKind::ConnectionRefused { .. }
        | TransportErrorKind::ConnectionReset { .. }
        | TransportErrorKind::Timeout { .. } => FailureType::Transient,
        TransportErrorKind::DnsFailure { .. }
        | TransportErrorKind::TlsFailure { .. }
        | TransportErrorKind::RedirectLimitExceeded { .. }
        | TransportErrorKind::ResponseTooLarge { .. }
        | TransportErrorKind::InvalidUrl { .. }
        | TransportErrorKind::ProxyConnect { .. }
        | TransportErrorKind::MalformedResponse { .. } => FailureType::Permanent,
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Surface the error.
    GiveUp,
}

/// Exponential backoff with jitter, bounded by a retry budget.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Decides the fate of attempt `attempt` (zero-based) that failed with
    /// `kind`.
    pub(crate) fn decide(&self, attempt: u32, kind: &TransportErrorKind) -> RetryDecision {
        if attempt >= self.max_retries || classify(kind) == FailureType::Permanent {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }

    /// Delay before the next attempt: doubled per attempt, capped, with up to
    /// 50% random jitter so retry bursts spread out.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter)
    }
}
