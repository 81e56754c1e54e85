//! Retry policy for the execution pipeline.
//!
//! The wrapped client has no retry support of its own, so the pipeline
//! owns a small attempt loop driven by this policy. The policy can live on
//! the client (applies to every call) or on a single request (overrides
//! the client's).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::response::Parts;

/// Decides whether an attempt outcome should be retried. Receives the
/// response parts when a response arrived, or the error when it did not.
pub type RetryCondition = Arc<dyn Fn(Option<&Parts>, Option<&Error>) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Fixed delay between attempts.
    Fixed(Duration),
    /// Capped exponential backoff: `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total attempts = 1 + max_retries.
    pub max_retries: u32,
    pub backoff: Backoff,
    pub condition: Option<RetryCondition>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("condition", &self.condition.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential { base, max } => retry_delay(attempt, base).min(max),
        }
    }

    /// Whether the attempt outcome warrants another try. Absent a custom
    /// condition, transport failures and 5xx responses are retryable.
    pub(crate) fn should_retry(&self, parts: Option<&Parts>, error: Option<&Error>) -> bool {
        if let Some(condition) = &self.condition {
            return condition(parts, error);
        }
        match (parts, error) {
            (Some(parts), _) => parts.status.is_server_error(),
            (None, Some(error)) => matches!(error, Error::Transport { .. } | Error::Io(_)),
            (None, None) => false,
        }
    }
}

/// `base * 2^attempt` with saturating arithmetic, so large attempt counts
/// cannot overflow the multiplier or the duration.
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let multiplier = 2_u32.saturating_pow(attempt);
    base.saturating_mul(multiplier)
}
