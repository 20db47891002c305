use std::time::Duration;

use crate::client::OutcomeKind;

/// Explicit retry policy for outbound Vault calls.
///
/// Bounded exponential backoff, applied only to transient transport
/// faults (`HTTP_ERROR`, `REQUEST_FAILED`, `REQUEST_TIMEOUT`) — never to
/// `VAULT_ERROR`, which is a business rejection. The default performs no
/// retries, matching the upstream system.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn backoff(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Whether another attempt should follow the given outcome.
    pub fn should_retry(&self, kind: OutcomeKind, attempt: u32) -> bool {
        kind.is_transient() && attempt < self.max_attempts
    }

    /// Delay before the given (1-based) retry attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        (self.base_delay * factor).min(self.max_delay)
    }
}
