//! Retry policy and the runner-wide retry gate.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Exponential backoff with a cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` consecutive failures.
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// With base=5s, multiplier=2.0, max=15min:
    /// - attempt 1: 5s
    /// - attempt 2: 10s
    /// - attempt 3: 20s
    /// - attempt 9+: 15min
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

/// Tracks consecutive transient failures and when the runner may try again.
///
/// A closed gate means no network calls at all, so the fixed priority order
/// is kept: the failed head task is retried first once the gate opens.
#[derive(Debug, Clone)]
pub struct RetryGate {
    policy: RetryPolicy,
    consecutive_failures: u32,
    not_before: Option<DateTime<Utc>>,
}

impl RetryGate {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            not_before: None,
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|at| now >= at)
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failure and close the gate. A server-supplied `retry_after`
    /// can only lengthen the wait.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        retry_after: Option<Duration>,
    ) -> DateTime<Utc> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let backoff = self.policy.next_delay(self.consecutive_failures);
        let delay = retry_after.map_or(backoff, |ra| ra.max(backoff));
        let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::days(1));
        let at = now + delay;
        self.not_before = Some(at);
        at
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.not_before = None;
    }
}
