//! Retry backoff for transient failures.
//!
//! The schedule is a fixed list of delays. Attempts past the end of the list
//! reuse the last delay, so the delay sequence is non-decreasing and capped.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Default delays in milliseconds: 1s, 5s, 15s, 30s, 60s.
pub const DEFAULT_SCHEDULE_MS: [u64; 5] = [1_000, 5_000, 15_000, 30_000, 60_000];

/// Default number of failed attempts before an operation is evicted.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Retry policy: delay schedule plus eviction bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    /// Delay after the n-th failure is `schedule_ms[n - 1]`, capped at the last entry
    schedule_ms: Vec<u64>,
    /// Failed attempts after which an operation leaves the active queue
    max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            schedule_ms: DEFAULT_SCHEDULE_MS.to_vec(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Backoff {
    /// Create a policy from a custom schedule.
    ///
    /// The schedule is sorted so the delay sequence stays monotonic even if
    /// the caller passes delays out of order. An empty schedule means "retry
    /// immediately".
    pub fn new(mut schedule_ms: Vec<u64>, max_retries: u32) -> Self {
        schedule_ms.sort_unstable();
        Self {
            schedule_ms,
            max_retries: max_retries.max(1),
        }
    }

    /// Builder-style override of the eviction bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Failed attempts after which an operation is evicted.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay to wait after `attempts` failed attempts.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let idx = (attempts as usize - 1).min(self.schedule_ms.len().saturating_sub(1));
        self.schedule_ms.get(idx).copied().unwrap_or(0)
    }

    /// Earliest time an operation may be dispatched again.
    pub fn next_attempt_at(&self, attempts: u32, last_attempt_at: Timestamp) -> Timestamp {
        last_attempt_at.saturating_add(self.delay_ms(attempts))
    }

    /// Whether `attempts` failures exhaust the retry budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_ms(0), 0);
        assert_eq!(backoff.delay_ms(1), 1_000);
        assert_eq!(backoff.delay_ms(2), 5_000);
        assert_eq!(backoff.delay_ms(3), 15_000);
        assert_eq!(backoff.delay_ms(4), 30_000);
        assert_eq!(backoff.delay_ms(5), 60_000);
    }

    #[test]
    fn capped_at_last_delay() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_ms(6), 60_000);
        assert_eq!(backoff.delay_ms(100), 60_000);
    }

    #[test]
    fn next_attempt_time() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next_attempt_at(2, 10_000), 15_000);
        assert_eq!(backoff.next_attempt_at(1, u64::MAX), u64::MAX);
    }

    #[test]
    fn exhaustion_bound() {
        let backoff = Backoff::default();
        assert!(!backoff.is_exhausted(4));
        assert!(backoff.is_exhausted(5));

        let strict = Backoff::default().with_max_retries(1);
        assert!(strict.is_exhausted(1));
    }

    #[test]
    fn custom_schedule_is_sorted() {
        let backoff = Backoff::new(vec![30, 10, 20], 3);
        assert_eq!(backoff.delay_ms(1), 10);
        assert_eq!(backoff.delay_ms(2), 20);
        assert_eq!(backoff.delay_ms(3), 30);
    }

    #[test]
    fn empty_schedule_retries_immediately() {
        let backoff = Backoff::new(Vec::new(), 0);
        assert_eq!(backoff.delay_ms(3), 0);
        assert_eq!(backoff.max_retries(), 1);
    }
}
