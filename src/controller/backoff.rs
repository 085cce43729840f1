//! Per-object retry backoff for failed reconciliations

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use dashmap::DashMap;
use std::time::Duration;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Exponential backoff state keyed by object
pub struct BackoffTracker {
    initial: Duration,
    max: Duration,
    policies: DashMap<String, ExponentialBackoff>,
}

impl Default for BackoffTracker {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl BackoffTracker {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            policies: DashMap::new(),
        }
    }

    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Delay before the next attempt for `key`. Doubles on every call.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut policy = self
            .policies
            .entry(key.to_string())
            .or_insert_with(|| self.policy());
        policy.next_backoff().unwrap_or(self.max)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &str) {
        self.policies.remove(key);
    }
}
