use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;

/// Per-key exponential retry delays: `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct BackoffTable {
    base: Duration,
    max: Duration,
    failures: Mutex<FxHashMap<String, u32>>,
}

impl Default for BackoffTable {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(300))
    }
}

impl BackoffTable {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base), failures: Mutex::new(FxHashMap::default()) }
    }

    /// Record a failure for `key` and return the delay before the next attempt.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = match self.failures.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = failures.entry(key.to_string()).or_insert(0);
        let delay = self.base.saturating_mul(2u32.saturating_pow(*n)).min(self.max);
        *n = n.saturating_add(1);
        delay
    }

    /// Forget the failure history of `key` after a successful attempt.
    pub fn reset(&self, key: &str) {
        let mut failures = match self.failures.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        match self.failures.lock() {
            Ok(g) => g.get(key).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(key).copied().unwrap_or(0),
        }
    }
}
