//! Log throttling
//!
//! Limits how often the same message is recorded so a stalled peer or a
//! lagging frame subscriber cannot flood the log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate limiter keyed by message kind
///
/// ```rust
/// use std::time::Duration;
/// use streamcaster::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("write_failed"));
/// assert!(!throttler.should_log("write_failed"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    suppressed: Mutex<HashMap<String, u64>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            suppressed: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` when `key` has not been logged within the interval
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();

        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                *self.suppressed.lock().entry(key.to_string()).or_insert(0) += 1;
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

    /// Messages swallowed for `key` since the last call, resetting the count
    pub fn take_suppressed(&self, key: &str) -> u64 {
        self.suppressed.lock().remove(key).unwrap_or(0)
    }

    /// Forget `key` so the next occurrence logs immediately
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
        self.suppressed.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.last_logged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Throttled `tracing::debug!`
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}
