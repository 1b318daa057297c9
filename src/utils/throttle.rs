//! Log throttling utility
//!
//! The relay channel retries every few hundred milliseconds while the relay is
//! down. Without throttling every failed attempt would produce a warning.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct KeyState {
    last_logged: Instant,
    suppressed: u32,
}

/// Log throttler that limits how often the same message is logged
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use meshcall::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("relay_connect"));
/// assert!(!throttler.should_log("relay_connect"));
/// assert_eq!(throttler.suppressed("relay_connect"), 1);
/// ```
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    /// Create a new log throttler with the specified interval
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// Create a new log throttler with interval specified in seconds
    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Check if a message should be logged (not throttled)
    ///
    /// Returns `true` and restarts the interval when the key has not been
    /// logged within the interval. Throttled calls are counted, see
    /// [`LogThrottler::suppressed`].
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed = state.suppressed.saturating_add(1);
                false
            }
            Some(state) => {
                state.last_logged = now;
                state.suppressed = 0;
                true
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                true
            }
        }
    }

    /// Number of messages swallowed for `key` since it was last logged
    pub fn suppressed(&self, key: &str) -> u32 {
        self.keys.lock().get(key).map(|s| s.suppressed).unwrap_or(0)
    }

    /// Clear throttle state for a specific key
    ///
    /// Call when the condition recovers so the next failure is logged at once.
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }

    /// Clear all throttle state
    pub fn clear_all(&self) {
        self.keys.lock().clear();
    }

    /// Get the number of tracked keys
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Check if the throttler is empty
    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Default for LogThrottler {
    /// Create a default log throttler with 5 second interval
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Macro for throttled warning logging
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Macro for throttled info logging
#[macro_export]
macro_rules! info_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::info!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_should_log_first_call() {
        let throttler = LogThrottler::with_secs(1);
        assert!(throttler.should_log("test_key"));
    }

    #[test]
    fn test_throttling_counts_suppressed() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("relay"));
        assert!(!throttler.should_log("relay"));
        assert!(!throttler.should_log("relay"));
        assert_eq!(throttler.suppressed("relay"), 2);

        thread::sleep(Duration::from_millis(150));

        assert!(throttler.should_log("relay"));
        assert_eq!(throttler.suppressed("relay"), 0);
    }

    #[test]
    fn test_clear_logs_again_immediately() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));

        throttler.clear("key1");
        assert!(throttler.should_log("key1"));
        assert_eq!(throttler.len(), 2);

        throttler.clear_all();
        assert!(throttler.is_empty());
    }
}
