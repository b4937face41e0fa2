//! Log throttling utility
//!
//! Limits how often the same log message is recorded so that a failing
//! device or encoder cannot flood the log at frame rate.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Keyed log throttler
///
/// ```rust
/// use std::time::Duration;
/// use webcam_streamer::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert_eq!(throttler.check("read_error"), Some(0));
/// assert_eq!(throttler.check("read_error"), None);
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when the message for `key` should be
    /// logged now, where `suppressed` counts the repeats swallowed since
    /// the last time it was logged. Returns `None` while throttled.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed = entry.suppressed.saturating_add(1);
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key`, so the next occurrence is logged immediately.
    /// Call this once the error condition has recovered.
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttles_and_counts_repeats() {
        let throttler = LogThrottler::new(Duration::from_millis(50));

        assert_eq!(throttler.check("key"), Some(0));
        assert_eq!(throttler.check("key"), None);
        assert_eq!(throttler.check("key"), None);

        // Other keys are independent
        assert_eq!(throttler.check("other"), Some(0));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(throttler.check("key"), Some(2));
        assert_eq!(throttler.check("key"), None);
    }

    #[test]
    fn test_clear_resets_key() {
        let throttler = LogThrottler::with_secs(60);
        assert_eq!(throttler.check("key"), Some(0));
        assert_eq!(throttler.check("key"), None);

        throttler.clear("key");
        assert_eq!(throttler.check("key"), Some(0));
    }
}
