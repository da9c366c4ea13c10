//! Engine configuration.

use std::time::Duration;

/// Runtime knobs for the storage layer.
///
/// The defaults match the documented lock discipline: a 100 ms poll
/// against the companion `.lock` file, bounded by a five second wait
/// before [`crate::Error::LockTimeout`] surfaces.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on the wait for a table lock.
    pub lock_timeout: Duration,
    /// Interval between lock acquisition attempts.
    pub lock_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lock_timeout: Duration::from_secs(5),
            lock_poll: Duration::from_millis(100),
        }
    }
}

impl Config {
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_poll(mut self, poll: Duration) -> Self {
        self.lock_poll = poll;
        self
    }
}
