/*!
 * Synchronization Configuration
 *
 * Runtime configuration for lock acquisition bounds
 */

use crate::core::limits::{DEFAULT_LIVENESS_POLL, DEFAULT_LOCK_TIMEOUT};
use std::time::Duration;

/// Synchronization configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Longest a caller blocks in `lock()` before `SyncError::Timeout`.
    /// `None` waits for as long as the holder stays alive.
    pub lock_timeout: Option<Duration>,
    /// Interval at which a blocked caller re-checks the lock state
    pub liveness_poll: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            liveness_poll: DEFAULT_LIVENESS_POLL,
        }
    }
}

impl SyncConfig {
    /// Short bounds, for tests and interactive runs
    pub const fn strict() -> Self {
        Self {
            lock_timeout: Some(Duration::from_millis(250)),
            liveness_poll: Duration::from_millis(1),
        }
    }

    /// Never time out; only holder death ends a wait
    pub const fn patient() -> Self {
        Self {
            lock_timeout: None,
            liveness_poll: Duration::from_millis(50),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
