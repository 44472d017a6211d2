/*!
 * Robust Mutex
 *
 * Owner-tracking mutual exclusion with holder-death detection.
 *
 * A participant that disappears while holding the lock is recorded through
 * `abandon()`; from then on every `lock()` and `unlock()` reports
 * `SyncError::OwnerDied` instead of blocking. There is no automatic recovery:
 * data guarded by an abandoned lock may be half-written.
 */

use super::config::SyncConfig;
use crate::core::errors::SyncError;
use crate::core::types::Pid;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Identity of one attachment to a shared region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner {
    pub pid: Pid,
    pub attachment: u64,
}

impl LockOwner {
    pub const fn new(pid: Pid, attachment: u64) -> Self {
        Self { pid, attachment }
    }
}

/// Observable state of a `RobustMutex`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    Held(LockOwner),
    /// Terminal: the holder died inside its critical section
    OwnerDied(LockOwner),
}

/// Mutual exclusion acquired and released by explicit, identified calls
pub struct RobustMutex {
    status: Mutex<LockStatus>,
    released: Condvar,
    config: SyncConfig,
    acquisitions: AtomicU64,
}

impl RobustMutex {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            status: Mutex::new(LockStatus::Free),
            released: Condvar::new(),
            config,
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    /// Block until `owner` holds the lock
    ///
    /// Fails instead of hanging when the holder died, when the configured
    /// timeout elapses, or when `owner` already holds it (the lock is not
    /// recursive, so waiting would deadlock on ourselves).
    pub fn lock(&self, owner: LockOwner) -> Result<(), SyncError> {
        let started = Instant::now();
        let deadline = self.config.lock_timeout.map(|t| started + t);
        let mut status = self.status.lock();

        loop {
            match *status {
                LockStatus::Free => {
                    *status = LockStatus::Held(owner);
                    self.acquisitions.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                LockStatus::OwnerDied(dead) => {
                    return Err(SyncError::OwnerDied { pid: dead.pid });
                }
                LockStatus::Held(holder) if holder == owner => {
                    return Err(SyncError::AlreadyHeld { pid: owner.pid });
                }
                LockStatus::Held(holder) => {
                    let mut wait = self.config.liveness_poll;
                    if let Some(deadline) = deadline {
                        let now = Instant::now();
                        if now >= deadline {
                            let waited_ms = started.elapsed().as_millis() as u64;
                            warn!(
                                pid = owner.pid,
                                holder = holder.pid,
                                waited_ms,
                                "lock acquisition timed out"
                            );
                            return Err(SyncError::Timeout {
                                waited_ms,
                                holder: holder.pid,
                            });
                        }
                        wait = wait.min(deadline - now);
                    }
                    self.released.wait_for(&mut status, wait);
                }
            }
        }
    }

    /// Take the lock only if it is free right now
    pub fn try_lock(&self, owner: LockOwner) -> Result<bool, SyncError> {
        let mut status = self.status.lock();
        match *status {
            LockStatus::Free => {
                *status = LockStatus::Held(owner);
                self.acquisitions.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            LockStatus::OwnerDied(dead) => Err(SyncError::OwnerDied { pid: dead.pid }),
            LockStatus::Held(_) => Ok(false),
        }
    }

    /// Release a lock held by `owner`
    pub fn unlock(&self, owner: LockOwner) -> Result<(), SyncError> {
        let mut status = self.status.lock();
        match *status {
            LockStatus::Held(holder) if holder == owner => {
                *status = LockStatus::Free;
                drop(status);
                self.released.notify_one();
                Ok(())
            }
            LockStatus::OwnerDied(dead) => Err(SyncError::OwnerDied { pid: dead.pid }),
            _ => Err(SyncError::NotHeld { pid: owner.pid }),
        }
    }

    /// Record the death of `owner`
    ///
    /// Returns true if `owner` was holding the lock, in which case the lock
    /// becomes permanently unusable and every waiter is woken to observe it.
    pub fn abandon(&self, owner: LockOwner) -> bool {
        let mut status = self.status.lock();
        if *status != LockStatus::Held(owner) {
            return false;
        }
        *status = LockStatus::OwnerDied(owner);
        drop(status);

        warn!(pid = owner.pid, "lock holder died inside its critical section");
        self.released.notify_all();
        true
    }

    pub fn is_held_by(&self, owner: LockOwner) -> bool {
        *self.status.lock() == LockStatus::Held(owner)
    }

    pub fn status(&self) -> LockStatus {
        *self.status.lock()
    }

    /// Total successful acquisitions
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RobustMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustMutex")
            .field("status", &self.status())
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

impl Drop for RobustMutex {
    fn drop(&mut self) {
        if let LockStatus::Held(holder) = *self.status.get_mut() {
            debug!(pid = holder.pid, "robust mutex dropped while held");
        }
    }
}
