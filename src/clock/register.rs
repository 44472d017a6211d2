/*!
 * Clock Register
 * The two shared words of virtual time
 */

use super::types::{ClockLayout, SimTime};
use crate::core::limits::NANOS_PER_SECOND;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Shared time register
///
/// Each word is individually atomic so an unlocked read never tears a
/// single field; a consistent (seconds, nanos) pair requires the region lock.
#[derive(Debug, Default)]
pub struct ClockRegister {
    seconds: AtomicU64,
    nanos: AtomicU32,
}

impl ClockRegister {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn seconds(&self) -> u64 {
        self.seconds.load(Ordering::Acquire)
    }

    pub fn nanos(&self) -> u32 {
        self.nanos.load(Ordering::Acquire)
    }

    pub fn load(&self) -> SimTime {
        SimTime {
            seconds: self.seconds(),
            nanos: self.nanos(),
        }
    }

    pub fn layout(&self) -> ClockLayout {
        ClockLayout {
            seconds: self.seconds(),
            nanos: self.nanos(),
        }
    }

    /// Add `delta` nanoseconds; the caller must hold the region lock
    pub(super) fn advance(&self, delta: u64) -> SimTime {
        let next = self.load().plus_nanos(delta);
        debug_assert!((next.nanos as u64) < NANOS_PER_SECOND);
        self.nanos.store(next.nanos, Ordering::Release);
        self.seconds.store(next.seconds, Ordering::Release);
        next
    }
}
