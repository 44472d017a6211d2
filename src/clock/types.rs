/*!
 * Clock Types
 * Roles, virtual timestamps, the binary layout and errors of the clock
 */

use crate::core::errors::SyncError;
use crate::core::limits::NANOS_PER_SECOND;
use crate::core::types::Pid;
use crate::ipc::shm::ShmError;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which side of the clock a handle is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockRole {
    /// Creates the register and is the only one allowed to advance it
    Writer,
    /// Attaches to an existing register and observes it
    Reader,
}

/// A normalized point in virtual time
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime {
    pub seconds: u64,
    /// Always below one second
    pub nanos: u32,
}

impl SimTime {
    pub const ZERO: SimTime = SimTime {
        seconds: 0,
        nanos: 0,
    };

    /// Build a time, rolling excess nanoseconds into seconds
    pub fn new(seconds: u64, nanos: u64) -> Self {
        Self {
            seconds: seconds.saturating_add(nanos / NANOS_PER_SECOND),
            nanos: (nanos % NANOS_PER_SECOND) as u32,
        }
    }

    pub fn from_nanos(total: u64) -> Self {
        Self::new(0, total)
    }

    pub fn as_nanos(&self) -> u128 {
        self.seconds as u128 * NANOS_PER_SECOND as u128 + self.nanos as u128
    }

    /// `self + delta`, saturating at the largest representable second
    pub fn plus_nanos(&self, delta: u64) -> Self {
        let nanos = self.nanos as u64 + delta % NANOS_PER_SECOND;
        let carry = delta / NANOS_PER_SECOND + nanos / NANOS_PER_SECOND;
        Self {
            seconds: self.seconds.saturating_add(carry),
            nanos: (nanos % NANOS_PER_SECOND) as u32,
        }
    }

    /// Nanoseconds elapsed since `earlier`, zero if `earlier` is later
    pub fn nanos_since(&self, earlier: SimTime) -> u128 {
        self.as_nanos().saturating_sub(earlier.as_nanos())
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s, {}ns", self.seconds, self.nanos)
    }
}

/// Fixed binary layout of the clock register
///
/// bincode's default (fixint, little-endian) encoding yields exactly
/// `ENCODED_LEN` bytes: `u64 seconds` then `u32 nanos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockLayout {
    pub seconds: u64,
    pub nanos: u32,
}

impl ClockLayout {
    pub const ENCODED_LEN: usize = 12;

    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| format!("Failed to encode clock layout: {}", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(format!(
                "Clock layout must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            ));
        }
        let layout: Self = bincode::deserialize(bytes)
            .map_err(|e| format!("Failed to decode clock layout: {}", e))?;
        if layout.nanos as u64 >= NANOS_PER_SECOND {
            return Err(format!("Clock layout nanos out of range: {}", layout.nanos));
        }
        Ok(layout)
    }
}

impl From<ClockLayout> for SimTime {
    fn from(layout: ClockLayout) -> Self {
        SimTime::new(layout.seconds, layout.nanos as u64)
    }
}

/// Clock error types
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ClockError {
    /// The shared register could not be created or attached
    #[error("Clock register unavailable: {0}")]
    #[diagnostic(transparent)]
    ResourceUnavailable(#[from] ShmError),

    /// The register's lock is unusable
    #[error("Clock synchronization failed: {0}")]
    #[diagnostic(transparent)]
    Synchronization(#[from] SyncError),

    #[error("Pid {pid} holds a reader handle and cannot advance the clock")]
    #[diagnostic(code(clock::read_only), help("Only the writer role advances time."))]
    ReadOnly { pid: Pid },

    #[error("Pid {pid} must hold the clock lock for this operation")]
    #[diagnostic(code(clock::not_locked), help("Call lock() first."))]
    NotLocked { pid: Pid },

    #[error("Clock handle already destroyed")]
    #[diagnostic(code(clock::destroyed))]
    Destroyed,
}

/// Result type for clock operations
pub type ClockResult<T> = Result<T, ClockError>;
