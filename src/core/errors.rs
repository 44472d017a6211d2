/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::types::Pid;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export module errors so callers can reach everything from `core`
pub use crate::clock::ClockError;
pub use crate::ipc::shm::ShmError;
pub use crate::resources::ResourceError;

/// Failures of the shared mutual-exclusion primitive
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Lock holder (pid {pid}) died inside its critical section")]
    #[diagnostic(
        code(sync::owner_died),
        help("Shared state guarded by this lock may be torn. Tear the region down.")
    )]
    OwnerDied { pid: Pid },

    #[error("Lock not acquired within {waited_ms}ms (held by pid {holder})")]
    #[diagnostic(
        code(sync::timeout),
        help("The holder is alive but never released. Check for a stuck participant.")
    )]
    Timeout { waited_ms: u64, holder: Pid },

    #[error("Lock is not held by pid {pid}")]
    #[diagnostic(
        code(sync::not_held),
        help("unlock() must follow a successful lock() by the same handle.")
    )]
    NotHeld { pid: Pid },

    #[error("Lock is already held by pid {pid}")]
    #[diagnostic(code(sync::already_held), help("The lock is not recursive."))]
    AlreadyHeld { pid: Pid },
}

/// Unified simulator error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum SimError {
    #[error("Clock error: {0}")]
    #[diagnostic(transparent)]
    Clock(#[from] ClockError),

    #[error("Resource error: {0}")]
    #[diagnostic(transparent)]
    Resource(#[from] ResourceError),

    #[error("Shared memory error: {0}")]
    #[diagnostic(transparent)]
    Shm(#[from] ShmError),

    #[error("Synchronization error: {0}")]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(sim::configuration_error),
        help("Invalid configuration. Review configuration parameters.")
    )]
    Configuration(String),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(sim::io_error),
        help("Filesystem or I/O operation failed. Check file permissions and disk space.")
    )]
    Io(String),

    #[error("Internal error: {0}")]
    #[diagnostic(
        code(sim::internal_error),
        help("An unexpected internal error occurred. Please report this issue.")
    )]
    Internal(String),
}

impl SimError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Common result type for simulator operations
pub type SimResult<T> = Result<T, SimError>;
