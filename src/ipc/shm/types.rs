/*!
 * Shared Memory Types
 * Common types and errors for shared regions
 */

use crate::core::types::{IpcKey, Pid};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared memory error types
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ShmError {
    /// A region already exists under the key
    #[error("Region already exists: key 0x{0:08x}")]
    #[diagnostic(
        code(shm::already_exists),
        help("A previous run may not have torn its regions down, or two writers share a key.")
    )]
    AlreadyExists(IpcKey),

    /// No region under the key
    #[error("Region not found: key 0x{0:08x}")]
    #[diagnostic(code(shm::not_found), help("The owning role must create the region first."))]
    NotFound(IpcKey),

    /// The region holds a different layout than the caller expects
    #[error("Region 0x{key:08x} holds {found}, expected {expected}")]
    #[diagnostic(code(shm::type_mismatch))]
    TypeMismatch {
        key: IpcKey,
        expected: String,
        found: String,
    },

    /// Only the creator may remove a region
    #[error("Permission denied: {0}")]
    #[diagnostic(code(shm::permission_denied))]
    PermissionDenied(String),

    /// Namespace is full
    #[error("Shared region limit exceeded: {0}/{1}")]
    #[diagnostic(code(shm::limit_exceeded), help("Remove unused regions."))]
    LimitExceeded(usize, usize),
}

/// Shared region statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShmStats {
    pub key: IpcKey,
    pub kind: String,
    pub owner_pid: Pid,
    pub attached: usize,
}
