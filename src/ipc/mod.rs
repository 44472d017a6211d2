/*!
 * IPC Module
 * Inter-process communication between supervisor and workers
 */

pub mod shm;

// Re-export for convenience
pub use shm::{SharedSegment, ShmError, ShmNamespace, ShmStats};
