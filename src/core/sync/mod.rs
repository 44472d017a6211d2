/*!
 * Synchronization Primitives
 *
 * The mutual-exclusion primitive shared by the clock register and the
 * resource table.
 *
 * # Architecture
 *
 * Unlike `parking_lot::Mutex`, the lock is acquired and released by explicit
 * calls carrying the caller's identity (`LockOwner`), so a holder can keep it
 * across API calls the way a process keeps a SysV semaphore. The lock records
 * who holds it, which is what makes holder death observable.
 */

mod config;
mod robust;

pub use config::SyncConfig;
pub use robust::{LockOwner, LockStatus, RobustMutex};
