/*!
 * Resource Manager Module
 *
 * A fixed set of resource classes, each with a number of identical
 * instances, and a worker x class grid of what every worker holds. The
 * server side runs an arbiter thread that owns the per-class request
 * queues; clients request and release through it.
 *
 * For every class `available + sum(held) == total` holds whenever the
 * table's lock is free.
 */

mod arbiter;
mod deadlock;
mod manager;
mod pending;
pub mod table;
pub mod types;

pub use arbiter::ResourceRegion;
pub use deadlock::DeadlockDetector;
pub use manager::{ResourceManager, Submission};
pub use pending::PendingRequest;
pub use table::{ClassDescriptor, ResourceTable, TableLayout};
pub use types::{
    DenialReason, ReclaimReport, RequestOutcome, RequestPolicy, ResourceError, ResourceResult,
    ResourceRole, ResourceStats, TableSpec,
};
