/*!
 * Process Module
 * Simulated worker processes, their exit notifications and the census
 */

pub mod census;
pub mod events;
pub mod types;
pub mod worker;

// Re-export for convenience
pub use census::{CensusSnapshot, ProcessCensus};
pub use events::DeathNotifier;
pub use types::{ExitReason, WorkerEvent};
pub use worker::{spawn_worker, WorkerConfig, WorkerHandle};
