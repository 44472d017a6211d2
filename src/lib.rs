/*!
 * OSS Simulator Library
 * Virtual clock, resource manager and the supervisor that drives them
 */

pub mod clock;
pub mod core;
pub mod ipc;
pub mod monitoring;
pub mod process;
pub mod resources;
pub mod supervisor;

// Re-exports
pub use crate::core::{SimContext, SimError, SimResult, SyncError};
pub use clock::{ClockLayout, ClockRole, SimTime, VirtualClock};
pub use ipc::ShmNamespace;
pub use monitoring::{init_tracing, TracingOptions};
pub use process::{ExitReason, WorkerConfig, WorkerEvent};
pub use resources::{
    DenialReason, RequestOutcome, RequestPolicy, ResourceManager, ResourceRole, Submission,
    TableLayout, TableSpec,
};
pub use supervisor::{RunSummary, Supervisor, SupervisorConfig};
