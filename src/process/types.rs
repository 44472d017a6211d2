/*!
 * Process Types
 * Worker lifecycle states and the events the supervisor receives
 */

use crate::core::types::{Pid, WorkerId};
use serde::{Deserialize, Serialize};

/// Why a worker stopped running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Decided to terminate and released everything first
    Finished,
    /// Injected crash: gone without releasing anything
    Crashed,
    /// Stopped through its kill switch
    Killed,
    /// Hit an error it could not continue past
    Failed(String),
    /// The worker thread panicked
    Panicked,
}

impl ExitReason {
    /// True when the worker may have left resources behind
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitReason::Finished)
    }
}

/// Messages from workers to the supervisor loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Exited {
        worker: WorkerId,
        pid: Pid,
        reason: ExitReason,
    },
}
