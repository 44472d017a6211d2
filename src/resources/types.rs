/*!
 * Resource Manager Types
 * Roles, request outcomes, table sizing, statistics and errors
 */

use crate::core::errors::SyncError;
use crate::core::types::{ClassId, Instances, WorkerId};
use crate::ipc::shm::ShmError;
use miette::Diagnostic;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

/// Which side of the resource manager a handle is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRole {
    /// Owns the table and runs the arbiter
    Server,
    /// Requests and releases through the arbiter
    Client,
}

/// How `request_resource` behaves when the request has to queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Wait for the outcome; `None` waits until granted or shutdown
    Block { timeout: Option<Duration> },
    /// Return `Submission::Pending` right away
    NonBlocking,
}

impl RequestPolicy {
    pub fn blocking_for(timeout: Duration) -> Self {
        RequestPolicy::Block {
            timeout: Some(timeout),
        }
    }
}

/// Why a queued request ended without a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Timeout,
    /// Withdrawn by the requester, or dropped because the worker was reclaimed
    Cancelled,
    ManagerShutdown,
}

/// Terminal outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Granted,
    Denied(DenialReason),
}

impl RequestOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, RequestOutcome::Granted)
    }
}

/// Sizing of the resource table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Instance count of every class, indexed by `ClassId`
    pub totals: Vec<Instances>,
    /// Rows of the allocation grid
    pub max_workers: usize,
}

impl TableSpec {
    pub fn new(totals: Vec<Instances>, max_workers: usize) -> Self {
        Self {
            totals,
            max_workers,
        }
    }

    /// Every class with the same instance count
    pub fn uniform(class_count: usize, instances: Instances, max_workers: usize) -> Self {
        Self::new(vec![instances; class_count], max_workers)
    }

    /// Class sizes drawn uniformly from `instances`
    pub fn random<R: Rng + ?Sized>(
        rng: &mut R,
        class_count: usize,
        instances: RangeInclusive<Instances>,
        max_workers: usize,
    ) -> Self {
        let totals = (0..class_count)
            .map(|_| rng.gen_range(instances.clone()))
            .collect();
        Self::new(totals, max_workers)
    }

    pub fn class_count(&self) -> usize {
        self.totals.len()
    }

    pub fn validate(&self) -> ResourceResult<()> {
        if self.totals.is_empty() {
            return Err(ResourceError::InvalidRequest(
                "resource table needs at least one class".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ResourceError::InvalidRequest(
                "resource table needs at least one worker row".to_string(),
            ));
        }
        if let Some(class) = self.totals.iter().position(|&t| t == 0) {
            return Err(ResourceError::InvalidRequest(format!(
                "resource class {} has no instances",
                class
            )));
        }
        Ok(())
    }
}

/// Resources returned by a reclaim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    pub worker: WorkerId,
    /// `(class, instances)` for every class the worker held
    pub released: Vec<(ClassId, Instances)>,
    /// Queued requests of the worker that were dropped
    pub cancelled_requests: usize,
}

impl ReclaimReport {
    pub fn instances(&self) -> u64 {
        self.released.iter().map(|&(_, n)| n as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.cancelled_requests == 0
    }
}

/// Arbiter statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub granted_immediately: u64,
    pub granted_after_wait: u64,
    pub denied_timeout: u64,
    pub denied_cancelled: u64,
    pub denied_shutdown: u64,
    pub releases: u64,
    pub reclaims: u64,
    pub instances_reclaimed: u64,
    pub deadlock_checks: u64,
}

impl ResourceStats {
    pub fn grants(&self) -> u64 {
        self.granted_immediately + self.granted_after_wait
    }

    pub fn denials(&self) -> u64 {
        self.denied_timeout + self.denied_cancelled + self.denied_shutdown
    }

    pub(super) fn record_denial(&mut self, reason: DenialReason) {
        match reason {
            DenialReason::Timeout => self.denied_timeout += 1,
            DenialReason::Cancelled => self.denied_cancelled += 1,
            DenialReason::ManagerShutdown => self.denied_shutdown += 1,
        }
    }
}

/// Resource manager error types
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ResourceError {
    /// The table or its request channel could not be created or attached
    #[error("Resource table unavailable: {0}")]
    #[diagnostic(
        code(resources::unavailable),
        help("The server role must create the table before clients attach.")
    )]
    ResourceUnavailable(String),

    /// The table's lock is unusable
    #[error("Resource table synchronization failed: {0}")]
    #[diagnostic(transparent)]
    Synchronization(#[from] SyncError),

    #[error("Worker {worker} released {requested} of class {class} but holds {held}")]
    #[diagnostic(
        code(resources::invalid_release),
        help("A worker can only release instances it holds.")
    )]
    InvalidRelease {
        worker: WorkerId,
        class: ClassId,
        requested: Instances,
        held: Instances,
    },

    #[error("Invalid resource request: {0}")]
    #[diagnostic(code(resources::invalid_request))]
    InvalidRequest(String),

    #[error("Resource manager is no longer available")]
    #[diagnostic(
        code(resources::manager_unavailable),
        help("The server role has been torn down.")
    )]
    ManagerUnavailable,

    #[error("Operation {operation} is reserved for the server role")]
    #[diagnostic(code(resources::wrong_role))]
    WrongRole { operation: String },
}

impl From<ShmError> for ResourceError {
    fn from(err: ShmError) -> Self {
        ResourceError::ResourceUnavailable(err.to_string())
    }
}

/// Result type for resource manager operations
pub type ResourceResult<T> = Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_spec_respects_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let spec = TableSpec::random(&mut rng, 20, 1..=10, 18);
        assert_eq!(spec.class_count(), 20);
        assert!(spec.totals.iter().all(|t| (1..=10).contains(t)));
        spec.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_classes() {
        assert!(TableSpec::new(vec![], 4).validate().is_err());
        assert!(TableSpec::new(vec![3, 0], 4).validate().is_err());
        assert!(TableSpec::uniform(2, 3, 0).validate().is_err());
    }

    #[test]
    fn test_stats_totals() {
        let mut stats = ResourceStats::default();
        stats.granted_immediately = 3;
        stats.granted_after_wait = 2;
        stats.record_denial(DenialReason::Timeout);
        stats.record_denial(DenialReason::ManagerShutdown);
        assert_eq!(stats.grants(), 5);
        assert_eq!(stats.denials(), 2);
    }
}
