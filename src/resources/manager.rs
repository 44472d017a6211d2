/*!
 * Resource Manager
 * Role-specific handle onto the shared resource table
 */

use super::arbiter::{Arbiter, Command, Reply, ResourceRegion};
use super::pending::PendingRequest;
use super::table::{ResourceTable, TableLayout};
use super::types::{
    DenialReason, ReclaimReport, RequestOutcome, RequestPolicy, ResourceError, ResourceResult,
    ResourceRole, ResourceStats,
};
use crate::core::context::SimContext;
use crate::core::sync::LockOwner;
use crate::core::types::{ClassId, Instances, IpcKey, Pid, WorkerId};
use crate::ipc::shm::{SharedSegment, ShmNamespace};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Immediate result of `request_resource`
#[derive(Debug)]
pub enum Submission {
    Granted,
    /// Queued; only returned under `RequestPolicy::NonBlocking`
    Pending(PendingRequest),
    Denied(DenialReason),
}

impl Submission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Submission::Granted)
    }

    pub fn into_pending(self) -> Option<PendingRequest> {
        match self {
            Submission::Pending(pending) => Some(pending),
            _ => None,
        }
    }
}

impl From<RequestOutcome> for Submission {
    fn from(outcome: RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Granted => Submission::Granted,
            RequestOutcome::Denied(reason) => Submission::Denied(reason),
        }
    }
}

/// One participant's handle onto the resource manager
///
/// The server creates the table and runs the arbiter thread; clients only
/// send it commands. Every table mutation happens on the arbiter under the
/// region lock.
pub struct ResourceManager {
    role: ResourceRole,
    pid: Pid,
    key: IpcKey,
    owner: LockOwner,
    namespace: Arc<ShmNamespace>,
    segment: Option<Arc<SharedSegment<ResourceRegion>>>,
    arbiter: Option<JoinHandle<()>>,
}

impl ResourceManager {
    /// Create (server) or attach to (client) the resource table of `ctx`
    #[instrument(skip(ctx), fields(key = ctx.resource_key))]
    pub fn create(ctx: &SimContext, role: ResourceRole, pid: Pid) -> ResourceResult<Self> {
        match role {
            ResourceRole::Server => Self::create_server(ctx, pid),
            ResourceRole::Client => {
                let (segment, owner) = ctx
                    .namespace
                    .attach::<ResourceRegion>(ctx.resource_key, pid)?;
                debug!(pid, "Resource client attached");
                Ok(Self {
                    role,
                    pid,
                    key: ctx.resource_key,
                    owner,
                    namespace: ctx.namespace.clone(),
                    segment: Some(segment),
                    arbiter: None,
                })
            }
        }
    }

    fn create_server(ctx: &SimContext, pid: Pid) -> ResourceResult<Self> {
        ctx.table.validate()?;

        let (commands, inbox) = flume::unbounded();
        let region = ResourceRegion::new(ResourceTable::new(&ctx.table), commands);
        let (segment, owner) = ctx
            .namespace
            .create(ctx.resource_key, pid, ctx.sync, region)?;

        let mut manager = Self {
            role: ResourceRole::Server,
            pid,
            key: ctx.resource_key,
            owner,
            namespace: ctx.namespace.clone(),
            segment: Some(segment.clone()),
            arbiter: None,
        };

        // The arbiter locks the table under its own attachment
        let (arbiter_segment, arbiter_owner) = match ctx
            .namespace
            .attach::<ResourceRegion>(ctx.resource_key, pid)
        {
            Ok(attached) => attached,
            Err(e) => {
                manager.release_region(&segment);
                manager.segment = None;
                return Err(e.into());
            }
        };

        match Arbiter::new(arbiter_segment, arbiter_owner, inbox).spawn() {
            Ok(handle) => manager.arbiter = Some(handle),
            Err(e) => {
                segment.detach(arbiter_owner);
                manager.release_region(&segment);
                manager.segment = None;
                return Err(ResourceError::ResourceUnavailable(format!(
                    "failed to start arbiter: {}",
                    e
                )));
            }
        }

        info!(
            pid,
            classes = ctx.table.class_count(),
            max_workers = ctx.table.max_workers,
            "Resource manager created"
        );
        Ok(manager)
    }

    pub fn role(&self) -> ResourceRole {
        self.role
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn region(&self) -> ResourceResult<&SharedSegment<ResourceRegion>> {
        match self.segment.as_deref() {
            Some(segment) if !segment.is_removed() => Ok(segment),
            _ => Err(ResourceError::ManagerUnavailable),
        }
    }

    fn require_server(&self, operation: &str) -> ResourceResult<()> {
        if self.role != ResourceRole::Server {
            return Err(ResourceError::WrongRole {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Ask for `count` instances of `class` on behalf of `worker`
    ///
    /// Granted on the spot when nobody is queued for the class and enough
    /// instances are free; otherwise the request joins the class queue and
    /// `policy` decides whether to wait for it.
    pub fn request_resource(
        &self,
        worker: WorkerId,
        class: ClassId,
        count: Instances,
        policy: RequestPolicy,
    ) -> ResourceResult<Submission> {
        let region = self.region()?;
        let data = region.data();
        data.table().validate_request(worker, class, count)?;

        let ticket = data.next_ticket();
        let (reply, replies) = flume::unbounded();
        data.submit(Command::Request {
            ticket,
            worker,
            class,
            count,
            reply,
        })?;
        let pending = PendingRequest::new(ticket, worker, class, count, replies, data.commands());

        match policy {
            RequestPolicy::Block { timeout } => Ok(pending.wait(timeout)?.into()),
            RequestPolicy::NonBlocking => Self::first_reply(pending),
        }
    }

    /// Wait for the arbiter's first word on a fresh request
    fn first_reply(mut pending: PendingRequest) -> ResourceResult<Submission> {
        match pending.first_reply() {
            Reply::Queued => Ok(Submission::Pending(pending)),
            Reply::Outcome(result) => Ok(result?.into()),
        }
    }

    /// Give back `count` instances of `class` held by `worker`
    ///
    /// Fails with `InvalidRelease` and leaves the table untouched when the
    /// worker holds fewer than `count`.
    pub fn release_resource(
        &self,
        worker: WorkerId,
        class: ClassId,
        count: Instances,
    ) -> ResourceResult<()> {
        let data = self.region()?.data();
        data.table().validate_target(worker, class)?;
        if count == 0 {
            return Ok(());
        }

        let (reply, result) = flume::bounded(1);
        data.submit(Command::Release {
            worker,
            class,
            count,
            reply,
        })?;
        result
            .recv()
            .map_err(|_| ResourceError::ManagerUnavailable)?
    }

    /// Release everything `worker` holds, class by class
    pub fn release_all(&self, worker: WorkerId) -> ResourceResult<Instances> {
        let held = self.region()?.data().table().held_by(worker);
        let mut released = 0;
        for (class, count) in held.into_iter().enumerate() {
            if count > 0 {
                self.release_resource(worker, class, count)?;
                released += count;
            }
        }
        Ok(released)
    }

    /// Take back everything a terminated worker holds; server only
    ///
    /// The worker's queued requests are denied with `Cancelled` first.
    /// Reclaiming a worker that holds nothing is a no-op.
    #[instrument(skip(self), fields(pid = self.pid))]
    pub fn force_reclaim(&self, worker: WorkerId) -> ResourceResult<ReclaimReport> {
        self.require_server("force_reclaim")?;
        let (reply, result) = flume::bounded(1);
        self.region()?.data().submit(Command::Reclaim { worker, reply })?;
        result
            .recv()
            .map_err(|_| ResourceError::ManagerUnavailable)?
    }

    /// Workers stuck on a wait cycle, lowest id first; server only
    pub fn detect_deadlock(&self) -> ResourceResult<Vec<WorkerId>> {
        self.require_server("detect_deadlock")?;
        let (reply, result) = flume::bounded(1);
        self.region()?
            .data()
            .submit(Command::DetectDeadlock { reply })?;
        result
            .recv()
            .map_err(|_| ResourceError::ManagerUnavailable)?
    }

    pub fn stats(&self) -> ResourceResult<ResourceStats> {
        let (reply, result) = flume::bounded(1);
        self.region()?.data().submit(Command::Stats { reply })?;
        result.recv().map_err(|_| ResourceError::ManagerUnavailable)
    }

    /// Consistent copy of the whole table taken under the region lock
    pub fn snapshot(&self) -> ResourceResult<TableLayout> {
        let region = self.region()?;
        Ok(region.with_locked(self.owner, |data| data.table().layout())?)
    }

    pub fn held(&self, worker: WorkerId, class: ClassId) -> ResourceResult<Instances> {
        Ok(self.region()?.data().table().held(worker, class))
    }

    pub fn held_by(&self, worker: WorkerId) -> ResourceResult<Vec<Instances>> {
        Ok(self.region()?.data().table().held_by(worker))
    }

    pub fn available(&self, class: ClassId) -> ResourceResult<Instances> {
        Ok(self.region()?.data().table().available(class))
    }

    pub fn total(&self, class: ClassId) -> ResourceResult<Option<Instances>> {
        Ok(self.region()?.data().table().total(class))
    }

    pub fn class_count(&self) -> ResourceResult<usize> {
        Ok(self.region()?.data().table().class_count())
    }

    /// Tear down this handle; safe to call repeatedly
    ///
    /// The server denies every queued request with `ManagerShutdown`, stops
    /// the arbiter and removes the table, after which every client operation
    /// fails with `ManagerUnavailable`. A client only detaches.
    #[instrument(skip(self), fields(pid = self.pid, role = ?self.role))]
    pub fn destroy(&mut self) -> ResourceResult<()> {
        let Some(segment) = self.segment.take() else {
            return Ok(());
        };

        if self.role == ResourceRole::Server {
            self.stop_arbiter(&segment);
        }
        self.release_region(&segment);
        info!("Resource manager destroyed");
        Ok(())
    }

    fn stop_arbiter(&mut self, segment: &SharedSegment<ResourceRegion>) {
        let Some(handle) = self.arbiter.take() else {
            return;
        };
        if segment.data().submit(Command::Shutdown).is_err() {
            warn!("Arbiter already stopped");
        }
        if handle.join().is_err() {
            error!("Resource arbiter panicked");
        }
    }

    fn release_region(&self, segment: &SharedSegment<ResourceRegion>) {
        segment.detach(self.owner);
        if self.role == ResourceRole::Server {
            if let Err(e) = self.namespace.remove(self.key, self.pid) {
                warn!(error = %e, "Resource table already gone");
            }
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!(error = %e, "Resource manager teardown failed");
        }
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("destroyed", &self.segment.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::SyncConfig;
    use crate::resources::TableSpec;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ctx(totals: Vec<Instances>) -> SimContext {
        SimContext::new(TableSpec::new(totals, 4)).with_sync(SyncConfig::strict())
    }

    #[test]
    fn test_client_without_server_fails() {
        let err = ResourceManager::create(&ctx(vec![1]), ResourceRole::Client, 2).unwrap_err();
        assert!(matches!(err, ResourceError::ResourceUnavailable(_)));
    }

    #[test]
    fn test_immediate_grant() {
        let ctx = ctx(vec![3]);
        let server = ResourceManager::create(&ctx, ResourceRole::Server, 1).unwrap();
        let client = ResourceManager::create(&ctx, ResourceRole::Client, 2).unwrap();

        let submission = client
            .request_resource(0, 0, 2, RequestPolicy::NonBlocking)
            .unwrap();
        assert!(submission.is_granted());
        assert_eq!(server.held(0, 0).unwrap(), 2);
        assert_eq!(server.available(0).unwrap(), 1);
    }

    #[test]
    fn test_invalid_request_rejected() {
        let ctx = ctx(vec![3]);
        let server = ResourceManager::create(&ctx, ResourceRole::Server, 1).unwrap();
        let policy = RequestPolicy::NonBlocking;
        assert!(matches!(
            server.request_resource(0, 0, 4, policy),
            Err(ResourceError::InvalidRequest(_))
        ));
        assert!(matches!(
            server.request_resource(0, 1, 1, policy),
            Err(ResourceError::InvalidRequest(_))
        ));
        assert!(matches!(
            server.request_resource(9, 0, 1, policy),
            Err(ResourceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_client_cannot_reclaim() {
        let ctx = ctx(vec![1]);
        let _server = ResourceManager::create(&ctx, ResourceRole::Server, 1).unwrap();
        let client = ResourceManager::create(&ctx, ResourceRole::Client, 2).unwrap();
        assert!(matches!(
            client.force_reclaim(0),
            Err(ResourceError::WrongRole { .. })
        ));
        assert!(matches!(
            client.detect_deadlock(),
            Err(ResourceError::WrongRole { .. })
        ));
    }

    #[test]
    fn test_blocking_request_times_out() {
        let ctx = ctx(vec![1]);
        let server = ResourceManager::create(&ctx, ResourceRole::Server, 1).unwrap();
        assert!(server
            .request_resource(0, 0, 1, RequestPolicy::NonBlocking)
            .unwrap()
            .is_granted());

        let submission = server
            .request_resource(1, 0, 1, RequestPolicy::blocking_for(Duration::from_millis(20)))
            .unwrap();
        assert!(matches!(submission, Submission::Denied(DenialReason::Timeout)));
        assert_eq!(server.stats().unwrap().denied_timeout, 1);
    }

    #[test]
    fn test_release_all() {
        let ctx = ctx(vec![2, 2]);
        let server = ResourceManager::create(&ctx, ResourceRole::Server, 1).unwrap();
        let policy = RequestPolicy::NonBlocking;
        assert!(server.request_resource(1, 0, 2, policy).unwrap().is_granted());
        assert!(server.request_resource(1, 1, 1, policy).unwrap().is_granted());

        assert_eq!(server.release_all(1).unwrap(), 3);
        assert_eq!(server.held_by(1).unwrap(), vec![0, 0]);
        assert!(server.snapshot().unwrap().is_conserved());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let ctx = ctx(vec![1]);
        let mut server = ResourceManager::create(&ctx, ResourceRole::Server, 1).unwrap();
        server.destroy().unwrap();
        server.destroy().unwrap();
        assert!(!ctx.namespace.contains(ctx.resource_key));
        assert_eq!(server.stats(), Err(ResourceError::ManagerUnavailable));
    }
}
