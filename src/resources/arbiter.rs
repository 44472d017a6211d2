/*!
 * Resource Arbiter
 *
 * The server-side loop that owns the request queues and is the only writer
 * of the resource table. Clients talk to it over a flume channel published
 * in the shared region; every reply travels on a per-request channel.
 *
 * # Policy
 *
 * Requests are queued FIFO per resource class. A new request is granted on
 * the spot only when nobody is queued ahead of it for that class and enough
 * instances are free; otherwise it waits behind the queue head. Every
 * release, reclaim or cancellation re-evaluates the affected queue from the
 * head, so a large request is never starved by a stream of small ones.
 */

use super::deadlock::DeadlockDetector;
use super::table::ResourceTable;
use super::types::{
    DenialReason, ReclaimReport, RequestOutcome, ResourceError, ResourceResult, ResourceStats,
};
use crate::core::sync::LockOwner;
use crate::core::types::{ClassId, Instances, Ticket, WorkerId};
use crate::ipc::shm::SharedSegment;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Payload of the resource manager's shared region
pub struct ResourceRegion {
    table: ResourceTable,
    commands: flume::Sender<Command>,
    next_ticket: AtomicU64,
}

impl ResourceRegion {
    pub(super) fn new(table: ResourceTable, commands: flume::Sender<Command>) -> Self {
        Self {
            table,
            commands,
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    pub(super) fn next_ticket(&self) -> Ticket {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn commands(&self) -> flume::Sender<Command> {
        self.commands.clone()
    }

    /// Hand a command to the arbiter
    pub(super) fn submit(&self, command: Command) -> ResourceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ResourceError::ManagerUnavailable)
    }
}

/// Messages from clients to the arbiter
pub(super) enum Command {
    Request {
        ticket: Ticket,
        worker: WorkerId,
        class: ClassId,
        count: Instances,
        reply: flume::Sender<Reply>,
    },
    Cancel {
        ticket: Ticket,
        reason: DenialReason,
    },
    Release {
        worker: WorkerId,
        class: ClassId,
        count: Instances,
        reply: flume::Sender<ResourceResult<()>>,
    },
    Reclaim {
        worker: WorkerId,
        reply: flume::Sender<ResourceResult<ReclaimReport>>,
    },
    DetectDeadlock {
        reply: flume::Sender<ResourceResult<Vec<WorkerId>>>,
    },
    Stats {
        reply: flume::Sender<ResourceStats>,
    },
    Shutdown,
}

/// Messages from the arbiter about one request
#[derive(Debug)]
pub(super) enum Reply {
    /// The request is waiting in its class queue
    Queued,
    /// Terminal outcome; always the last message for a ticket
    Outcome(ResourceResult<RequestOutcome>),
}

struct Waiter {
    ticket: Ticket,
    worker: WorkerId,
    count: Instances,
    reply: flume::Sender<Reply>,
}

pub(super) struct Arbiter {
    segment: Arc<SharedSegment<ResourceRegion>>,
    owner: LockOwner,
    commands: flume::Receiver<Command>,
    queues: Vec<VecDeque<Waiter>>,
    stats: ResourceStats,
}

impl Arbiter {
    pub(super) fn new(
        segment: Arc<SharedSegment<ResourceRegion>>,
        owner: LockOwner,
        commands: flume::Receiver<Command>,
    ) -> Self {
        let classes = segment.data().table().class_count();
        Self {
            segment,
            owner,
            commands,
            queues: (0..classes).map(|_| VecDeque::new()).collect(),
            stats: ResourceStats::default(),
        }
    }

    pub(super) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("resource-arbiter".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!(
            classes = self.queues.len(),
            workers = self.table().max_workers(),
            "Resource arbiter started"
        );

        while let Ok(command) = self.commands.recv() {
            match command {
                Command::Request {
                    ticket,
                    worker,
                    class,
                    count,
                    reply,
                } => {
                    let waiter = Waiter {
                        ticket,
                        worker,
                        count,
                        reply,
                    };
                    self.request(waiter, class);
                }
                Command::Cancel { ticket, reason } => self.cancel(ticket, reason),
                Command::Release {
                    worker,
                    class,
                    count,
                    reply,
                } => {
                    let result = self.release(worker, class, count);
                    let _ = reply.send(result);
                }
                Command::Reclaim { worker, reply } => {
                    let result = self.reclaim(worker);
                    let _ = reply.send(result);
                }
                Command::DetectDeadlock { reply } => {
                    let result = self.detect_deadlock();
                    let _ = reply.send(result);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats.clone());
                }
                Command::Shutdown => {
                    self.shutdown();
                    return;
                }
            }
        }

        // Channel closed without an explicit shutdown
        self.shutdown();
    }

    fn table(&self) -> &ResourceTable {
        self.segment.data().table()
    }

    fn try_grant(&self, worker: WorkerId, class: ClassId, count: Instances) -> ResourceResult<bool> {
        Ok(self
            .segment
            .with_locked(self.owner, |region| region.table.try_grant(worker, class, count))?)
    }

    fn request(&mut self, waiter: Waiter, class: ClassId) {
        if self.queues[class].is_empty() {
            match self.try_grant(waiter.worker, class, waiter.count) {
                Ok(true) => {
                    self.stats.granted_immediately += 1;
                    debug!(
                        worker = waiter.worker,
                        class,
                        count = waiter.count,
                        "Granted immediately"
                    );
                    let _ = waiter.reply.send(Reply::Outcome(Ok(RequestOutcome::Granted)));
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    let _ = waiter.reply.send(Reply::Outcome(Err(e)));
                    return;
                }
            }
        }

        if waiter.reply.send(Reply::Queued).is_err() {
            // Requester already gave up
            return;
        }
        debug!(
            worker = waiter.worker,
            class,
            count = waiter.count,
            position = self.queues[class].len(),
            "Request queued"
        );
        self.queues[class].push_back(waiter);
    }

    /// Grant from the head of `class`'s queue for as long as it fits
    fn drain(&mut self, class: ClassId) {
        while let Some(head) = self.queues[class].front() {
            if head.reply.is_disconnected() {
                self.queues[class].pop_front();
                self.stats.record_denial(DenialReason::Cancelled);
                continue;
            }

            match self.try_grant(head.worker, class, head.count) {
                Ok(true) => {
                    if let Some(waiter) = self.queues[class].pop_front() {
                        self.stats.granted_after_wait += 1;
                        debug!(
                            worker = waiter.worker,
                            class,
                            count = waiter.count,
                            "Granted queued request"
                        );
                        let _ = waiter.reply.send(Reply::Outcome(Ok(RequestOutcome::Granted)));
                    }
                }
                Ok(false) => break,
                Err(e) => {
                    error!(class, error = %e, "Resource table unusable, failing queued requests");
                    for waiter in self.queues[class].drain(..) {
                        let _ = waiter.reply.send(Reply::Outcome(Err(e.clone())));
                    }
                    break;
                }
            }
        }
    }

    fn cancel(&mut self, ticket: Ticket, reason: DenialReason) {
        let found = self.queues.iter().enumerate().find_map(|(class, queue)| {
            queue
                .iter()
                .position(|w| w.ticket == ticket)
                .map(|position| (class, position))
        });

        // Not queued: already granted or denied, and that reply is in flight
        let Some((class, position)) = found else {
            return;
        };
        if let Some(waiter) = self.queues[class].remove(position) {
            self.stats.record_denial(reason);
            debug!(worker = waiter.worker, class, ?reason, "Queued request withdrawn");
            let _ = waiter
                .reply
                .send(Reply::Outcome(Ok(RequestOutcome::Denied(reason))));
        }
        if position == 0 {
            self.drain(class);
        }
    }

    fn release(&mut self, worker: WorkerId, class: ClassId, count: Instances) -> ResourceResult<()> {
        self.segment
            .with_locked(self.owner, |region| region.table.release(worker, class, count))??;
        self.stats.releases += 1;
        debug!(worker, class, count, "Released");
        self.drain(class);
        Ok(())
    }

    fn reclaim(&mut self, worker: WorkerId) -> ResourceResult<ReclaimReport> {
        if worker >= self.table().max_workers() {
            return Err(ResourceError::InvalidRequest(format!(
                "worker {} outside 0..{}",
                worker,
                self.table().max_workers()
            )));
        }

        // Drop the worker's queued requests before returning its holdings so
        // a dead worker is never granted anything.
        let mut cancelled = 0;
        let mut touched: Vec<ClassId> = Vec::new();
        for (class, queue) in self.queues.iter_mut().enumerate() {
            let before = queue.len();
            queue.retain(|w| {
                if w.worker != worker {
                    return true;
                }
                let _ = w
                    .reply
                    .send(Reply::Outcome(Ok(RequestOutcome::Denied(DenialReason::Cancelled))));
                false
            });
            let dropped = before - queue.len();
            if dropped > 0 {
                cancelled += dropped;
                touched.push(class);
            }
        }
        for _ in 0..cancelled {
            self.stats.record_denial(DenialReason::Cancelled);
        }

        let mut report = self
            .segment
            .with_locked(self.owner, |region| region.table.reclaim(worker))?;
        report.cancelled_requests = cancelled;

        if !report.is_empty() {
            self.stats.reclaims += 1;
            self.stats.instances_reclaimed += report.instances();
            info!(
                worker,
                instances = report.instances(),
                cancelled,
                "Reclaimed resources of terminated worker"
            );
        }

        touched.extend(report.released.iter().map(|&(class, _)| class));
        touched.sort_unstable();
        touched.dedup();
        for class in touched {
            self.drain(class);
        }
        Ok(report)
    }

    fn detect_deadlock(&mut self) -> ResourceResult<Vec<WorkerId>> {
        self.stats.deadlock_checks += 1;
        let workers = self.table().max_workers();
        let classes = self.queues.len();

        let queues: Vec<Vec<(WorkerId, Instances)>> = self
            .queues
            .iter()
            .map(|queue| queue.iter().map(|w| (w.worker, w.count)).collect())
            .collect();

        let (available, allocation) = self.segment.with_locked(self.owner, |region| {
            let available: Vec<Instances> =
                (0..classes).map(|c| region.table.available(c)).collect();
            let allocation: Vec<Vec<Instances>> =
                (0..workers).map(|w| region.table.held_by(w)).collect();
            (available, allocation)
        })?;

        let deadlocked = DeadlockDetector::detect(&available, &allocation, &queues);
        if !deadlocked.is_empty() {
            warn!(?deadlocked, "Deadlock detected");
        }
        Ok(deadlocked)
    }

    fn shutdown(&mut self) {
        let mut denied = 0;
        for queue in &mut self.queues {
            for waiter in queue.drain(..) {
                let _ = waiter.reply.send(Reply::Outcome(Ok(RequestOutcome::Denied(
                    DenialReason::ManagerShutdown,
                ))));
                denied += 1;
            }
        }
        self.stats.denied_shutdown += denied;
        self.segment.detach(self.owner);
        info!(denied, "Resource arbiter stopped");
    }
}
