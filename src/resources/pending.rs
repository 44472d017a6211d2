/*!
 * Pending Requests
 * Client-side handle on a request that is waiting in the arbiter's queue
 */

use super::arbiter::{Command, Reply};
use super::types::{DenialReason, RequestOutcome, ResourceResult};
use crate::core::types::{ClassId, Instances, Ticket, WorkerId};
use std::time::{Duration, Instant};
use tracing::debug;

/// A queued request
///
/// Resolve it with `wait`, `try_outcome` or `cancel`. Dropping an unresolved
/// handle withdraws the request so it does not hold a queue slot forever; if
/// the grant raced ahead of the withdrawal the instances stay with the
/// worker and show up in its holdings.
#[must_use = "dropping a pending request cancels it"]
pub struct PendingRequest {
    ticket: Ticket,
    worker: WorkerId,
    class: ClassId,
    count: Instances,
    replies: flume::Receiver<Reply>,
    commands: flume::Sender<Command>,
    resolved: bool,
}

impl PendingRequest {
    pub(super) fn new(
        ticket: Ticket,
        worker: WorkerId,
        class: ClassId,
        count: Instances,
        replies: flume::Receiver<Reply>,
        commands: flume::Sender<Command>,
    ) -> Self {
        Self {
            ticket,
            worker,
            class,
            count,
            replies,
            commands,
            resolved: false,
        }
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn count(&self) -> Instances {
        self.count
    }

    /// Block until the request resolves
    ///
    /// With a timeout, an unresolved request is withdrawn when it expires and
    /// reported as `Denied(Timeout)`, unless the grant arrived first.
    pub fn wait(mut self, timeout: Option<Duration>) -> ResourceResult<RequestOutcome> {
        let Some(timeout) = timeout else {
            return self.recv_final();
        };

        let deadline = Instant::now() + timeout;
        loop {
            match self.replies.recv_deadline(deadline) {
                Ok(Reply::Outcome(result)) => {
                    self.resolved = true;
                    return result;
                }
                Ok(Reply::Queued) => continue,
                Err(flume::RecvTimeoutError::Timeout) => {
                    return self.withdraw(DenialReason::Timeout);
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    self.resolved = true;
                    return Ok(RequestOutcome::Denied(DenialReason::ManagerShutdown));
                }
            }
        }
    }

    /// Block for the arbiter's first message about this ticket
    pub(super) fn first_reply(&mut self) -> Reply {
        match self.replies.recv() {
            Ok(Reply::Queued) => Reply::Queued,
            Ok(outcome) => {
                self.resolved = true;
                outcome
            }
            Err(_) => {
                self.resolved = true;
                Reply::Outcome(Ok(RequestOutcome::Denied(DenialReason::ManagerShutdown)))
            }
        }
    }

    /// The outcome, if it has already arrived
    pub fn try_outcome(&mut self) -> Option<ResourceResult<RequestOutcome>> {
        if self.resolved {
            return None;
        }
        loop {
            match self.replies.try_recv() {
                Ok(Reply::Outcome(result)) => {
                    self.resolved = true;
                    return Some(result);
                }
                Ok(Reply::Queued) => continue,
                Err(flume::TryRecvError::Empty) => return None,
                Err(flume::TryRecvError::Disconnected) => {
                    self.resolved = true;
                    return Some(Ok(RequestOutcome::Denied(DenialReason::ManagerShutdown)));
                }
            }
        }
    }

    /// Withdraw the request
    ///
    /// Returns the final outcome: `Denied(Cancelled)`, or `Granted` if the
    /// arbiter granted it before seeing the withdrawal.
    pub fn cancel(mut self) -> ResourceResult<RequestOutcome> {
        self.withdraw(DenialReason::Cancelled)
    }

    fn withdraw(&mut self, reason: DenialReason) -> ResourceResult<RequestOutcome> {
        debug!(ticket = self.ticket, worker = self.worker, ?reason, "Withdrawing request");
        if self
            .commands
            .send(Command::Cancel {
                ticket: self.ticket,
                reason,
            })
            .is_err()
        {
            self.resolved = true;
            return Ok(RequestOutcome::Denied(DenialReason::ManagerShutdown));
        }
        self.recv_final()
    }

    fn recv_final(&mut self) -> ResourceResult<RequestOutcome> {
        loop {
            match self.replies.recv() {
                Ok(Reply::Outcome(result)) => {
                    self.resolved = true;
                    return result;
                }
                Ok(Reply::Queued) => continue,
                Err(_) => {
                    self.resolved = true;
                    return Ok(RequestOutcome::Denied(DenialReason::ManagerShutdown));
                }
            }
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.resolved {
            let _ = self.commands.send(Command::Cancel {
                ticket: self.ticket,
                reason: DenialReason::Cancelled,
            });
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("ticket", &self.ticket)
            .field("worker", &self.worker)
            .field("class", &self.class)
            .field("count", &self.count)
            .finish()
    }
}
