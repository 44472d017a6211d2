/*!
 * Death Notification
 * Drop guard that reports a worker's exit to the supervisor
 */

use super::types::{ExitReason, WorkerEvent};
use crate::core::types::{Pid, WorkerId};
use std::thread;
use tracing::warn;

/// Sends `WorkerEvent::Exited` when dropped
///
/// Created first thing on the worker thread so every way out of the
/// workload, including a panic, produces exactly one event. The guard only
/// reports; it never touches shared resource state.
pub struct DeathNotifier {
    worker: WorkerId,
    pid: Pid,
    reason: Option<ExitReason>,
    events: flume::Sender<WorkerEvent>,
}

impl DeathNotifier {
    pub fn new(worker: WorkerId, pid: Pid, events: flume::Sender<WorkerEvent>) -> Self {
        Self {
            worker,
            pid,
            reason: None,
            events,
        }
    }

    /// Record how the worker is about to leave
    pub fn set_reason(&mut self, reason: ExitReason) {
        self.reason = Some(reason);
    }
}

impl Drop for DeathNotifier {
    fn drop(&mut self) {
        let reason = if thread::panicking() {
            ExitReason::Panicked
        } else {
            self.reason.take().unwrap_or(ExitReason::Finished)
        };

        let event = WorkerEvent::Exited {
            worker: self.worker,
            pid: self.pid,
            reason,
        };
        if self.events.send(event).is_err() {
            warn!(pid = self.pid, "Supervisor gone, exit not reported");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_recorded_reason() {
        let (tx, rx) = flume::unbounded();
        {
            let mut notifier = DeathNotifier::new(3, 1003, tx);
            notifier.set_reason(ExitReason::Crashed);
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkerEvent::Exited {
                worker: 3,
                pid: 1003,
                reason: ExitReason::Crashed
            }
        );
    }

    #[test]
    fn test_reports_panic() {
        let (tx, rx) = flume::unbounded();
        let result = thread::spawn(move || {
            let _notifier = DeathNotifier::new(0, 1000, tx);
            panic!("workload blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkerEvent::Exited {
                reason: ExitReason::Panicked,
                ..
            }
        ));
    }
}
