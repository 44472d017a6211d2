/*!
 * Worker Workload
 *
 * The simulated user program. Each worker runs on its own thread and
 * touches nothing but the shared clock and the resource manager it
 * attaches to through its `SimContext`. It paces itself on virtual time:
 * every action interval it either releases something it holds or asks for
 * more, and every termination check interval it may decide to exit.
 */

use super::events::DeathNotifier;
use super::types::{ExitReason, WorkerEvent};
use crate::clock::{ClockRole, SimTime, VirtualClock};
use crate::core::context::SimContext;
use crate::core::errors::{SimError, SimResult};
use crate::core::limits::{
    DEFAULT_ACTION_INTERVAL_NANOS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TERMINATION_CHECK_NANOS,
    DEFAULT_WORKER_POLL,
};
use crate::core::types::{Pid, WorkerId};
use crate::monitoring::worker_span;
use crate::resources::{RequestPolicy, ResourceManager, ResourceRole, Submission};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Worker behaviour knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerConfig {
    /// Upper bound of the virtual gap between two actions
    pub action_interval_nanos: u64,
    /// Chance an action is a release when something is held
    pub release_probability: f64,
    /// Virtual time between termination checks
    pub termination_check_nanos: u64,
    /// Chance of terminating at each check
    pub termination_probability: f64,
    /// Chance of crashing at each check, leaving resources behind
    pub crash_probability: f64,
    /// Real time a blocked request waits; `None` waits until resolved
    pub request_timeout: Option<Duration>,
    /// Real time between clock polls
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            action_interval_nanos: DEFAULT_ACTION_INTERVAL_NANOS,
            release_probability: 0.3,
            termination_check_nanos: DEFAULT_TERMINATION_CHECK_NANOS,
            termination_probability: 0.1,
            crash_probability: 0.0,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            poll_interval: DEFAULT_WORKER_POLL,
        }
    }
}

impl WorkerConfig {
    pub fn with_crash_probability(mut self, probability: f64) -> Self {
        self.crash_probability = probability;
        self
    }

    pub fn with_termination_probability(mut self, probability: f64) -> Self {
        self.termination_probability = probability;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        for (name, p) in [
            ("release_probability", self.release_probability),
            ("termination_probability", self.termination_probability),
            ("crash_probability", self.crash_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimError::configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.action_interval_nanos == 0 || self.termination_check_nanos == 0 {
            return Err(SimError::configuration(
                "worker intervals must be positive",
            ));
        }
        Ok(())
    }
}

/// Supervisor's handle on a running worker
#[derive(Debug)]
pub struct WorkerHandle {
    worker: WorkerId,
    pid: Pid,
    kill: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Ask the worker to stop at its next check
    pub fn kill(&self) {
        self.kill.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the worker thread; false if it panicked
    pub fn join(&mut self) -> bool {
        match self.thread.take() {
            Some(thread) => thread.join().is_ok(),
            None => true,
        }
    }
}

/// Launch a worker thread
///
/// The worker reports its exit on `events` exactly once, however it ends.
pub fn spawn_worker(
    ctx: SimContext,
    config: WorkerConfig,
    worker: WorkerId,
    pid: Pid,
    seed: u64,
    events: flume::Sender<WorkerEvent>,
) -> std::io::Result<WorkerHandle> {
    let kill = Arc::new(AtomicBool::new(false));
    let flag = kill.clone();
    let thread = thread::Builder::new()
        .name(format!("worker-{}", pid))
        .spawn(move || {
            let _span = worker_span(worker, pid).entered();
            let mut notifier = DeathNotifier::new(worker, pid, events);
            let mut workload = Workload {
                worker,
                pid,
                config,
                kill: flag,
                rng: StdRng::seed_from_u64(seed),
            };
            let reason = match workload.run(&ctx) {
                Ok(reason) => reason,
                Err(_) if workload.killed() => ExitReason::Killed,
                Err(e) => {
                    warn!(pid, error = %e, "Worker failed");
                    ExitReason::Failed(e.to_string())
                }
            };
            notifier.set_reason(reason);
        })?;

    Ok(WorkerHandle {
        worker,
        pid,
        kill,
        thread: Some(thread),
    })
}

struct Workload {
    worker: WorkerId,
    pid: Pid,
    config: WorkerConfig,
    kill: Arc<AtomicBool>,
    rng: StdRng,
}

impl Workload {
    fn killed(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    fn run(&mut self, ctx: &SimContext) -> SimResult<ExitReason> {
        let clock = VirtualClock::create(ctx, ClockRole::Reader, self.pid)?;
        let manager = ResourceManager::create(ctx, ResourceRole::Client, self.pid)?;

        let start = clock.now()?;
        info!(pid = self.pid, worker = self.worker, %start, "Worker started");

        let mut next_action = self.next_action_after(start);
        let mut next_check = start.plus_nanos(self.config.termination_check_nanos);

        loop {
            if self.killed() {
                return Ok(ExitReason::Killed);
            }

            let now = clock.now()?;
            if now >= next_check {
                next_check = now.plus_nanos(self.config.termination_check_nanos);
                if self.rng.gen_bool(self.config.crash_probability) {
                    warn!(pid = self.pid, %now, "Worker crashing with resources held");
                    return Ok(ExitReason::Crashed);
                }
                if self.rng.gen_bool(self.config.termination_probability) {
                    let released = manager.release_all(self.worker)?;
                    info!(pid = self.pid, %now, released, "Worker terminating");
                    return Ok(ExitReason::Finished);
                }
            }

            if now >= next_action {
                next_action = self.next_action_after(now);
                self.act(&manager)?;
            }

            thread::sleep(self.config.poll_interval);
        }
    }

    fn next_action_after(&mut self, now: SimTime) -> SimTime {
        now.plus_nanos(self.rng.gen_range(1..=self.config.action_interval_nanos))
    }

    /// Release something held or ask for something new
    fn act(&mut self, manager: &ResourceManager) -> SimResult<()> {
        let held = manager.held_by(self.worker)?;
        let holding: Vec<usize> = (0..held.len()).filter(|&c| held[c] > 0).collect();

        if !holding.is_empty() && self.rng.gen_bool(self.config.release_probability) {
            let class = holding[self.rng.gen_range(0..holding.len())];
            let count = self.rng.gen_range(1..=held[class]);
            manager.release_resource(self.worker, class, count)?;
            debug!(pid = self.pid, class, count, "Released");
            return Ok(());
        }

        let class = self.rng.gen_range(0..held.len());
        let total = manager.total(class)?.unwrap_or(0);
        let room = total.saturating_sub(held[class]);
        if room == 0 {
            return Ok(());
        }
        let count = self.rng.gen_range(1..=room);
        let policy = RequestPolicy::Block {
            timeout: self.config.request_timeout,
        };

        match manager.request_resource(self.worker, class, count, policy)? {
            Submission::Granted => debug!(pid = self.pid, class, count, "Granted"),
            Submission::Denied(reason) => {
                debug!(pid = self.pid, class, count, ?reason, "Request denied")
            }
            // Blocking requests always resolve before returning
            Submission::Pending(pending) => drop(pending),
        }
        Ok(())
    }
}
