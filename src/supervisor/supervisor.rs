/*!
 * Supervisor
 *
 * The `oss` main loop. Owns the clock (writer), the resource manager
 * (server) and the census. Each tick advances virtual time by a random
 * amount, reaps dead workers and returns their resources, launches a new
 * worker when one is due, and periodically breaks deadlocks by killing the
 * lowest-numbered worker on a wait cycle.
 */

use super::config::SupervisorConfig;
use crate::clock::{ClockRole, SimTime, VirtualClock};
use crate::core::context::SimContext;
use crate::core::errors::SimResult;
use crate::core::limits::SUPERVISOR_PID;
use crate::core::types::WorkerId;
use crate::process::{
    spawn_worker, CensusSnapshot, ExitReason, ProcessCensus, WorkerEvent, WorkerHandle,
};
use crate::resources::{ResourceManager, ResourceRole, ResourceStats, TableSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, instrument, warn};

/// What a finished run looked like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub seed: u64,
    pub final_time: SimTime,
    pub interrupted: bool,
    pub ticks: u64,
    pub census: CensusSnapshot,
    pub crashes: u64,
    pub deadlocks_resolved: u64,
    pub grants: u64,
    pub denials: u64,
    pub resources: ResourceStats,
}

pub struct Supervisor {
    config: SupervisorConfig,
    seed: u64,
    ctx: SimContext,
    clock: VirtualClock,
    manager: ResourceManager,
    census: ProcessCensus,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    events: flume::Sender<WorkerEvent>,
    inbox: flume::Receiver<WorkerEvent>,
    rng: StdRng,
    interrupted: Arc<AtomicBool>,
    now: SimTime,
    last_spawn: Option<SimTime>,
    spawn_gap: u64,
    last_deadlock_check: SimTime,
    ticks: u64,
    crashes: u64,
    deadlocks_resolved: u64,
    summary: Option<RunSummary>,
}

impl Supervisor {
    /// Build the shared clock and resource table for a fresh run
    #[instrument(skip(config), fields(max_workers = config.max_workers))]
    pub fn new(config: SupervisorConfig) -> SimResult<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let table = TableSpec::random(
            &mut rng,
            config.resource_classes,
            config.class_instances.clone(),
            config.max_workers,
        );
        let ctx = SimContext::new(table).with_sync(config.sync);

        let clock = VirtualClock::create(&ctx, ClockRole::Writer, SUPERVISOR_PID)?;
        let manager = ResourceManager::create(&ctx, ResourceRole::Server, SUPERVISOR_PID)?;
        let (events, inbox) = flume::unbounded();

        info!(
            seed,
            classes = ctx.table.class_count(),
            totals = ?ctx.table.totals,
            "Supervisor ready"
        );

        Ok(Self {
            census: ProcessCensus::new(config.max_workers),
            config,
            seed,
            ctx,
            clock,
            manager,
            workers: BTreeMap::new(),
            events,
            inbox,
            rng,
            interrupted: Arc::new(AtomicBool::new(false)),
            now: SimTime::ZERO,
            last_spawn: None,
            spawn_gap: 0,
            last_deadlock_check: SimTime::ZERO,
            ticks: 0,
            crashes: 0,
            deadlocks_resolved: 0,
            summary: None,
        })
    }

    /// Flag that stops the loop at the next tick; hand it to a signal handler
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    pub fn census(&self) -> &ProcessCensus {
        &self.census
    }

    /// Virtual time as of the last tick
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Run until interrupted or a configured limit is reached
    pub fn run(mut self) -> SimResult<RunSummary> {
        let outcome = self.run_loop();
        if let Err(e) = &outcome {
            error!(error = %e, "Supervisor loop failed");
        }
        let summary = self.shutdown();
        outcome?;
        summary
    }

    fn run_loop(&mut self) -> SimResult<()> {
        loop {
            if self.is_interrupted() {
                info!(now = %self.now, "Interrupted");
                return Ok(());
            }
            let now = self.tick()?;
            if self.limits_reached(now) {
                info!(%now, "Run limit reached");
                return Ok(());
            }
            thread::sleep(self.config.tick_sleep);
        }
    }

    fn limits_reached(&self, now: SimTime) -> bool {
        if self
            .config
            .max_virtual_seconds
            .is_some_and(|limit| now.seconds >= limit)
        {
            return true;
        }
        self.config
            .max_spawns
            .is_some_and(|limit| self.census.spawned() >= limit && self.census.active() == 0)
    }

    /// One iteration of the supervisor loop
    pub fn tick(&mut self) -> SimResult<SimTime> {
        let now = self.advance_clock()?;
        self.now = now;
        self.ticks += 1;
        debug!(%now, active = self.census.active(), "Tick");

        self.reap()?;
        self.maybe_spawn(now)?;
        self.maybe_check_deadlock(now)?;
        Ok(now)
    }

    fn advance_clock(&mut self) -> SimResult<SimTime> {
        let delta = self.rng.gen_range(0..self.config.max_tick_advance_nanos);

        self.clock.lock()?;
        let advanced = self
            .clock
            .advance(delta)
            .and_then(|_| self.clock.snapshot());
        let unlocked = self.clock.unlock();

        let now = advanced?;
        unlocked?;
        Ok(now)
    }

    /// Handle every death reported since the last tick
    fn reap(&mut self) -> SimResult<()> {
        while let Ok(event) = self.inbox.try_recv() {
            self.handle_exit(event)?;
        }
        Ok(())
    }

    fn handle_exit(&mut self, event: WorkerEvent) -> SimResult<()> {
        let WorkerEvent::Exited {
            worker,
            pid,
            reason,
        } = event;

        if self.census.pid_of(worker) != Some(pid) {
            warn!(worker, pid, "Exit reported for unknown worker");
            return Ok(());
        }
        info!(pid, worker, ?reason, "process {} has died", pid);

        let report = self.manager.force_reclaim(worker)?;
        if !report.is_empty() {
            info!(
                pid,
                instances = report.instances(),
                cancelled = report.cancelled_requests,
                "Reclaimed resources"
            );
        }
        if matches!(reason, ExitReason::Crashed | ExitReason::Panicked) {
            self.crashes += 1;
        }

        if let Some(mut handle) = self.workers.remove(&worker) {
            if !handle.join() {
                warn!(pid, "Worker thread panicked");
            }
        }
        self.census.retire(worker, pid);
        Ok(())
    }

    fn spawn_due(&self, now: SimTime) -> bool {
        if self
            .config
            .max_spawns
            .is_some_and(|limit| self.census.spawned() >= limit)
        {
            return false;
        }
        match self.last_spawn {
            None => true,
            Some(last) => now.nanos_since(last) >= self.spawn_gap as u128,
        }
    }

    fn maybe_spawn(&mut self, now: SimTime) -> SimResult<()> {
        if !self.spawn_due(now) {
            return Ok(());
        }
        let Some((worker, pid)) = self.census.admit() else {
            return Ok(());
        };

        let seed = self.rng.gen();
        let handle = match spawn_worker(
            self.ctx.clone(),
            self.config.worker,
            worker,
            pid,
            seed,
            self.events.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                self.census.abort(worker);
                return Err(e.into());
            }
        };
        self.workers.insert(worker, handle);
        self.last_spawn = Some(now);
        self.spawn_gap = self.rng.gen_range(0..self.config.spawn_interval_nanos);

        info!(pid, worker, %now, "spawned a new process: {}", pid);
        info!(
            "there are now {} processes in the system",
            self.census.active()
        );
        Ok(())
    }

    fn maybe_check_deadlock(&mut self, now: SimTime) -> SimResult<()> {
        if now.nanos_since(self.last_deadlock_check) < self.config.deadlock_check_nanos as u128 {
            return Ok(());
        }
        self.last_deadlock_check = now;

        let deadlocked = self.manager.detect_deadlock()?;
        let Some(&victim) = deadlocked.first() else {
            return Ok(());
        };
        let Some(handle) = self.workers.get(&victim) else {
            return Ok(());
        };

        warn!(
            victim = handle.pid(),
            ?deadlocked,
            %now,
            "Breaking deadlock"
        );
        handle.kill();
        // Cancels the victim's queued request so it can see the kill switch
        self.manager.force_reclaim(victim)?;
        self.deadlocks_resolved += 1;
        Ok(())
    }

    /// Stop every worker and tear down the shared regions
    ///
    /// Idempotent; the summary of the first call is returned again.
    pub fn shutdown(&mut self) -> SimResult<RunSummary> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }

        let final_time = self.clock.now().unwrap_or(self.now);
        let interrupted = self.is_interrupted();
        if interrupted {
            eprintln!("\n--- interrupted; dumping information about last run ---");
            eprintln!("log file: {}", self.config.log_file.display());
            eprintln!("time now: {}", final_time);
        }

        for handle in self.workers.values() {
            handle.kill();
        }
        let resources = self.manager.stats().unwrap_or_else(|e| {
            warn!(error = %e, "Resource statistics unavailable");
            ResourceStats::default()
        });

        // Denies whatever is still queued so blocked workers wake up
        let teardown = self.manager.destroy();
        for (_, mut handle) in std::mem::take(&mut self.workers) {
            if !handle.join() {
                warn!(pid = handle.pid(), "Worker thread panicked");
            }
        }
        while let Ok(WorkerEvent::Exited { worker, pid, .. }) = self.inbox.try_recv() {
            self.census.retire(worker, pid);
        }
        let clock_teardown = self.clock.destroy();

        let summary = RunSummary {
            seed: self.seed,
            final_time,
            interrupted,
            ticks: self.ticks,
            census: self.census.snapshot(),
            crashes: self.crashes,
            deadlocks_resolved: self.deadlocks_resolved,
            grants: resources.grants(),
            denials: resources.denials(),
            resources,
        };
        self.summary = Some(summary.clone());
        info!(
            final_time = %summary.final_time,
            spawned = summary.census.spawned,
            terminated = summary.census.terminated,
            "Simulation finished"
        );

        teardown?;
        clock_teardown?;
        Ok(summary)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.summary.is_none() {
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "Supervisor teardown failed");
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("seed", &self.seed)
            .field("now", &self.now)
            .field("active", &self.census.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::SyncConfig;
    use std::time::Duration;

    fn quiet_config() -> SupervisorConfig {
        SupervisorConfig::default()
            .with_seed(Some(11))
            .with_max_workers(2)
            .with_resources(3, 1..=3)
            .with_tick_sleep(Duration::from_millis(1))
            .with_sync(SyncConfig::strict())
    }

    #[test]
    fn test_first_tick_spawns() {
        let mut supervisor = Supervisor::new(quiet_config()).unwrap();
        let now = supervisor.tick().unwrap();
        assert!(now.nanos < 1_000_000_000);
        assert_eq!(supervisor.census().spawned(), 1);
        supervisor.shutdown().unwrap();
    }

    #[test]
    fn test_ticks_are_monotonic() {
        let mut supervisor =
            Supervisor::new(quiet_config().with_max_spawns(Some(0))).unwrap();
        let mut last = SimTime::ZERO;
        for _ in 0..20 {
            let now = supervisor.tick().unwrap();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(supervisor.census().spawned(), 0);
    }

    #[test]
    fn test_spawn_waits_for_gap_since_last_spawn() {
        let mut supervisor = Supervisor::new(quiet_config()).unwrap();
        supervisor.tick().unwrap();
        assert_eq!(supervisor.census().spawned(), 1);

        supervisor.spawn_gap = u64::MAX;
        for _ in 0..5 {
            supervisor.tick().unwrap();
        }
        assert_eq!(supervisor.census().spawned(), 1);

        supervisor.spawn_gap = 0;
        supervisor.tick().unwrap();
        assert_eq!(supervisor.census().spawned(), 2);
        supervisor.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut supervisor = Supervisor::new(quiet_config()).unwrap();
        supervisor.tick().unwrap();
        let first = supervisor.shutdown().unwrap();
        let second = supervisor.shutdown().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.census.active, 0);
        assert!(supervisor.context().namespace.is_empty());
    }
}
