/*!
 * Supervisor Configuration
 *
 * Run parameters with builder-style setters and environment overrides
 */

use crate::core::errors::{SimError, SimResult};
use crate::core::limits::{
    DEFAULT_DEADLOCK_CHECK_NANOS, DEFAULT_MAX_TICK_ADVANCE_NANOS, DEFAULT_RESOURCE_CLASSES,
    DEFAULT_SPAWN_INTERVAL_NANOS, DEFAULT_TICK_SLEEP, MAX_CLASS_INSTANCES, MAX_WORKERS,
    MIN_CLASS_INSTANCES,
};
use crate::core::sync::SyncConfig;
use crate::core::types::Instances;
use crate::process::WorkerConfig;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default log file of a run
pub const DEFAULT_LOG_FILE: &str = "oss.log";

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Most workers alive at once; also the rows of the resource table
    pub max_workers: usize,
    /// Real time slept between ticks
    pub tick_sleep: Duration,
    /// Upper bound (exclusive) of one clock advance
    pub max_tick_advance_nanos: u64,
    /// Upper bound (exclusive) of the virtual gap between spawns
    pub spawn_interval_nanos: u64,
    /// Stop once virtual time reaches this many seconds
    pub max_virtual_seconds: Option<u64>,
    /// Stop spawning after this many workers, and stop the run once they are gone
    pub max_spawns: Option<u64>,
    /// Virtual time between deadlock detection passes
    pub deadlock_check_nanos: u64,
    pub resource_classes: usize,
    pub class_instances: RangeInclusive<Instances>,
    pub log_file: PathBuf,
    pub verbose: bool,
    /// Fixed seed for a reproducible run
    pub seed: Option<u64>,
    pub sync: SyncConfig,
    pub worker: WorkerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: MAX_WORKERS,
            tick_sleep: DEFAULT_TICK_SLEEP,
            max_tick_advance_nanos: DEFAULT_MAX_TICK_ADVANCE_NANOS,
            spawn_interval_nanos: DEFAULT_SPAWN_INTERVAL_NANOS,
            max_virtual_seconds: None,
            max_spawns: None,
            deadlock_check_nanos: DEFAULT_DEADLOCK_CHECK_NANOS,
            resource_classes: DEFAULT_RESOURCE_CLASSES,
            class_instances: MIN_CLASS_INSTANCES..=MAX_CLASS_INSTANCES,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            verbose: false,
            seed: None,
            sync: SyncConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `OSS_*` environment variables
    ///
    /// - OSS_MAX_WORKERS: concurrent worker ceiling
    /// - OSS_SEED: RNG seed
    /// - OSS_MAX_SECONDS: virtual run limit
    /// - OSS_MAX_SPAWNS: total spawn limit
    /// - OSS_TICK_MS: real sleep between ticks
    /// - OSS_LOG_FILE: log file path
    pub fn from_env() -> SimResult<Self> {
        let mut config = Self::default();
        if let Some(n) = env_parse("OSS_MAX_WORKERS")? {
            config.max_workers = n;
        }
        if let Some(seed) = env_parse("OSS_SEED")? {
            config.seed = Some(seed);
        }
        if let Some(secs) = env_parse("OSS_MAX_SECONDS")? {
            config.max_virtual_seconds = Some(secs);
        }
        if let Some(spawns) = env_parse("OSS_MAX_SPAWNS")? {
            config.max_spawns = Some(spawns);
        }
        if let Some(ms) = env_parse("OSS_TICK_MS")? {
            config.tick_sleep = Duration::from_millis(ms);
        }
        if let Ok(path) = std::env::var("OSS_LOG_FILE") {
            config.log_file = PathBuf::from(path);
        }
        Ok(config)
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_tick_sleep(mut self, tick_sleep: Duration) -> Self {
        self.tick_sleep = tick_sleep;
        self
    }

    pub fn with_max_virtual_seconds(mut self, seconds: Option<u64>) -> Self {
        self.max_virtual_seconds = seconds;
        self
    }

    pub fn with_max_spawns(mut self, spawns: Option<u64>) -> Self {
        self.max_spawns = spawns;
        self
    }

    pub fn with_resources(mut self, classes: usize, instances: RangeInclusive<Instances>) -> Self {
        self.resource_classes = classes;
        self.class_instances = instances;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.max_workers == 0 {
            return Err(SimError::configuration("max_workers must be at least 1"));
        }
        if self.resource_classes == 0 {
            return Err(SimError::configuration(
                "at least one resource class is required",
            ));
        }
        if *self.class_instances.start() == 0
            || self.class_instances.start() > self.class_instances.end()
        {
            return Err(SimError::configuration(format!(
                "invalid instance range {}..={}",
                self.class_instances.start(),
                self.class_instances.end()
            )));
        }
        if self.max_tick_advance_nanos == 0
            || self.spawn_interval_nanos == 0
            || self.deadlock_check_nanos == 0
        {
            return Err(SimError::configuration("virtual intervals must be positive"));
        }
        self.worker.validate()
    }
}

fn env_parse<T: FromStr>(name: &str) -> SimResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SimError::configuration(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}
