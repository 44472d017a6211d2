/*!
 * OSS - Main Entry Point
 *
 * Runs the supervisor: advances the shared virtual clock, launches workers,
 * reaps them and returns their resources until interrupted with ^C or a
 * run limit is reached.
 */

use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};
use oss_sim::{init_tracing, Supervisor, SupervisorConfig, TracingOptions};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::info;

/// Virtual-clock process and resource manager simulator.
#[derive(Debug, Parser)]
#[clap(name = "oss", version)]
struct Opts {
    /// Log events to this file.
    #[clap(short = 'l', long, default_value = "oss.log")]
    log_file: PathBuf,

    /// Verbose mode. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Maximum number of workers alive at once.
    #[clap(short = 'n', long)]
    max_workers: Option<usize>,

    /// Seed for a reproducible run.
    #[clap(short = 's', long)]
    seed: Option<u64>,

    /// Stop after this many virtual seconds.
    #[clap(short = 't', long)]
    max_seconds: Option<u64>,

    /// Stop launching after this many workers and exit once they are gone.
    #[clap(long)]
    max_spawns: Option<u64>,

    /// Real milliseconds between supervisor ticks.
    #[clap(long)]
    tick_ms: Option<u64>,
}

impl Opts {
    fn apply(&self, mut config: SupervisorConfig) -> SupervisorConfig {
        config = config
            .with_log_file(self.log_file.clone())
            .with_verbose(self.verbose > 0);
        if let Some(n) = self.max_workers {
            config = config.with_max_workers(n);
        }
        if self.seed.is_some() {
            config = config.with_seed(self.seed);
        }
        if self.max_seconds.is_some() {
            config = config.with_max_virtual_seconds(self.max_seconds);
        }
        if self.max_spawns.is_some() {
            config = config.with_max_spawns(self.max_spawns);
        }
        if let Some(ms) = self.tick_ms {
            config = config.with_tick_sleep(Duration::from_millis(ms));
        }
        config
    }
}

fn main() -> miette::Result<()> {
    let opts = Opts::parse();
    let config = opts.apply(SupervisorConfig::from_env()?);

    init_tracing(&TracingOptions::from_env(
        Some(config.log_file.clone()),
        config.verbose,
    ))?;

    let supervisor = Supervisor::new(config)?;
    let interrupted = supervisor.interrupt_flag();
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::Release);
    })
    .into_diagnostic()
    .wrap_err("Error setting Ctrl-C handler")?;

    eprintln!("press ^C to stop the simulation");
    let summary = supervisor.run()?;

    let json = serde_json::to_string(&summary).into_diagnostic()?;
    info!(summary = %json, "Run summary");
    Ok(())
}
