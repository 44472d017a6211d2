/*!
 * Structured Tracing
 * Subscriber setup for the simulator's log file and per-worker spans
 */

use crate::core::errors::{SimError, SimResult};
use crate::core::types::{Pid, WorkerId};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, info_span, Span};
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Where and how much to log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracingOptions {
    /// Log file; stderr when `None` or when the file cannot be created
    pub log_file: Option<PathBuf>,
    /// Default to `debug` instead of `info` when RUST_LOG is unset
    pub verbose: bool,
    /// One JSON object per event
    pub json: bool,
}

impl TracingOptions {
    /// Options with `json` taken from OSS_TRACE_JSON
    pub fn from_env(log_file: Option<PathBuf>, verbose: bool) -> Self {
        let json = std::env::var("OSS_TRACE_JSON")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);
        Self {
            log_file,
            verbose,
            json,
        }
    }
}

/// Install the global subscriber
///
/// Environment variables:
/// - RUST_LOG: filter directives (default: info, or debug when verbose)
/// - OSS_TRACE_JSON: JSON output (via `TracingOptions::from_env`)
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(options: &TracingOptions) -> SimResult<()> {
    let default_level = if options.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (writer, to_file) = match &options.log_file {
        Some(path) => match File::create(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), true),
            Err(e) => {
                eprintln!(
                    "unable to open log file {}, logging to stderr: {}",
                    path.display(),
                    e
                );
                (BoxMakeWriter::new(std::io::stderr), false)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), false),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if options.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(!to_file)
                    .with_target(false)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init()
    };
    installed.map_err(|e| SimError::internal(format!("tracing already initialized: {}", e)))?;

    info!(
        json = options.json,
        log_file = ?options.log_file,
        "Structured tracing initialized"
    );
    Ok(())
}

/// Span carried by every event a worker thread emits
pub fn worker_span(worker: WorkerId, pid: Pid) -> Span {
    info_span!("worker", worker, pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_logs_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oss.log");
        let options = TracingOptions {
            log_file: Some(path.clone()),
            verbose: true,
            json: false,
        };

        init_tracing(&options).unwrap();
        {
            let _span = worker_span(3, 1003).entered();
            info!("process 1003 has died");
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Structured tracing initialized"));
        assert!(contents.contains("process 1003 has died"));

        // The global subscriber can only be installed once
        assert!(init_tracing(&options).is_err());
    }
}
