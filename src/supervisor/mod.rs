/*!
 * Supervisor Module
 * The `oss` process: clock writer, resource server and worker launcher
 */

pub mod config;
#[allow(clippy::module_inception)]
mod supervisor;

pub use config::{SupervisorConfig, DEFAULT_LOG_FILE};
pub use supervisor::{RunSummary, Supervisor};
