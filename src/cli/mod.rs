//! Command-line interface
//!
//! `gradmin` drives the orchestration engine against a simulated fleet kept
//! in a JSON file, one operation per invocation.

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, ClusterSetTarget, ClusterTarget, Command, FleetAction};
pub use commands::{run, run_command, Outcome};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
