//! CLI argument definitions and shared statics.

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "aps", version, about = "Closed-loop dosing decision CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/aps_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Inputs shared by the commands that replay a snapshot.
#[derive(clap::Args, Debug, Clone)]
pub struct SnapshotArgs {
    /// Cycle snapshot as JSON
    #[arg(long, value_name = "FILE")]
    pub snapshot: PathBuf,

    /// CGM history CSV (timestamp,mg_dl,gap_filled); replaces the snapshot's glucose
    #[arg(long, value_name = "FILE")]
    pub glucose: Option<PathBuf>,

    /// Evaluate as of this instant (RFC 3339) instead of the wall clock
    #[arg(long, value_name = "TIME")]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one decision cycle over a snapshot
    Cycle {
        #[command(flatten)]
        input: SnapshotArgs,
        /// Push the decision through the logging pump driver
        #[arg(long, action = ArgAction::SetTrue)]
        deliver: bool,
        /// Deadline for the cycle in ms
        #[arg(long, value_name = "MS", default_value_t = 2_000)]
        deadline_ms: u64,
    },
    /// Print the predicted glucose series for a snapshot
    Forecast {
        #[command(flatten)]
        input: SnapshotArgs,
    },
    /// Validate the config and build an engine from it
    SelfCheck,
}
