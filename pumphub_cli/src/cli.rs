//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "pumphub", version, about = "Pump coordinator CLI")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/pumphub.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator against simulated devices
    Run {
        /// Stop after this many real seconds (runs until Ctrl-C when absent)
        #[arg(long, value_name = "SECS")]
        duration_secs: Option<u64>,

        /// Real milliseconds per simulation tick
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        tick_ms: u64,

        /// Simulated seconds that pass per tick
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        accel: u64,

        /// Deliver one bolus of this many units at startup
        #[arg(long, value_name = "UNITS")]
        bolus: Option<f64>,
    },
    /// Parse and validate the config file, then exit
    CheckConfig,
}
