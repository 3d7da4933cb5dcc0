//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "dispenser", version, about = "Pill dispenser control")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

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
    /// Run the dispenser control loop on the simulated bench.
    ///
    /// The console stays live during the run: `read` dumps the stored log,
    /// `erase` clears it, anything else is rejected.
    Run {
        /// Pills per cycle (overrides config)
        #[arg(long)]
        pills: Option<u8>,

        /// Milliseconds between dispense deadlines (overrides config)
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,

        /// Exit after the first completed cycle
        #[arg(long, action = ArgAction::SetTrue)]
        once: bool,

        /// Hold the buttons automatically whenever the FSM waits for input
        #[arg(long, action = ArgAction::SetTrue)]
        auto: bool,

        /// Simulated carousel: half-steps per revolution
        #[arg(long, value_name = "STEPS", default_value_t = 4096)]
        sim_steps_per_rev: u32,

        /// Simulated carousel: index gap width in half-steps
        #[arg(long, value_name = "STEPS", default_value_t = 120)]
        sim_gap_span: u32,

        /// Simulated pill lands on the piezo this long after a slot move (ms)
        #[arg(long, value_name = "MS", default_value_t = 40)]
        sim_drop_delay_ms: u64,

        /// Abort after this many control-loop iterations (0 = unbounded)
        #[arg(long, value_name = "N", default_value_t = 0)]
        max_steps: u64,
    },
}
