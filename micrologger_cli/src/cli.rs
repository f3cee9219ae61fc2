//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config file used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG: &str = "etc/micrologger.toml";

#[derive(Parser, Debug)]
#[command(name = "micrologger", version, about = "Benchtop bioreactor and photometer")]
pub struct Cli {
    /// Path to config TOML (typed); stock settings when absent
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the persisted-state file from the config
    #[arg(long, value_name = "FILE")]
    pub state: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StirCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Vortex,
}

impl From<StirCommand> for micrologger_core::StirrerAction {
    fn from(c: StirCommand) -> Self {
        match c {
            StirCommand::Start => Self::Start,
            StirCommand::Stop => Self::Stop,
            StirCommand::Pause => Self::Pause,
            StirCommand::Resume => Self::Resume,
            StirCommand::Vortex => Self::Vortex,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the instrument for a while, printing a status line periodically
    Run {
        /// How long to run, in seconds
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        duration_s: u64,
        /// Status line period, in seconds
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        status_every_s: u64,
        /// Start the stirrer at boot
        #[arg(long, action = ArgAction::SetTrue)]
        stir: bool,
        /// Zero the photometer at boot (periodic reads follow)
        #[arg(long, action = ArgAction::SetTrue)]
        zero: bool,
    },
    /// Issue a stirrer action and follow it for a while
    Stir {
        #[arg(value_enum)]
        action: StirCommand,
        /// Change the setpoint first (rpm)
        #[arg(long, value_name = "RPM")]
        rpm: Option<f64>,
        /// How long to follow the stirrer afterwards, in seconds
        #[arg(long, value_name = "SECS", default_value_t = 2)]
        follow_s: u64,
    },
    /// Optimize gain (when automatic) and record a new zero reference
    Zero {
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 120)]
        timeout_s: u64,
    },
    /// Take one optical density reading against the stored zero
    Read {
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 120)]
        timeout_s: u64,
    },
    /// Search for the gain that puts a blank near the target signal
    OptimizeGain {
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 120)]
        timeout_s: u64,
    },
    /// Connect every I2C device and report its state
    SelfCheck,
    /// Health snapshot for operational monitoring
    Health,
}
