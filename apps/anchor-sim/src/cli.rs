use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "anchor-sim",
    about = "Drive the cloud anchor host/resolve flow against a simulated platform",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "ANCHOR_SIM_CONFIG",
        value_name = "PATH",
        help = "TOML file with frame timing, outcomes and the intent script"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Flow::Single, help = "Which coordinator drives the script")]
    pub flow: Flow,

    #[arg(long, env = "ANCHOR_SIM_FRAME_MS", help = "Milliseconds between frames")]
    pub frame_ms: Option<u64>,

    #[arg(
        long,
        env = "ANCHOR_SIM_LATENCY_TICKS",
        help = "Frames a cloud task takes to finish"
    )]
    pub latency_ticks: Option<u64>,

    #[arg(long, env = "ANCHOR_SIM_MAX_FRAMES", help = "Stop after this many frames")]
    pub max_frames: Option<u64>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Flow {
    /// One operation at a time through the UI mode controller.
    Single,
    /// Concurrent operations through the lifecycle manager.
    Multi,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "ANCHOR_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "ANCHOR_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
