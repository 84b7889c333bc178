//! Logging flags.

use crate::LogFormat;
use clap::{ArgAction, Args};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Logging flags shared by every binary.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogArgs {
    /// Raise the log level: `-v` for debug, `-vv` for trace.
    #[arg(short = 'v', long = "verbosity", action = ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Silence stdout logs.
    #[arg(long = "log.stdout.quiet", short = 'q', global = true)]
    pub stdout_quiet: bool,

    /// Format of stdout logs.
    #[arg(long = "log.stdout.format", default_value = "full", env = "LOG_STDOUT_FORMAT")]
    pub stdout_format: LogFormat,

    /// Directory to write rolling log files to. File logging is off when unset.
    #[arg(long = "log.file.directory", env = "LOG_FILE_DIRECTORY")]
    pub file_directory: Option<PathBuf>,

    /// Format of file logs.
    #[arg(long = "log.file.format", default_value = "full", env = "LOG_FILE_FORMAT")]
    pub file_format: LogFormat,

    /// How often log files are rotated.
    #[arg(long = "log.file.rotation", default_value = "daily", env = "LOG_FILE_ROTATION")]
    pub file_rotation: LogRotation,
}

/// How often log files are rotated.
#[derive(
    Default, Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum LogRotation {
    /// A new file every minute.
    Minutely,
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    #[default]
    Daily,
    /// A single file.
    Never,
}

/// Stdout log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StdoutLogConfig {
    /// Output format.
    pub format: LogFormat,
}

/// Rolling file log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogConfig {
    /// Directory the files are written to.
    pub directory_path: PathBuf,
    /// Output format.
    pub format: LogFormat,
    /// Rotation period.
    pub rotation: LogRotation,
}

/// Resolved logging setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level applied on top of the environment filter.
    pub global_level: LevelFilter,
    /// Stdout output, if any.
    pub stdout_logs: Option<StdoutLogConfig>,
    /// File output, if any.
    pub file_logs: Option<FileLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global_level: LevelFilter::INFO,
            stdout_logs: Some(StdoutLogConfig::default()),
            file_logs: None,
        }
    }
}

impl LogConfig {
    /// Resolves the logging flags.
    pub fn new(args: LogArgs) -> Self {
        let global_level = match args.verbosity {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        let stdout_logs =
            (!args.stdout_quiet).then_some(StdoutLogConfig { format: args.stdout_format });
        let file_logs = args.file_directory.map(|directory_path| FileLogConfig {
            directory_path,
            format: args.file_format,
            rotation: args.file_rotation,
        });

        Self { global_level, stdout_logs, file_logs }
    }
}
