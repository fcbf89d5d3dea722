//! Command-line interface definitions using clap.

use std::ffi::OsString;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use crate::logging::{LogConfig, LogFormat};

/// Count every symbol of a pattern in a file, one worker process per symbol.
#[derive(Parser, Debug)]
#[command(name = "symcount")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// File to scan.
    pub file: PathBuf,

    /// Symbols to count. Every byte is counted by its own worker.
    pub pattern: OsString,

    /// Inherited result channel (worker mode only).
    #[arg(requires = "internal_worker", hide = true)]
    pub channel_fd: Option<RawFd>,

    /// Run as a worker counting a single symbol.
    #[arg(long, hide = true)]
    pub internal_worker: bool,

    /// Pause between two passes over the worker pool, in milliseconds.
    #[arg(long, env = "SYMCOUNT_POLL_INTERVAL_MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Time a signalled worker gets to exit before SIGKILL, in milliseconds.
    #[arg(long, env = "SYMCOUNT_KILL_GRACE_MS", default_value_t = 500)]
    pub kill_grace_ms: u64,

    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all diagnostics except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format: pretty, compact, json.
    #[arg(long, env = "SYMCOUNT_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, env = "SYMCOUNT_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Logging configuration from the flags, with environment fallbacks.
    ///
    /// `-q` and `-v` pin the filter so environment filters cannot override them.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::default();
        let pinned = match (self.quiet, self.verbose) {
            (true, _) => Some(Level::ERROR),
            (false, 0) => None,
            (false, 1) => Some(Level::INFO),
            (false, _) => Some(Level::DEBUG),
        };
        if let Some(level) = pinned {
            config = config
                .with_level(level)
                .with_filter(level.to_string().to_lowercase());
        }
        config = config.with_env_overrides();

        if let Some(format) = self.log_format {
            config = config.with_format(format);
        }
        if let Some(ref path) = self.log_file {
            config = config.with_file(path.clone());
        }
        config
    }
}
