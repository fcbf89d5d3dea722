//! Worker subprocess main entry point.
//!
//! This module runs when `symcount --internal-worker FILE SYMBOL [FD]` is
//! invoked. It counts one symbol in the file and writes a single
//! [`ResultMessage`] either to the inherited channel `FD` or, when no
//! channel was given, to its own stdout.

use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use super::ipc::PipeFd;
use super::protocol::ResultMessage;
use super::scan::count_in_file;
use crate::error::{Result, SymCountError};
use crate::shutdown::CANCELLED_EXIT_CODE;

/// Validated worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerArgs {
    pub file: PathBuf,
    pub symbol: u8,
    pub channel_fd: Option<RawFd>,
}

impl WorkerArgs {
    /// Build from raw positionals, rejecting anything but a one-byte symbol.
    pub fn new(file: PathBuf, symbol: &[u8], channel_fd: Option<RawFd>) -> Result<Self> {
        match symbol {
            [symbol] => Ok(Self {
                file,
                symbol: *symbol,
                channel_fd,
            }),
            _ => Err(SymCountError::InvalidInput(format!(
                "symbol must be exactly one byte, got {} bytes",
                symbol.len()
            ))),
        }
    }
}

/// How a worker run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The record was delivered.
    Reported(ResultMessage),
    /// The reader went away before the record could be written.
    ConsumerGone,
    /// A termination request arrived during the scan.
    Cancelled,
}

impl WorkerOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Reported(_) | Self::ConsumerGone => 0,
            Self::Cancelled => CANCELLED_EXIT_CODE,
        }
    }
}

/// Where the worker sends its record.
enum ReportTarget {
    Channel(PipeFd),
    Stdout(io::Stdout),
}

impl ReportTarget {
    fn open(channel_fd: Option<RawFd>) -> Result<Self> {
        match channel_fd {
            Some(fd) => PipeFd::inherited(fd)
                .map(Self::Channel)
                .map_err(|e| SymCountError::io(format!("Invalid channel descriptor {}", fd), e)),
            None => Ok(Self::Stdout(io::stdout())),
        }
    }

    fn deliver(&mut self, line: &[u8]) -> io::Result<()> {
        match self {
            Self::Channel(fd) => fd.write_all(line),
            Self::Stdout(stdout) => {
                let mut lock = stdout.lock();
                lock.write_all(line)?;
                lock.flush()
            }
        }
    }
}

/// Run one worker to completion.
///
/// The channel is adopted first so it is closed on every exit path,
/// including a failed open of the target file.
pub fn run_worker(args: &WorkerArgs, shutdown: &AtomicBool) -> Result<WorkerOutcome> {
    let mut target = ReportTarget::open(args.channel_fd)?;

    let Some(count) = count_in_file(&args.file, args.symbol, shutdown)? else {
        tracing::debug!(file = %args.file.display(), "Scan interrupted");
        return Ok(WorkerOutcome::Cancelled);
    };

    let message = ResultMessage::new(std::process::id(), args.symbol, count);
    match target.deliver(&message.to_line()) {
        Ok(()) => {
            tracing::debug!(%message, "Reported result");
            Ok(WorkerOutcome::Reported(message))
        }
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!("Result channel closed by reader, exiting quietly");
            Ok(WorkerOutcome::ConsumerGone)
        }
        Err(e) => Err(SymCountError::io("Failed to write result", e)),
    }
}

/// Run the worker and translate the result into a process exit status.
pub fn run_worker_main(args: &WorkerArgs, shutdown: &AtomicBool) -> i32 {
    match run_worker(args, shutdown) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Worker {} error: {}", std::process::id(), e);
            e.exit_code()
        }
    }
}
