//! Manager control loop.
//!
//! Spawns one worker per pattern byte, then polls the pool without blocking
//! until every worker has been reaped. Records of successful workers are
//! forwarded to the report sink; failed workers are dropped silently.
//!
//! ```text
//! Initializing -> Spawning -> Polling <-> Draining -> Terminated
//! ```
//!
//! Any unrecoverable condition (spawn failure, `waitpid` failure, broken
//! report output, termination request) tears the whole pool down before
//! the error is returned.

use std::io::{self, Write};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::Signal;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SymCountError};
use crate::shutdown::{ShutdownFlag, is_requested};
use crate::worker::{ResultMessage, WorkerPool, WorkerPoolConfig};

/// Configuration for one manager run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pause between two poll passes.
    pub poll_interval: Duration,
    /// Worker pool settings.
    pub pool: WorkerPoolConfig,
}

/// Phase of the control loop, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Spawning,
    Polling,
    Draining,
    Terminated,
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Workers started.
    pub spawned: usize,
    /// Records forwarded to the sink.
    pub reported: usize,
    /// Workers that exited successfully without a record.
    pub silent: usize,
    /// Workers that exited non-zero or were killed.
    pub failed: usize,
    /// Poll passes performed.
    pub passes: usize,
}

/// Destination for the aggregated report.
pub trait ReportSink: Write {
    /// Whether the consumer has closed the output.
    ///
    /// Checked at the top of every poll pass so a vanished consumer aborts
    /// the run even while no record is being written.
    fn is_closed(&self) -> bool {
        false
    }
}

impl ReportSink for Vec<u8> {}

/// The process's standard output.
pub struct StdoutSink {
    stdout: io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdout.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }
}

impl ReportSink for StdoutSink {
    fn is_closed(&self) -> bool {
        // A pipe whose reader is gone reports POLLERR even with no events
        // requested. Regular files and terminals report nothing here.
        let mut fds = [PollFd::new(self.stdout.as_fd(), PollFlags::empty())];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(n) if n > 0 => fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLERR | PollFlags::POLLHUP)),
            _ => false,
        }
    }
}

/// Drives one pattern through a worker pool.
pub struct Orchestrator {
    config: OrchestratorConfig,
    shutdown: ShutdownFlag,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, shutdown: ShutdownFlag) -> Self {
        Self { config, shutdown }
    }

    /// Count every byte of `pattern` in `file`, one worker per byte.
    ///
    /// Returns once all workers have been reaped. On error no worker is
    /// left running.
    #[instrument(level = "info", skip_all, fields(file = %file.display(), symbols = pattern.len()))]
    pub fn run<S: ReportSink>(&self, file: &Path, pattern: &[u8], sink: &mut S) -> Result<RunSummary> {
        debug!(state = ?RunState::Initializing);
        if pattern.is_empty() {
            return Err(SymCountError::InvalidInput("pattern must not be empty".into()));
        }
        let mut pool = WorkerPool::with_capacity(pattern.len(), self.config.pool.clone())?;
        let mut summary = RunSummary::default();

        match self.drive(&mut pool, file, pattern, sink, &mut summary) {
            Ok(()) => {
                info!(
                    spawned = summary.spawned,
                    reported = summary.reported,
                    silent = summary.silent,
                    failed = summary.failed,
                    passes = summary.passes,
                    "All workers finished"
                );
                Ok(summary)
            }
            Err(e) => {
                let signal = teardown_signal(&e);
                let signalled = pool.kill_all(signal);
                info!(
                    error = %e,
                    signal = ?signal,
                    signalled,
                    "Tearing down worker pool"
                );
                Err(e)
            }
        }
    }

    fn drive<S: ReportSink>(
        &self,
        pool: &mut WorkerPool,
        file: &Path,
        pattern: &[u8],
        sink: &mut S,
        summary: &mut RunSummary,
    ) -> Result<()> {
        debug!(state = ?RunState::Spawning);
        for &symbol in pattern {
            self.check_interrupts(sink)?;
            pool.spawn(file, symbol)?;
            summary.spawned += 1;
        }

        while !pool.is_empty() {
            debug!(state = ?RunState::Polling);
            self.check_interrupts(sink)?;

            let mut exited = pool.poll_once()?;
            summary.passes += 1;
            if !exited.is_empty() {
                debug!(state = ?RunState::Draining, exited = exited.len());
            }

            // Highest slot first: swap-removal only moves entries from the
            // tail, so lower indices still to be handled stay valid.
            exited.sort_unstable_by(|a, b| b.0.cmp(&a.0));
            for (index, reason) in exited {
                if reason.is_success() {
                    match pool.drain_result(index)? {
                        Some(record) => {
                            forward(sink, &record)?;
                            summary.reported += 1;
                        }
                        None => summary.silent += 1,
                    }
                } else {
                    debug!(reason = %reason, "Worker failed, no report");
                    summary.failed += 1;
                }
                pool.remove(index)?;
            }

            if !pool.is_empty() {
                std::thread::sleep(self.config.poll_interval);
            }
        }
        debug!(state = ?RunState::Terminated);
        Ok(())
    }

    fn check_interrupts<S: ReportSink>(&self, sink: &S) -> Result<()> {
        if is_requested(&self.shutdown) {
            return Err(SymCountError::Cancelled);
        }
        if sink.is_closed() {
            return Err(SymCountError::OutputClosed);
        }
        Ok(())
    }
}

/// Write one record to the sink, mapping a vanished reader to `OutputClosed`.
fn forward<S: ReportSink>(sink: &mut S, record: &[u8]) -> Result<()> {
    match ResultMessage::from_line(record) {
        Ok(message) => debug!(%message, "Forwarding result"),
        Err(e) => warn!(error = %e, "Forwarding unparseable worker record"),
    }
    sink.write_all(record)
        .and_then(|()| sink.flush())
        .map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe => SymCountError::OutputClosed,
            _ => SymCountError::io("Failed to write report", e),
        })
}

/// Signal used to tear the pool down for a given failure.
///
/// Requests and a closed output get SIGTERM so workers can release their
/// resources; internal failures get SIGKILL.
fn teardown_signal(error: &SymCountError) -> Signal {
    match error {
        SymCountError::Cancelled | SymCountError::OutputClosed => Signal::SIGTERM,
        _ => Signal::SIGKILL,
    }
}
