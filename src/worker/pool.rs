//! Registry of active counting workers.
//!
//! The pool owns one [`Proc`] per spawned worker. It is only ever touched by
//! the manager's control thread, so it needs no locking. Removal is a
//! swap-remove: indices are not stable across removals and callers must not
//! assume any ordering.

use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{debug, instrument, warn};

use super::proc::Proc;
use super::signals::TerminationReason;
use super::spawn::{WorkerCommand, spawn_worker};
use crate::error::{Result, SymCountError};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How workers are started.
    pub command: WorkerCommand,
    /// How long a signalled worker may take to exit before SIGKILL.
    pub kill_grace: Duration,
}

impl WorkerPoolConfig {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            kill_grace: Duration::from_millis(500),
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// A pool of worker subprocesses, one per pattern symbol.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Proc>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create an empty pool with room for `capacity` workers.
    ///
    /// The reservation is fallible so an oversized pattern surfaces as an
    /// ENOMEM exit instead of an abort.
    pub fn with_capacity(capacity: usize, config: WorkerPoolConfig) -> Result<Self> {
        let mut workers = Vec::new();
        workers.try_reserve_exact(capacity)?;
        Ok(Self { workers, config })
    }

    /// Number of active workers.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// PIDs of all active workers, in current slot order.
    #[cfg(test)]
    pub fn pids(&self) -> Vec<Pid> {
        self.workers.iter().map(Proc::pid).collect()
    }

    /// Start a worker counting `symbol` in `file` and register it.
    ///
    /// Returns the slot index of the new worker.
    pub fn spawn(&mut self, file: &Path, symbol: u8) -> Result<usize> {
        let proc = spawn_worker(&self.config.command, file, symbol)?;
        self.workers.push(proc);
        Ok(self.workers.len() - 1)
    }

    /// Check every worker once without blocking.
    ///
    /// Returns only the workers observed to terminate during this call,
    /// tagged with how they ended. A `waitpid` failure is returned as an
    /// error because the pool can no longer tell which workers are alive.
    pub fn poll_once(&mut self) -> Result<Vec<(usize, TerminationReason)>> {
        let mut exited = Vec::new();
        for (index, proc) in self.workers.iter_mut().enumerate() {
            if proc.exit().is_some() {
                // Already reported on an earlier pass and not yet removed
                continue;
            }
            if let Some(reason) = proc.try_wait()? {
                debug!(
                    pid = %proc.pid(),
                    symbol = %proc.symbol().escape_ascii(),
                    reason = %reason,
                    "Worker exited"
                );
                exited.push((index, reason));
            }
        }
        Ok(exited)
    }

    /// Read the single record of a worker that exited successfully.
    ///
    /// Fails for workers that are still running, failed, or were already
    /// drained.
    pub fn drain_result(&mut self, index: usize) -> Result<Option<Vec<u8>>> {
        self.get_mut(index)?.drain()
    }

    /// Close a worker's channel and drop it from the pool.
    ///
    /// The last worker is moved into the freed slot.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        self.get_mut(index)?;
        let mut proc = self.workers.swap_remove(index);
        proc.close_channel();
        Ok(())
    }

    /// Signal every active worker, close every channel, and reap them all.
    ///
    /// Workers that have not exited by the end of the grace period are
    /// killed with SIGKILL. The pool is empty afterwards. Returns how many
    /// workers were still running when the signal was sent.
    #[instrument(level = "debug", skip(self), fields(workers = self.workers.len()))]
    pub fn kill_all(&mut self, signal: Signal) -> usize {
        let mut signalled = 0;
        for proc in &mut self.workers {
            if proc.exit().is_none() {
                if let Err(e) = proc.signal(signal) {
                    warn!(pid = %proc.pid(), error = %e, "Failed to signal worker");
                }
                signalled += 1;
            }
            proc.close_channel();
        }

        let deadline = Instant::now() + self.config.kill_grace;
        for mut proc in self.workers.drain(..) {
            if let Err(e) = proc.reap(deadline) {
                warn!(pid = %proc.pid(), error = %e, "Failed to reap worker");
            }
        }
        signalled
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Proc> {
        let len = self.workers.len();
        self.workers.get_mut(index).ok_or_else(|| {
            SymCountError::Worker(format!("no worker at index {} (pool size {})", index, len))
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.kill_all(Signal::SIGKILL);
        }
    }
}
