//! Process handle for one counting worker.
//!
//! Pairs the worker's pid with the read end of its result channel. The
//! channel is drained at most once, and only after `try_wait` has confirmed
//! a zero exit.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;

use super::ipc::PipeFd;
use super::protocol::MAX_MESSAGE_SIZE;
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{Result, SymCountError};

/// How often `reap` re-checks a worker during its grace period.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a worker subprocess and its result channel.
#[derive(Debug)]
pub struct Proc {
    /// Process ID
    pid: Pid,
    /// Symbol this worker counts (for logging)
    symbol: u8,
    /// Read end of the result channel; `None` once drained or closed
    channel: Option<PipeFd>,
    /// Terminal state, once observed
    exit: Option<TerminationReason>,
}

impl Proc {
    /// Create a new process handle from its components.
    pub fn new(pid: Pid, symbol: u8, channel: PipeFd) -> Self {
        Self {
            pid,
            symbol,
            channel: Some(channel),
            exit: None,
        }
    }

    /// Create from a spawned `std::process::Child`.
    ///
    /// Only the pid is kept; reaping goes through `waitpid` directly so the
    /// poll loop never blocks.
    pub fn from_child(child: std::process::Child, symbol: u8, channel: PipeFd) -> Self {
        Self::new(Pid::from_raw(child.id() as i32), symbol, channel)
    }

    /// Get the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Get the symbol this worker counts.
    pub fn symbol(&self) -> u8 {
        self.symbol
    }

    /// Terminal state, if the process has been reaped.
    pub fn exit(&self) -> Option<TerminationReason> {
        self.exit
    }

    /// Whether the channel is still open and unread.
    #[cfg(test)]
    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Try to reap the process without blocking.
    ///
    /// Returns `None` while it is still running. Once reaped, the recorded
    /// state is returned again without another syscall.
    pub fn try_wait(&mut self) -> Result<Option<TerminationReason>> {
        if let Some(reason) = self.exit {
            return Ok(Some(reason));
        }
        let status = waitpid(self.pid, Some(WaitPidFlag::WNOHANG))
            .map_err(|e| SymCountError::io(format!("waitpid({}) failed", self.pid), e))?;
        let reason = analyze_wait_status(status);
        if reason.is_terminal() {
            self.exit = Some(reason);
            Ok(Some(reason))
        } else {
            Ok(None)
        }
    }

    /// Check if the process is still running (non-blocking).
    #[cfg(test)]
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Read the worker's record from its channel.
    ///
    /// Performs a single read of up to `MAX_MESSAGE_SIZE` bytes and closes
    /// the channel. Returns `None` if the worker wrote nothing.
    pub fn drain(&mut self) -> Result<Option<Vec<u8>>> {
        match self.exit {
            Some(reason) if reason.is_success() => {}
            Some(reason) => {
                return Err(SymCountError::Worker(format!(
                    "refusing to drain worker {} that {}",
                    self.pid, reason
                )));
            }
            None => {
                return Err(SymCountError::Worker(format!(
                    "worker {} has not been confirmed exited",
                    self.pid
                )));
            }
        }
        let mut channel = self.channel.take().ok_or_else(|| {
            SymCountError::Worker(format!("channel of worker {} already drained", self.pid))
        })?;
        let data = channel
            .read_once(MAX_MESSAGE_SIZE)
            .map_err(|e| SymCountError::io(format!("read from worker {} failed", self.pid), e))?;
        Ok((!data.is_empty()).then_some(data))
    }

    /// Close the read end without reading.
    pub fn close_channel(&mut self) {
        self.channel = None;
    }

    /// Send a signal to the process.
    ///
    /// A process that already exited is not an error.
    pub fn signal(&self, sig: Signal) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        match signal::kill(self.pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SymCountError::io(
                format!("Failed to send {:?} to {}", sig, self.pid),
                e,
            )),
        }
    }

    /// Wait until `deadline` for the process to exit, then SIGKILL and reap.
    pub fn reap(&mut self, deadline: Instant) -> Result<TerminationReason> {
        loop {
            if let Some(reason) = self.try_wait()? {
                return Ok(reason);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }

        tracing::debug!(pid = %self.pid, "Worker ignored termination, sending SIGKILL");
        self.signal(Signal::SIGKILL)?;
        let status = waitpid(self.pid, None)
            .map_err(|e| SymCountError::io(format!("waitpid({}) failed", self.pid), e))?;
        let reason = analyze_wait_status(status);
        self.exit = Some(reason);
        Ok(reason)
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        self.close_channel();
        if self.exit.is_none() {
            let _ = self.signal(Signal::SIGTERM);
            let _ = self.reap(Instant::now() + REAP_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ipc::channel;
    use std::io::Write;
    use std::process::{Command, Stdio};

    fn sleeper() -> Proc {
        let child = Command::new("sleep")
            .arg("60")
            .stdin(Stdio::null())
            .spawn()
            .expect("Failed to spawn sleep");
        let (read_end, _write_end) = channel().unwrap();
        Proc::from_child(child, b's', read_end)
    }

    fn wait_for_exit(proc: &mut Proc) -> TerminationReason {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(reason) = proc.try_wait().unwrap() {
                return reason;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("process did not exit in time");
    }

    #[test]
    fn test_terminate_and_reap() {
        let mut proc = sleeper();
        assert!(proc.is_running());

        proc.signal(Signal::SIGTERM).unwrap();
        let reason = proc.reap(Instant::now() + Duration::from_secs(5)).unwrap();
        assert_eq!(reason, TerminationReason::Signaled(Signal::SIGTERM));
        assert!(!proc.is_running());

        // Signalling a reaped process is a no-op
        proc.signal(Signal::SIGTERM).unwrap();
    }

    #[test]
    fn test_reap_escalates_to_sigkill() {
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 60"])
            .spawn()
            .unwrap();
        let (read_end, _write_end) = channel().unwrap();
        let mut proc = Proc::from_child(child, b't', read_end);
        // Give the shell time to install its trap
        std::thread::sleep(Duration::from_millis(200));

        proc.signal(Signal::SIGTERM).unwrap();
        let reason = proc.reap(Instant::now() + Duration::from_millis(100)).unwrap();
        assert_eq!(reason, TerminationReason::Signaled(Signal::SIGKILL));
    }

    #[test]
    fn test_drain_requires_confirmed_success() {
        let mut proc = sleeper();
        assert!(proc.drain().is_err());
        assert!(proc.has_channel());
    }

    #[test]
    fn test_drain_is_at_most_once() {
        let (read_end, mut write_end) = channel().unwrap();
        let child = Command::new("true").spawn().unwrap();
        let mut proc = Proc::from_child(child, b'a', read_end);

        write_end.write_all(b"Process 1 finishes. Symbol a. Instances 0.\n").unwrap();
        drop(write_end);

        assert_eq!(wait_for_exit(&mut proc), TerminationReason::Exited(0));
        let first = proc.drain().unwrap();
        assert_eq!(first.as_deref(), Some(&b"Process 1 finishes. Symbol a. Instances 0.\n"[..]));
        assert!(!proc.has_channel());
        assert!(proc.drain().is_err());
    }

    #[test]
    fn test_drain_empty_channel_is_none() {
        let (read_end, write_end) = channel().unwrap();
        drop(write_end);
        let child = Command::new("true").spawn().unwrap();
        let mut proc = Proc::from_child(child, b'a', read_end);

        wait_for_exit(&mut proc);
        assert_eq!(proc.drain().unwrap(), None);
    }

    #[test]
    fn test_failed_worker_is_not_drained() {
        let (read_end, _write_end) = channel().unwrap();
        let child = Command::new("false").spawn().unwrap();
        let mut proc = Proc::from_child(child, b'a', read_end);

        assert_eq!(wait_for_exit(&mut proc), TerminationReason::Exited(1));
        assert!(proc.drain().is_err());
    }

    #[test]
    fn test_drop_kills_running_process() {
        let proc = sleeper();
        let pid = proc.pid();
        drop(proc);
        assert_eq!(signal::kill(pid, None), Err(Errno::ESRCH));
    }
}
