//! Classification of worker terminations.
//!
//! Turns a raw `WaitStatus` into the success/failure verdict the manager
//! uses to decide whether a channel may be drained.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Process is still running (or only stopped/continued).
    StillAlive,
}

impl TerminationReason {
    /// Whether the worker has finished for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StillAlive)
    }

    /// Only a clean zero exit allows the channel to be drained.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::StillAlive => "still running".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        // Stops and continues are not terminations; the pool never asks
        // for them, but a traced worker could still report one.
        _ => TerminationReason::StillAlive,
    }
}
