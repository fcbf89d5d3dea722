//! Cooperative cancellation on external termination requests.
//!
//! SIGINT, SIGTERM and SIGHUP only flip a shared flag. The manager checks it
//! once per poll pass and the worker between scan chunks, so all cleanup runs
//! on the normal control path instead of inside a signal handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// Exit status for a run stopped by a termination request.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Shared cancellation flag.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Create a flag in the "keep running" state.
pub fn create_shutdown_flag() -> ShutdownFlag {
    Arc::new(AtomicBool::new(false))
}

/// Route termination signals for this process into `flag`.
///
/// Can only be installed once per process.
pub fn install_handler(flag: ShutdownFlag, role: &'static str) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!(role, pid = std::process::id(), "Termination requested");
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(())
}

/// Whether a termination request has been observed.
pub fn is_requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_clear() {
        let flag = create_shutdown_flag();
        assert!(!is_requested(&flag));
        flag.store(true, Ordering::SeqCst);
        assert!(is_requested(&flag));
    }
}
