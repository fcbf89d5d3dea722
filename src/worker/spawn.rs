//! Worker subprocess spawning.
//!
//! Each worker is started through `std::process::Command` with three trailing
//! positionals: target file, symbol, and the number of the inherited channel
//! write end.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, BorrowedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::ipc::{self, set_cloexec};
use super::proc::Proc;
use crate::error::{Result, SymCountError};

/// Flag that switches the binary into worker mode.
pub const INTERNAL_WORKER_FLAG: &str = "--internal-worker";

/// Ends option parsing so a file named like a flag stays positional.
pub const END_OF_OPTIONS: &str = "--";

/// Environment variable carrying the manager's log filter into workers.
pub const WORKER_LOG_ENV: &str = "SYMCOUNT_LOG";

/// Program and leading arguments used to start a worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before file, symbol and channel fd.
    pub leading_args: Vec<OsString>,
    /// Extra environment for the worker.
    pub envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    /// A worker command for an arbitrary program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-run the current executable in `--internal-worker` mode.
    ///
    /// The leading arguments close with `--`, so file and symbol are never
    /// taken for options by the worker's parser.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| SymCountError::io("Failed to get current executable", e))?;
        Ok(Self::new(exe).with_args([INTERNAL_WORKER_FLAG, END_OF_OPTIONS]))
    }

    /// Append leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for every worker.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Forward a log filter so workers log at the manager's level.
    pub fn with_log_filter(self, filter: Option<String>) -> Self {
        match filter {
            Some(filter) => self.with_env(WORKER_LOG_ENV, filter),
            None => self,
        }
    }
}

/// Spawn one worker counting `symbol` in `file`.
///
/// A fresh channel is created for the worker. Its write end is made
/// inheritable only in the forked child, right before exec, and the
/// parent's copy is closed once the child is running. On any failure both
/// ends are dropped, so nothing leaks.
pub fn spawn_worker(command: &WorkerCommand, file: &Path, symbol: u8) -> Result<Proc> {
    let (read_end, write_end) =
        ipc::channel().map_err(|e| SymCountError::io("Failed to create channel", e))?;
    let write_raw = write_end.as_raw_fd();

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.leading_args)
        .arg(file)
        .arg(OsStr::from_bytes(&[symbol]))
        .arg(write_raw.to_string());
    cmd.envs(command.envs.iter().map(|(k, v)| (k, v)));

    // Workers report through the channel only; diagnostics go to our stderr.
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::inherit());

    // Safety: the hook runs in the child between fork and exec and only
    // issues a single fcntl on a descriptor the child inherited.
    unsafe {
        cmd.pre_exec(move || set_cloexec(BorrowedFd::borrow_raw(write_raw), false));
    }

    let child = cmd.spawn().map_err(|e| {
        SymCountError::io(
            format!("Failed to spawn worker {}", command.program.display()),
            e,
        )
    })?;
    drop(write_end);

    let proc = Proc::from_child(child, symbol, read_end);
    tracing::debug!(
        pid = %proc.pid(),
        symbol = %symbol.escape_ascii(),
        "Spawned worker"
    );
    Ok(proc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait(proc: &mut Proc) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while proc.try_wait().unwrap().is_none() {
            assert!(Instant::now() < deadline, "worker did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_current_exe_uses_internal_flag() {
        let command = WorkerCommand::current_exe().unwrap();
        assert_eq!(
            command.leading_args,
            vec![
                OsString::from(INTERNAL_WORKER_FLAG),
                OsString::from(END_OF_OPTIONS)
            ]
        );
    }

    #[test]
    fn test_log_filter_forwarding() {
        let command = WorkerCommand::new("/bin/true").with_log_filter(Some("debug".into()));
        assert_eq!(
            command.envs,
            vec![(OsString::from(WORKER_LOG_ENV), OsString::from("debug"))]
        );
        let command = WorkerCommand::new("/bin/true").with_log_filter(None);
        assert!(command.envs.is_empty());
    }

    #[test]
    fn test_child_receives_positionals_and_writable_channel() {
        let command = WorkerCommand::new("/bin/sh").with_args([
            "-c",
            r#"printf '%s|%s' "$1" "$2" >/dev/fd/$3"#,
            "worker",
        ]);
        let mut proc = spawn_worker(&command, Path::new("/some/file"), b'q').unwrap();
        wait(&mut proc);
        assert!(proc.exit().unwrap().is_success());
        assert_eq!(proc.drain().unwrap().unwrap(), b"/some/file|q");
    }

    #[test]
    fn test_child_environment_is_extended() {
        let command = WorkerCommand::new("/bin/sh")
            .with_args(["-c", r#"printf '%s' "$SYMCOUNT_TEST_VALUE" >/dev/fd/$3"#, "worker"])
            .with_env("SYMCOUNT_TEST_VALUE", "forwarded");
        let mut proc = spawn_worker(&command, Path::new("f"), b'x').unwrap();
        wait(&mut proc);
        assert_eq!(proc.drain().unwrap().unwrap(), b"forwarded");
    }

    #[test]
    fn test_spawn_failure_reports_os_error() {
        let command = WorkerCommand::new("/nonexistent/symcount-worker");
        let err = spawn_worker(&command, Path::new("f"), b'x').unwrap_err();
        assert_eq!(err.exit_code(), nix::errno::Errno::ENOENT as i32);
    }
}
