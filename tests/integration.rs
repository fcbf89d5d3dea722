//! Integration tests for the symcount CLI.
//!
//! These run the real binary in both roles against temporary files.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{NamedTempFile, tempdir};

/// Get a command for the symcount binary with fast polling.
fn symcount() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("symcount").unwrap();
    cmd.env("SYMCOUNT_POLL_INTERVAL_MS", "5");
    cmd.env_remove("SYMCOUNT_LOG");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn target_file(contents: &[u8]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), contents).unwrap();
    file
}

/// Parse report lines into sorted `(symbol, count)` pairs.
fn report(stdout: &[u8]) -> Vec<(String, u64)> {
    let text = String::from_utf8(stdout.to_vec()).unwrap();
    let mut entries: Vec<(String, u64)> = text
        .lines()
        .map(|line| {
            let parts: Vec<&str> = line.split(". ").collect();
            assert_eq!(parts.len(), 3, "unexpected line: {}", line);
            assert!(parts[0].starts_with("Process ") && parts[0].ends_with(" finishes"));
            let symbol = parts[1].strip_prefix("Symbol ").unwrap().to_string();
            let count = parts[2]
                .strip_prefix("Instances ")
                .and_then(|c| c.strip_suffix('.'))
                .unwrap()
                .parse()
                .unwrap();
            (symbol, count)
        })
        .collect();
    entries.sort();
    entries
}

fn run_ok(file: &Path, pattern: &str) -> Vec<(String, u64)> {
    let output = symcount().arg(file).arg(pattern).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    report(&output.stdout)
}

#[test]
fn test_help() {
    symcount()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Count every symbol"));
}

#[test]
fn test_counts_each_pattern_symbol() {
    let file = target_file(b"aabbbc");
    assert_eq!(
        run_ok(file.path(), "abc"),
        vec![("a".into(), 2), ("b".into(), 3), ("c".into(), 1)]
    );
}

#[test]
fn test_file_named_like_a_flag() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("-data.txt"), b"aab").unwrap();

    let output = symcount()
        .current_dir(dir.path())
        .args(["--", "-data.txt", "ab"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(report(&output.stdout), vec![("a".into(), 2), ("b".into(), 1)]);
}

#[test]
fn test_duplicate_symbols_report_twice() {
    let file = target_file(b"xay");
    assert_eq!(run_ok(file.path(), "aa"), vec![("a".into(), 1), ("a".into(), 1)]);
}

#[test]
fn test_absent_symbol_reports_zero() {
    let file = target_file(b"hello");
    assert_eq!(run_ok(file.path(), "z"), vec![("z".into(), 0)]);
}

#[test]
fn test_empty_file_reports_zero() {
    let file = target_file(b"");
    assert_eq!(run_ok(file.path(), "ab"), vec![("a".into(), 0), ("b".into(), 0)]);
}

#[test]
fn test_every_worker_has_distinct_pid() {
    let file = target_file(b"abc");
    let output = symcount().arg(file.path()).arg("abc").output().unwrap();
    let mut pids: Vec<&str> = std::str::from_utf8(&output.stdout)
        .unwrap()
        .lines()
        .map(|l| l.split(' ').nth(1).unwrap())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 3);
}

#[test]
fn test_missing_file_succeeds_with_no_report() {
    let dir = tempdir().unwrap();
    symcount()
        .arg(dir.path().join("absent"))
        .arg("abc")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error opening file"));
}

#[test]
fn test_directory_target_yields_no_report() {
    let dir = tempdir().unwrap();
    symcount()
        .arg(dir.path())
        .arg("a")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_empty_pattern_rejected() {
    let file = target_file(b"abc");
    symcount()
        .arg(file.path())
        .arg("")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("pattern must not be empty"));
}

#[test]
fn test_missing_arguments_rejected() {
    symcount().arg("only-a-file").assert().code(1);
}

#[test]
fn test_channel_fd_without_worker_mode_rejected() {
    let file = target_file(b"abc");
    symcount().arg(file.path()).arg("a").arg("3").assert().code(1);
}

#[test]
fn test_standalone_worker_prints_record() {
    let file = target_file(b"banana");
    symcount()
        .arg("--internal-worker")
        .arg(file.path())
        .arg("a")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^Process \d+ finishes\. Symbol a\. Instances 3\.\n$").unwrap());
}

#[test]
fn test_worker_rejects_multi_byte_symbol() {
    let file = target_file(b"abc");
    symcount()
        .arg("--internal-worker")
        .arg(file.path())
        .arg("ab")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_worker_missing_file_exits_with_errno() {
    let dir = tempdir().unwrap();
    symcount()
        .arg("--internal-worker")
        .arg(dir.path().join("absent"))
        .arg("a")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error opening file"));
}

#[test]
fn test_closed_output_is_failure() {
    let file = target_file(&vec![b'a'; 1 << 20]);
    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_symcount"))
        .arg(file.path())
        .arg("abc")
        .env("SYMCOUNT_POLL_INTERVAL_MS", "200")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    drop(child.stdout.take());

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("output closed"));
    // One diagnostic per event at the default level
    assert!(!stderr.contains("Tearing down"), "stderr: {}", stderr);
}

/// Direct children of `pid`, across all of its threads.
#[cfg(target_os = "linux")]
fn child_pids(pid: u32) -> Vec<i32> {
    let Ok(tasks) = std::fs::read_dir(format!("/proc/{}/task", pid)) else {
        return Vec::new();
    };
    tasks
        .flatten()
        .filter_map(|task| std::fs::read_to_string(task.path().join("children")).ok())
        .flat_map(|list| {
            list.split_whitespace()
                .filter_map(|p| p.parse().ok())
                .collect::<Vec<i32>>()
        })
        .collect()
}

#[cfg(target_os = "linux")]
#[test]
fn test_sigterm_cancels_run_and_reaps_workers() {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // Sparse, so the scan is long but costs no disk
    let dir = tempdir().unwrap();
    let path = dir.path().join("huge.bin");
    std::fs::File::create(&path)
        .unwrap()
        .set_len(16 << 30)
        .unwrap();

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_symcount"))
        .arg(&path)
        .arg("abcd")
        .env("SYMCOUNT_POLL_INTERVAL_MS", "5")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let workers = loop {
        let workers = child_pids(child.id());
        if workers.len() == 4 {
            break workers;
        }
        assert!(Instant::now() < deadline, "workers did not start: {:?}", workers);
        std::thread::sleep(Duration::from_millis(10));
    };
    // Let the workers get into their scan
    std::thread::sleep(Duration::from_millis(200));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
    let output = child.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(130));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Interrupted by termination request"), "stderr: {}", stderr);
    for pid in workers {
        assert_eq!(
            kill(Pid::from_raw(pid), None),
            Err(Errno::ESRCH),
            "worker {} outlived the manager",
            pid
        );
    }
}
