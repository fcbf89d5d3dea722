//! symcount - count pattern symbols in a file with one worker process per symbol

mod cli;
mod error;
mod logging;
mod orchestrator;
mod shutdown;
mod worker;

use std::os::unix::ffi::OsStrExt;
use std::process;

use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use cli::Cli;
use error::{EXIT_FAILURE, Result, SymCountError};
use orchestrator::{Orchestrator, OrchestratorConfig, StdoutSink};
use worker::{WorkerArgs, WorkerCommand, WorkerPoolConfig};

/// Program entry point: parses arguments, dispatches to manager or worker
/// mode, and exits with the status of the selected role.
fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit 1; --help and --version exit 0
            process::exit(if e.use_stderr() { EXIT_FAILURE } else { 0 });
        }
    };

    let log_config = cli.log_config();
    logging::init(&log_config);

    let code = if cli.internal_worker {
        run_worker(&cli)
    } else {
        match run_manager(&cli, log_config.effective_filter()) {
            Ok(()) => 0,
            Err(e) => {
                report_error(&e);
                e.exit_code()
            }
        }
    };
    process::exit(code);
}

/// Worker mode: count one symbol and report it.
fn run_worker(cli: &Cli) -> i32 {
    let args = match WorkerArgs::new(cli.file.clone(), cli.pattern.as_bytes(), cli.channel_fd) {
        Ok(args) => args,
        Err(e) => {
            report_error(&e);
            return e.exit_code();
        }
    };

    let flag = shutdown::create_shutdown_flag();
    if let Err(e) = shutdown::install_handler(flag.clone(), "worker") {
        report_error(&e);
        return e.exit_code();
    }
    worker::run_worker_main(&args, &flag)
}

/// Manager mode: one worker per pattern byte, results forwarded to stdout.
fn run_manager(cli: &Cli, log_filter: String) -> Result<()> {
    let pattern = cli.pattern.as_bytes();
    if pattern.is_empty() {
        return Err(SymCountError::InvalidInput("pattern must not be empty".into()));
    }

    let flag = shutdown::create_shutdown_flag();
    shutdown::install_handler(flag.clone(), "manager")?;

    let command = WorkerCommand::current_exe()?.with_log_filter(Some(log_filter));
    let config = OrchestratorConfig {
        poll_interval: cli.poll_interval(),
        pool: WorkerPoolConfig::new(command).with_kill_grace(cli.kill_grace()),
    };

    let mut sink = StdoutSink::new();
    Orchestrator::new(config, flag).run(&cli.file, pattern, &mut sink)?;
    Ok(())
}

fn report_error(e: &SymCountError) {
    let header = if e.is_broken_pipe() { "output closed" } else { "error" };
    eprintln!(
        "{}: {}",
        header
            .if_supports_color(Stderr, |text| text.red())
            .if_supports_color(Stderr, |text| text.bold()),
        e
    );
}
