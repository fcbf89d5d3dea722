//! Worker subprocesses for per-symbol counting.
//!
//! The manager spawns one worker per pattern byte. Each worker counts its
//! byte in the target file and writes a single result line into a private
//! pipe whose write end it inherited at spawn time.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │     Manager     │
//!                     │  (orchestrator) │
//!                     └────────┬────────┘
//!                              │  one pipe per worker
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ symbol p0 │  │ symbol p1 │  │ symbol pN │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Features
//!
//! - **Process isolation**: A crashing worker only loses its own record
//! - **Non-blocking supervision**: Exits are observed with `WNOHANG` polling
//! - **Clean teardown**: Every worker is signalled and reaped on abort

mod ipc;
mod pool;
mod proc;
mod protocol;
mod scan;
mod signals;
mod spawn;
pub mod worker_main;

pub use pool::{WorkerPool, WorkerPoolConfig};
pub use protocol::ResultMessage;
pub use spawn::{WORKER_LOG_ENV, WorkerCommand};
pub use worker_main::{WorkerArgs, run_worker_main};
