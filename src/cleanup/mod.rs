// src/cleanup/mod.rs

//! Leak-free teardown of a runtime session.
//!
//! - [`sweep`] signals process groups, asks the runtime server to exit and
//!   terminates leftover runtime processes bound to one prefix.
//! - [`locks`] removes lock files and server-socket artifacts.
//! - [`reset`] combines both into the soft and hard reset severities.
//!
//! The task worker reuses [`sweep`] and [`locks`] after every cancellation
//! or timeout.

pub mod locks;
pub mod reset;
pub mod sweep;

pub use locks::{remove_locks, server_socket_dir};
pub use reset::{reset, ResetContext, ResetReport, ResetRequest, ResetStatus};
pub use sweep::{
    find_runtime_processes, shutdown_server, signal_group, sweep_runtime_processes,
    RuntimeProcess, SweepReport,
};
