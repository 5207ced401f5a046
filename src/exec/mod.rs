// src/exec/mod.rs

//! Task Execution Engine.
//!
//! Runs one external operation at a time, streams its output, and supports
//! timeout and cooperative cancellation.
//!
//! - [`spec`] describes the work: ordered [`CommandSpec`] steps in a
//!   [`TaskSpec`].
//! - [`supervisor`] owns the single-flight slot and hands out
//!   [`TaskHandle`]s and [`SlotLease`]s.
//! - [`task_runner`] is the per-task worker: spawning, output decoding,
//!   exit/cancel/deadline supervision and teardown.
//! - [`handle`] holds the caller-side types.
//! - [`handoff`] runs a foreground child whose exit status becomes the
//!   caller's.

pub mod handle;
pub mod handoff;
pub mod spec;
pub mod supervisor;
pub mod task_runner;

pub use handle::{FailureCause, LogStream, TaskHandle, TaskId, TaskOutcome, TaskReport, TaskState};
pub use handoff::{exit_code, handoff};
pub use spec::{CommandSpec, TaskSpec};
pub use supervisor::{ActiveTaskInfo, SlotLease, TaskEngine};
