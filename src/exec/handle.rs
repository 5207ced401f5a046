// src/exec/handle.rs

//! Caller-side view of a submitted task.

use std::fmt;

use tokio::sync::{mpsc, oneshot, watch};

/// Identifier assigned to each accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// A step's program could not be started.
    Spawn(String),
    /// A fatal step exited with a non-zero code (`-1` when killed by a signal).
    NonZeroExit(i32),
    /// The task exceeded its time budget and was torn down.
    Timeout,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Spawn(msg) => write!(f, "failed to start: {msg}"),
            FailureCause::NonZeroExit(code) => write!(f, "exited with code {code}"),
            FailureCause::Timeout => f.write_str("timed out"),
        }
    }
}

/// Lifecycle of a task. Moves forward only; the last three are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed(FailureCause),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed(_) | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => f.write_str("pending"),
            TaskState::Running => f.write_str("running"),
            TaskState::Completed => f.write_str("completed"),
            TaskState::Failed(cause) => write!(f, "failed ({cause})"),
            TaskState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every fatal step succeeded. `exit_code` is the last step's code.
    Completed { exit_code: i32 },
    Failed(FailureCause),
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed { .. } => TaskState::Completed,
            TaskOutcome::Failed(cause) => TaskState::Failed(cause.clone()),
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// What [`TaskHandle::wait`] resolves to.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: TaskId,
    pub label: String,
    pub outcome: TaskOutcome,
    /// Every decoded output line, in arrival order.
    pub log: Vec<String>,
}

/// Streamed, decoded output lines of a running task.
///
/// Ends (returns `None`) once the task reaches a terminal state.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl LogStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Handle returned by a successful submission.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    label: String,
    state: watch::Receiver<TaskState>,
    progress: watch::Receiver<(usize, usize)>,
    logs: Option<LogStream>,
    report: oneshot::Receiver<TaskReport>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        label: String,
        state: watch::Receiver<TaskState>,
        progress: watch::Receiver<(usize, usize)>,
        logs: LogStream,
        report: oneshot::Receiver<TaskReport>,
    ) -> Self {
        Self {
            id,
            label,
            state,
            progress,
            logs: Some(logs),
            report,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// `(finished steps, total steps)`.
    pub fn progress(&self) -> (usize, usize) {
        *self.progress.borrow()
    }

    /// Take the live output stream. Only the first call returns `Some`.
    pub fn take_logs(&mut self) -> Option<LogStream> {
        self.logs.take()
    }

    /// Wait for the terminal state and the collected log.
    pub async fn wait(self) -> TaskReport {
        let id = self.id;
        let label = self.label.clone();
        match self.report.await {
            Ok(report) => report,
            Err(_) => TaskReport {
                id,
                label,
                outcome: TaskOutcome::Failed(FailureCause::Spawn(
                    "task worker exited without reporting".to_string(),
                )),
                log: Vec::new(),
            },
        }
    }
}
