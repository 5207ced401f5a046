// src/exec/task_runner.rs

//! Worker that runs one task's steps to a terminal state.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::cleanup::{remove_locks, shutdown_server, signal_group, sweep_runtime_processes};
use crate::config::EngineSettings;
use crate::exec::handle::{FailureCause, TaskId, TaskOutcome, TaskReport, TaskState};
use crate::exec::spec::{CommandSpec, TaskSpec};
use crate::exec::supervisor::{Slot, SlotRelease};
use crate::fs::FileSystem;
use crate::runtime::{ProcessEnvironment, RuntimeDescriptor};

/// How long to keep reading after a child exits. Orphaned helpers may hold
/// the pipes open indefinitely.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Stand-in deadline for budgets too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Everything a worker owns for the lifetime of one task.
pub(crate) struct Worker {
    pub id: TaskId,
    pub spec: TaskSpec,
    pub timeout: Duration,
    pub runtime: Arc<RuntimeDescriptor>,
    pub prefix: PathBuf,
    pub env: Arc<ProcessEnvironment>,
    pub settings: EngineSettings,
    pub fs: Arc<dyn FileSystem>,
    pub slot: Slot,
    pub state_tx: watch::Sender<TaskState>,
    pub progress_tx: watch::Sender<(usize, usize)>,
    pub log_tx: mpsc::UnboundedSender<String>,
    pub report_tx: oneshot::Sender<TaskReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Timeout,
}

enum StepEnd {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    Interrupted(Interrupt),
}

/// Per-task output sink: forwards to the live stream and keeps a copy.
struct LogSink {
    tx: mpsc::UnboundedSender<String>,
    lines: Vec<String>,
}

impl LogSink {
    fn push(&mut self, line: String) {
        // The caller may have dropped its stream; the report still gets it.
        let _ = self.tx.send(line.clone());
        self.lines.push(line);
    }
}

/// Run the task to completion and publish its terminal state.
///
/// Publication order: release the slot, close the log stream, publish the
/// terminal state, deliver the report.
pub(crate) async fn run_task(worker: Worker, mut cancel_rx: oneshot::Receiver<()>) {
    let Worker {
        id,
        spec,
        timeout: budget,
        runtime,
        prefix,
        env,
        settings,
        fs,
        slot,
        state_tx,
        progress_tx,
        log_tx,
        report_tx,
    } = worker;

    let release = SlotRelease::new(slot, id);
    let deadline = deadline_after(budget);
    let mut sink = LogSink {
        tx: log_tx,
        lines: Vec::new(),
    };
    let total = spec.steps.len();
    let mut outcome = TaskOutcome::Completed { exit_code: 0 };
    let mut torn_down = false;
    let mut last_group = None;

    for (index, step) in spec.steps.iter().enumerate() {
        info!(task = %id, step = index + 1, total, label = %step.label, "starting step");

        let mut child = match spawn_step(step, &spec, &env) {
            Ok(child) => child,
            Err(e) => {
                let msg = format!("{}: {e}", step.program.display());
                if step.fatal {
                    error!(task = %id, error = %msg, "failed to spawn step");
                    outcome = TaskOutcome::Failed(FailureCause::Spawn(msg));
                    break;
                }
                warn!(task = %id, error = %msg, "failed to spawn optional step; continuing");
                sink.push(format!("warning: could not start '{}': {e}", step.label));
                progress_tx.send_replace((index + 1, total));
                continue;
            }
        };

        let pgid = child.id();
        last_group = pgid;
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let readers = attach_readers(&mut child, line_tx, id);

        let end = supervise(&mut child, &mut line_rx, &mut sink, &mut cancel_rx, deadline).await;

        match end {
            StepEnd::Exited(status) => {
                let cancelled = drain(&mut line_rx, &mut sink, &mut cancel_rx).await;
                abort_all(readers);

                if cancelled {
                    info!(task = %id, "cancelled while draining output; tearing down");
                    tear_down(Some(&mut child), pgid, &runtime, &env, &prefix, &settings, fs.as_ref()).await;
                    torn_down = true;
                    outcome = TaskOutcome::Cancelled;
                    break;
                }

                let code = status.code().unwrap_or(-1);
                debug!(task = %id, step = index + 1, code, "step exited");
                progress_tx.send_replace((index + 1, total));

                if status.success() {
                    outcome = TaskOutcome::Completed { exit_code: code };
                } else if step.fatal {
                    outcome = TaskOutcome::Failed(FailureCause::NonZeroExit(code));
                    break;
                } else {
                    warn!(task = %id, label = %step.label, code, "optional step failed; continuing");
                    sink.push(format!("warning: '{}' exited with code {code}", step.label));
                }
            }
            StepEnd::WaitFailed(e) => {
                abort_all(readers);
                error!(task = %id, error = %e, "lost track of step process");
                tear_down(Some(&mut child), pgid, &runtime, &env, &prefix, &settings, fs.as_ref()).await;
                torn_down = true;
                outcome = TaskOutcome::Failed(FailureCause::NonZeroExit(-1));
                break;
            }
            StepEnd::Interrupted(interrupt) => {
                abort_all(readers);
                info!(task = %id, ?interrupt, "tearing down task");
                tear_down(Some(&mut child), pgid, &runtime, &env, &prefix, &settings, fs.as_ref()).await;
                torn_down = true;
                outcome = match interrupt {
                    Interrupt::Cancel => TaskOutcome::Cancelled,
                    Interrupt::Timeout => TaskOutcome::Failed(FailureCause::Timeout),
                };
                break;
            }
        }
    }

    // A request that arrived after the last wakeup still gets a full teardown.
    if release.close() && !torn_down {
        info!(task = %id, "cancelled after the last step exited; tearing down");
        tear_down(None, last_group, &runtime, &env, &prefix, &settings, fs.as_ref()).await;
        outcome = TaskOutcome::Cancelled;
    }

    let LogSink { tx, lines } = sink;
    drop(release);
    drop(tx);
    state_tx.send_replace(outcome.state());

    info!(task = %id, label = %spec.label, outcome = ?outcome, "task finished");
    let _ = report_tx.send(TaskReport {
        id,
        label: spec.label,
        outcome,
        log: lines,
    });
}

fn spawn_step(step: &CommandSpec, spec: &TaskSpec, env: &ProcessEnvironment) -> std::io::Result<Child> {
    let mut cmd = Command::new(&step.program);
    cmd.args(&step.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    env.apply(&mut cmd);
    if let Some(dir) = spec.working_dir.as_deref() {
        cmd.current_dir(dir);
    }
    cmd.spawn()
}

/// Wait for the child to exit while forwarding its output, unless the task
/// is cancelled or runs out of time first.
async fn supervise(
    child: &mut Child,
    lines: &mut mpsc::UnboundedReceiver<String>,
    sink: &mut LogSink,
    cancel_rx: &mut oneshot::Receiver<()>,
    deadline: Instant,
) -> StepEnd {
    let mut lines_open = true;
    loop {
        tokio::select! {
            biased;

            _ = &mut *cancel_rx => return StepEnd::Interrupted(Interrupt::Cancel),

            _ = sleep_until(deadline) => return StepEnd::Interrupted(Interrupt::Timeout),

            line = lines.recv(), if lines_open => match line {
                Some(line) => sink.push(line),
                None => lines_open = false,
            },

            status = child.wait() => match status {
                Ok(status) => return StepEnd::Exited(status),
                Err(e) => return StepEnd::WaitFailed(e),
            },
        }
    }
}

/// Read stdout and stderr as byte lines, decode permissively and merge them
/// into one channel. Each stream keeps its own order.
fn attach_readers(
    child: &mut Child,
    tx: mpsc::UnboundedSender<String>,
    id: TaskId,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        handles.push(tokio::spawn(read_lines(stdout, tx.clone(), id, "stdout")));
    }
    if let Some(stderr) = child.stderr.take() {
        handles.push(tokio::spawn(read_lines(stderr, tx, id, "stderr")));
    }
    handles
}

async fn read_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>, id: TaskId, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(task = %id, stream = name, error = %e, "output read failed; ignoring rest of stream");
                break;
            }
        }
    }
}

fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Forward output still buffered after the child exited. Returns `true`
/// when cancellation was requested meanwhile.
async fn drain(
    lines: &mut mpsc::UnboundedReceiver<String>,
    sink: &mut LogSink,
    cancel_rx: &mut oneshot::Receiver<()>,
) -> bool {
    let until = sleep_until(Instant::now() + DRAIN_WINDOW);
    tokio::pin!(until);
    loop {
        tokio::select! {
            biased;

            _ = &mut *cancel_rx => return true,

            line = lines.recv() => match line {
                Some(line) => sink.push(line),
                None => return false,
            },

            _ = &mut until => {
                debug!("output still open after child exit; giving up on the rest");
                return false;
            }
        }
    }
}

fn abort_all(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        reader.abort();
    }
}

/// Cancellation sequence shared by cancel and timeout.
///
/// Runs in full even if the child has already exited: the runtime commonly
/// leaves helper processes and stale locks behind. `child` is `None` once
/// the last step has been reaped.
async fn tear_down(
    child: Option<&mut Child>,
    pgid: Option<u32>,
    runtime: &RuntimeDescriptor,
    env: &ProcessEnvironment,
    prefix: &std::path::Path,
    settings: &EngineSettings,
    fs: &dyn FileSystem,
) {
    let grace = settings.grace_period;

    if let Some(pgid) = pgid {
        signal_group(pgid, Signal::SIGTERM);
    }
    shutdown_server(runtime, env, grace).await;

    if let Some(child) = child {
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(code = ?status.code(), "child exited after SIGTERM"),
            Ok(Err(e)) => warn!(error = %e, "waiting for child after SIGTERM failed"),
            Err(_) => debug!(?grace, "child still running after grace period"),
        }
        // Anything left in the group is force-killed, exited leader or not.
        if let Some(pgid) = pgid {
            signal_group(pgid, Signal::SIGKILL);
        }
        if let Err(e) = child.kill().await {
            debug!(error = %e, "child already reaped");
        }
    } else if let Some(pgid) = pgid {
        signal_group(pgid, Signal::SIGKILL);
    }

    let sweep = sweep_runtime_processes(prefix, &settings.process_names, grace).await;
    if !sweep.terminated.is_empty() {
        info!(count = sweep.terminated.len(), "swept leftover runtime processes");
    }

    let removed = remove_locks(fs, prefix);
    debug!(count = removed.len(), "removed lock artifacts");
}
