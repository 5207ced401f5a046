// src/exec/supervisor.rs

//! Single-flight task engine.
//!
//! At most one task runs per engine. The slot is claimed synchronously in
//! [`TaskEngine::submit`] and released by the worker only after all
//! teardown work is finished, so a second submission never observes a
//! half-torn-down predecessor.
//!
//! Work that touches the prefix without being a task (resets, foreground
//! handoff, multi-task transitions) holds a [`SlotLease`] instead, which
//! refuses ordinary submissions for as long as it lives.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::config::EngineSettings;
use crate::errors::{Result, WinepilotError};
use crate::exec::handle::{LogStream, TaskHandle, TaskId, TaskReport, TaskState};
use crate::exec::spec::TaskSpec;
use crate::exec::task_runner::{run_task, Worker};
use crate::fs::FileSystem;
use crate::pe;
use crate::runtime::{ProcessEnvironment, RuntimeDescriptor};

#[derive(Debug)]
pub(crate) struct ActiveTask {
    pub id: TaskId,
    pub label: String,
    pub cancel: Option<oneshot::Sender<()>>,
    pub state: watch::Receiver<TaskState>,
    /// Set once the worker stops accepting cancellation.
    pub closing: bool,
}

/// Holder of a [`SlotLease`], as seen from inside the slot.
#[derive(Debug)]
pub(crate) struct LeaseEntry {
    pub id: TaskId,
    pub label: String,
    pub state: watch::Receiver<TaskState>,
}

#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub task: Option<ActiveTask>,
    pub lease: Option<LeaseEntry>,
}

impl SlotState {
    /// Identifier of whatever occupies the slot, task first.
    fn occupant(&self) -> Option<TaskId> {
        self.task
            .as_ref()
            .map(|t| t.id)
            .or_else(|| self.lease.as_ref().map(|l| l.id))
    }
}

/// Shared occupancy of the single execution slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct Slot(Arc<Mutex<SlotState>>);

impl Slot {
    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting cancellation for task `id`. Returns `true` when a
    /// cancellation was already requested.
    pub fn close(&self, id: TaskId) -> bool {
        let mut guard = self.lock();
        match guard.task.as_mut() {
            Some(task) if task.id == id => {
                task.closing = true;
                task.cancel.is_none()
            }
            _ => false,
        }
    }

    /// Release the task part of the slot if it is still held by `id`.
    pub fn release(&self, id: TaskId) {
        let mut guard = self.lock();
        if guard.task.as_ref().is_some_and(|t| t.id == id) {
            guard.task = None;
        }
    }
}

/// Releases a task's slot when dropped, including while a worker unwinds.
pub(crate) struct SlotRelease {
    slot: Slot,
    id: TaskId,
}

impl SlotRelease {
    pub fn new(slot: Slot, id: TaskId) -> Self {
        Self { slot, id }
    }

    /// See [`Slot::close`].
    pub fn close(&self) -> bool {
        self.slot.close(self.id)
    }
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}

/// Exclusive hold on the slot for work that is not a task (resets, handoff,
/// multi-task transitions).
///
/// While a lease is held, [`TaskEngine::submit`] fails with `Busy`; only
/// [`TaskEngine::submit_leased`] with this lease may run tasks. Dropping the
/// lease frees the slot.
#[derive(Debug)]
pub struct SlotLease {
    id: TaskId,
    label: String,
    slot: Slot,
    state_tx: watch::Sender<TaskState>,
}

impl SlotLease {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        {
            let mut guard = self.slot.lock();
            if guard.lease.as_ref().is_some_and(|l| l.id == self.id) {
                guard.lease = None;
            }
        }
        self.state_tx.send_replace(TaskState::Completed);
        debug!(lease = %self.id, label = %self.label, "slot lease released");
    }
}

/// Brief description of the task occupying the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTaskInfo {
    pub id: TaskId,
    pub label: String,
    pub state: TaskState,
}

/// Runs [`TaskSpec`]s against one runtime and prefix, one at a time.
#[derive(Debug, Clone)]
pub struct TaskEngine {
    runtime: Arc<RuntimeDescriptor>,
    prefix: PathBuf,
    env: Arc<ProcessEnvironment>,
    settings: EngineSettings,
    fs: Arc<dyn FileSystem>,
    slot: Slot,
    next_id: Arc<AtomicU64>,
}

impl TaskEngine {
    pub fn new(
        runtime: Arc<RuntimeDescriptor>,
        prefix: impl Into<PathBuf>,
        env: Arc<ProcessEnvironment>,
        settings: EngineSettings,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            runtime,
            prefix: prefix.into(),
            env,
            settings,
            fs,
            slot: Slot::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn runtime(&self) -> &RuntimeDescriptor {
        &self.runtime
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn environment(&self) -> &ProcessEnvironment {
        &self.env
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn filesystem(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Start `spec` in the background.
    ///
    /// Must be called from within a Tokio runtime. Fails without spawning
    /// anything when `spec` has no steps, when its target is incompatible with
    /// the runtime, or when a task or lease holds the slot.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskHandle> {
        self.start(spec, None)
    }

    /// Start `spec` under `lease`. Fails with `Busy` only while one of the
    /// lease's own tasks is still running.
    pub fn submit_leased(&self, lease: &SlotLease, spec: TaskSpec) -> Result<TaskHandle> {
        self.start(spec, Some(lease.id))
    }

    /// Take the slot for work that is not a task.
    ///
    /// Fails with `Busy` when a task or another lease holds it.
    pub fn reserve(&self, label: impl Into<String>) -> Result<SlotLease> {
        let label = label.into();
        let mut guard = self.slot.lock();
        if let Some(occupant) = guard.occupant() {
            debug!(active = %occupant, %label, "refusing reservation while busy");
            return Err(WinepilotError::Busy(occupant));
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (state_tx, state_rx) = watch::channel(TaskState::Running);
        guard.lease = Some(LeaseEntry {
            id,
            label: label.clone(),
            state: state_rx,
        });
        drop(guard);

        debug!(lease = %id, %label, "slot reserved");
        Ok(SlotLease {
            id,
            label,
            slot: self.slot.clone(),
            state_tx,
        })
    }

    fn start(&self, spec: TaskSpec, lease: Option<TaskId>) -> Result<TaskHandle> {
        if spec.steps.is_empty() {
            return Err(WinepilotError::InvalidTask(format!(
                "'{}' has no steps",
                spec.label
            )));
        }

        if let Some(target) = spec.target.as_deref() {
            pe::check_compatibility(self.fs.as_ref(), target, &self.runtime)?;
        }

        let mut guard = self.slot.lock();
        if let Some(active) = guard.task.as_ref() {
            debug!(active = %active.id, label = %spec.label, "refusing submission while busy");
            return Err(WinepilotError::Busy(active.id));
        }
        if let Some(held) = guard.lease.as_ref().filter(|l| Some(l.id) != lease) {
            debug!(lease = %held.id, label = %spec.label, "refusing submission while slot is reserved");
            return Err(WinepilotError::Busy(held.id));
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        let (progress_tx, progress_rx) = watch::channel((0, spec.steps.len()));
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        guard.task = Some(ActiveTask {
            id,
            label: spec.label.clone(),
            cancel: Some(cancel_tx),
            state: state_rx.clone(),
            closing: false,
        });
        drop(guard);

        state_tx.send_replace(TaskState::Running);
        info!(task = %id, label = %spec.label, steps = spec.steps.len(), "task accepted");

        let timeout = spec.timeout.unwrap_or(self.settings.default_timeout);
        let handle = TaskHandle::new(
            id,
            spec.label.clone(),
            state_rx,
            progress_rx,
            LogStream::new(log_rx),
            report_rx,
        );

        let worker = Worker {
            id,
            spec,
            timeout,
            runtime: Arc::clone(&self.runtime),
            prefix: self.prefix.clone(),
            env: Arc::clone(&self.env),
            settings: self.settings.clone(),
            fs: Arc::clone(&self.fs),
            slot: self.slot.clone(),
            state_tx,
            progress_tx,
            log_tx,
            report_tx,
        };
        tokio::spawn(run_task(worker, cancel_rx));

        Ok(handle)
    }

    /// Request cancellation of the task behind `handle`.
    ///
    /// Returns `false` when that task is no longer active or is already
    /// publishing its outcome. Repeated requests are harmless; the terminal
    /// state is observed through the handle.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        self.cancel_id(handle.id())
    }

    /// Same as [`TaskEngine::cancel`], by identifier.
    pub fn cancel_id(&self, id: TaskId) -> bool {
        let mut guard = self.slot.lock();
        match guard.task.as_mut() {
            Some(active) if active.id == id && !active.closing => {
                if let Some(tx) = active.cancel.take() {
                    info!(task = %id, "cancellation requested");
                    let _ = tx.send(());
                }
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever task is running, if anything. Leases are not
    /// cancellable.
    pub fn cancel_active(&self) -> Option<TaskId> {
        let id = self.slot.lock().task.as_ref().map(|t| t.id)?;
        self.cancel_id(id).then_some(id)
    }

    /// Wait for `handle` to reach a terminal state.
    pub async fn await_task(&self, handle: TaskHandle) -> TaskReport {
        handle.wait().await
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().occupant().is_some()
    }

    /// The running task, or the lease holding the slot.
    pub fn active_task(&self) -> Option<ActiveTaskInfo> {
        let guard = self.slot.lock();
        if let Some(t) = guard.task.as_ref() {
            return Some(ActiveTaskInfo {
                id: t.id,
                label: t.label.clone(),
                state: t.state.borrow().clone(),
            });
        }
        guard.lease.as_ref().map(|l| ActiveTaskInfo {
            id: l.id,
            label: l.label.clone(),
            state: l.state.borrow().clone(),
        })
    }

    /// Wait until neither a task nor a lease holds the slot.
    pub async fn wait_idle(&self) {
        loop {
            let state = {
                let guard = self.slot.lock();
                guard
                    .task
                    .as_ref()
                    .map(|t| t.state.clone())
                    .or_else(|| guard.lease.as_ref().map(|l| l.state.clone()))
            };
            // Terminal state is published after the slot is released.
            let Some(mut state) = state else { return };
            let _ = state.wait_for(TaskState::is_terminal).await;
        }
    }
}
