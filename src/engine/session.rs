// src/engine/session.rs

//! The async IO shell around the planners.
//!
//! A [`Session`] is opened once per run: it resolves the runtime (fatal on
//! failure), detects the host, derives the process environment and owns the
//! [`TaskEngine`]. All intents go through it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{self, TransitionPlan};
use crate::cleanup::{self, ResetContext, ResetReport, ResetRequest};
use crate::config::ConfigFile;
use crate::engine::core::{self as planner, PlanContext, PrerequisitePlan};
use crate::engine::hints::{derive_hints, Hint};
use crate::engine::status::{query_runtime_version, SessionStatus};
use crate::engine::Intent;
use crate::errors::{Result, WinepilotError};
use crate::exec::{self, SlotLease, TaskEngine, TaskHandle, TaskOutcome, TaskReport};
use crate::fs::FileSystem;
use crate::host::{self, GpuInfo, HostProfile};
use crate::pe;
use crate::runtime::{self, HostEnv, ProcessEnvironment, RuntimeDescriptor};
use crate::types::BackendChoice;

/// Result of installing prerequisites.
#[derive(Debug)]
pub enum PrerequisiteAction {
    Submitted(TaskHandle),
    Manual { instructions: String },
}

/// Result of a backend transition.
#[derive(Debug)]
pub struct BackendSwitch {
    pub target: BackendChoice,
    /// One report per task run, install first.
    pub reports: Vec<TaskReport>,
}

impl BackendSwitch {
    /// Outcome of the last task that ran.
    pub fn outcome(&self) -> TaskOutcome {
        self.reports
            .last()
            .map(|r| r.outcome.clone())
            .unwrap_or(TaskOutcome::Completed { exit_code: 0 })
    }
}

/// Reset report plus the status re-queried afterwards.
#[derive(Debug)]
pub struct ResetOutcome {
    pub report: ResetReport,
    pub status: SessionStatus,
}

#[derive(Debug)]
pub struct Session {
    config: Arc<ConfigFile>,
    fs: Arc<dyn FileSystem>,
    runtime: Arc<RuntimeDescriptor>,
    env: Arc<ProcessEnvironment>,
    host: HostProfile,
    prefix: PathBuf,
    engine: TaskEngine,
}

impl Session {
    /// Resolve the runtime and set up a session for `config`.
    ///
    /// Fails with `RuntimeNotFound` before any task can exist.
    pub fn open(config: ConfigFile, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let candidates = runtime::default_candidates(&config.session);
        let descriptor = runtime::resolve(fs.as_ref(), &candidates)?;
        let host = HostProfile::current().clone();
        Ok(Self::from_parts(config, fs, descriptor, host, &runtime::host_env()))
    }

    /// Assemble a session from already-resolved parts.
    pub fn from_parts(
        config: ConfigFile,
        fs: Arc<dyn FileSystem>,
        descriptor: RuntimeDescriptor,
        host: HostProfile,
        host_env: &HostEnv,
    ) -> Self {
        let prefix = config.prefix_path();
        let env = Arc::new(runtime::build_environment(&descriptor, &prefix, host_env));
        let runtime = Arc::new(descriptor);
        let engine = TaskEngine::new(
            Arc::clone(&runtime),
            prefix.clone(),
            Arc::clone(&env),
            config.engine.clone(),
            Arc::clone(&fs),
        );

        info!(
            runtime = %runtime.executable().display(),
            origin = %runtime.origin(),
            prefix = %prefix.display(),
            host = %host.family(),
            "session opened"
        );

        Self {
            config: Arc::new(config),
            fs,
            runtime,
            env,
            host,
            prefix,
            engine,
        }
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeDescriptor {
        &self.runtime
    }

    pub fn environment(&self) -> &ProcessEnvironment {
        &self.env
    }

    pub fn host(&self) -> &HostProfile {
        &self.host
    }

    pub fn prefix(&self) -> &std::path::Path {
        &self.prefix
    }

    /// The engine, for cancellation from other tasks (e.g. a Ctrl-C handler).
    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    fn plan_context(&self) -> PlanContext<'_> {
        PlanContext {
            config: &self.config,
            runtime: &self.runtime,
            prefix: &self.prefix,
            fs: self.fs.as_ref(),
        }
    }

    /// Plan `intent` without running it.
    pub fn plan(&self, intent: &Intent) -> Result<exec::TaskSpec> {
        planner::plan(intent, &self.plan_context())
    }

    /// Plan and submit `intent`.
    pub fn submit(&self, intent: Intent) -> Result<TaskHandle> {
        let spec = self.plan(&intent)?;
        info!(intent = intent.name(), label = %spec.label, "submitting intent");
        self.engine.submit(spec)
    }

    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        self.engine.cancel(handle)
    }

    /// Troubleshooting hints for a finished task.
    pub fn hints(&self, report: &TaskReport) -> Vec<Hint> {
        if report.outcome.is_success() {
            return Vec::new();
        }
        derive_hints(&report.log)
    }

    /// Plan the transition to `target` against the prefix's installed components.
    pub fn plan_backend(&self, target: BackendChoice) -> TransitionPlan {
        let installed = backend::installed_components(self.fs.as_ref(), &self.prefix);
        backend::plan_transition(
            target,
            &installed,
            &self.runtime,
            &self.config.session.component_tool,
            self.config.engine.setup_timeout,
        )
    }

    /// Move the prefix to `target`: install missing components, then write
    /// the registry. Stops after a failed install. `on_line` receives every
    /// log line as it arrives.
    ///
    /// The slot is held for the whole transition; other submissions are
    /// refused with `Busy` until it ends.
    pub async fn switch_backend(
        &self,
        target: BackendChoice,
        mut on_line: impl FnMut(&str),
    ) -> Result<BackendSwitch> {
        let lease = self.engine.reserve(format!("backend {target}"))?;
        let plan = self.plan_backend(target);
        if !plan.missing.is_empty() {
            info!(%target, missing = ?plan.missing, "backend needs components first");
        }

        let mut reports = Vec::new();
        for spec in plan.install.into_iter().chain(std::iter::once(plan.apply)) {
            let mut handle = self.engine.submit_leased(&lease, spec)?;
            if let Some(mut logs) = handle.take_logs() {
                while let Some(line) = logs.next_line().await {
                    on_line(&line);
                }
            }
            let report = handle.wait().await;
            let ok = report.outcome.is_success();
            reports.push(report);
            if !ok {
                warn!(%target, "backend transition stopped");
                break;
            }
        }

        Ok(BackendSwitch { target, reports })
    }

    /// Backend currently recorded in the prefix.
    pub fn current_backend(&self) -> Option<BackendChoice> {
        let store = backend::read_user_registry(self.fs.as_ref(), &self.prefix);
        backend::current_backend(&store)
    }

    /// Non-binding suggestion from the detected GPUs. Never applied here.
    pub async fn recommend_backend(&self) -> Option<(BackendChoice, GpuInfo)> {
        let gpus = host::detect_gpus().await;
        host::gpu::recommend(&gpus).map(|(choice, gpu)| (choice, gpu.clone()))
    }

    pub fn current_dpi(&self) -> u32 {
        let store = backend::read_user_registry(self.fs.as_ref(), &self.prefix);
        planner::current_dpi(&store)
    }

    /// Install the component tool through the host's package manager, or
    /// explain how to do it by hand.
    pub fn install_prerequisites(&self) -> Result<PrerequisiteAction> {
        match planner::plan_prerequisites(&self.host, &self.config.session.component_tool) {
            PrerequisitePlan::Task(spec) => Ok(PrerequisiteAction::Submitted(self.engine.submit(spec)?)),
            PrerequisitePlan::Manual(instructions) => Ok(PrerequisiteAction::Manual { instructions }),
        }
    }

    /// Gather a fresh status snapshot.
    pub async fn status(&self) -> SessionStatus {
        let ctx = self.plan_context();
        let store = backend::read_user_registry(self.fs.as_ref(), &self.prefix);
        let tool = &self.config.session.component_tool;

        SessionStatus {
            runtime_executable: self.runtime.executable().to_path_buf(),
            runtime_origin: self.runtime.origin(),
            runtime_version: query_runtime_version(&self.runtime, &self.env).await,
            architectures: crate::types::describe_arches(self.runtime.architectures()),
            prefix: self.prefix.clone(),
            prefix_exists: self.fs.is_dir(&self.prefix),
            target: planner::locate_target(&ctx).ok(),
            backend: backend::current_backend(&store),
            dpi: planner::current_dpi(&store),
            host_family: self.host.family(),
            automatic_install: self.host.supports_automatic_install(),
            component_tool_available: which::which(tool).is_ok(),
            gpus: host::detect_gpus().await,
            active_task: self.engine.active_task(),
        }
    }

    /// Reset the session. An active task is cancelled and awaited first;
    /// the slot stays reserved until the reset has finished.
    pub async fn reset(&self, request: ResetRequest) -> Result<ResetOutcome> {
        let lease = self.claim_slot("reset").await;

        let ctx = ResetContext {
            runtime: Arc::clone(&self.runtime),
            env: Arc::clone(&self.env),
            prefix: self.prefix.clone(),
            component_cache: self.config.component_cache(),
            repair_paths: self.config.repair_targets(),
            process_names: self.config.engine.process_names.clone(),
            grace_period: self.config.engine.grace_period,
        };
        let report = cleanup::reset(self.fs.as_ref(), &ctx, request).await;
        drop(lease);

        let report = report?;
        let status = self.status().await;
        Ok(ResetOutcome { report, status })
    }

    /// Cancel whatever runs, wait for the slot to drain, then reserve it.
    async fn claim_slot(&self, label: &str) -> SlotLease {
        loop {
            if let Some(id) = self.engine.cancel_active() {
                info!(task = %id, %label, "cancelling active task");
            }
            self.engine.wait_idle().await;
            match self.engine.reserve(label) {
                Ok(lease) => return lease,
                Err(e) => debug!(error = %e, %label, "slot taken again; retrying"),
            }
        }
    }

    /// Launch the target in the foreground and return its exit code.
    ///
    /// Refused with `Busy` while anything holds the slot; holds it until the
    /// application exits.
    pub async fn handoff(&self, executable: Option<PathBuf>) -> Result<i32> {
        let _lease = self.engine.reserve("handoff")?;

        let spec = self.plan(&Intent::Launch { executable })?;
        if let Some(target) = spec.target.as_deref() {
            pe::check_compatibility(self.fs.as_ref(), target, &self.runtime)?;
        }
        let Some(step) = spec.steps.first() else {
            return Err(WinepilotError::InvalidTask("launch has no steps".to_string()));
        };
        exec::handoff(step, &self.env, spec.working_dir.as_deref()).await
    }
}
