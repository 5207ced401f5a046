// src/engine/status.rs

//! Point-in-time view of a session, as shown by `winepilot status` and
//! returned after resets.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::exec::ActiveTaskInfo;
use crate::host::GpuInfo;
use crate::runtime::{ProcessEnvironment, RuntimeDescriptor};
use crate::types::{BackendChoice, HostFamily, RuntimeOrigin};

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub runtime_executable: PathBuf,
    pub runtime_origin: RuntimeOrigin,
    /// `None` when the version query failed or timed out.
    pub runtime_version: Option<String>,
    pub architectures: String,
    pub prefix: PathBuf,
    pub prefix_exists: bool,
    pub target: Option<PathBuf>,
    /// `None` when the prefix has no recorded backend (runtime default).
    pub backend: Option<BackendChoice>,
    pub dpi: u32,
    pub host_family: HostFamily,
    pub automatic_install: bool,
    pub component_tool_available: bool,
    pub gpus: Vec<GpuInfo>,
    pub active_task: Option<ActiveTaskInfo>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };

        writeln!(
            f,
            "runtime:       {} ({}, {})",
            self.runtime_executable.display(),
            self.runtime_origin,
            self.architectures
        )?;
        writeln!(
            f,
            "version:       {}",
            self.runtime_version.as_deref().unwrap_or("unknown")
        )?;
        writeln!(
            f,
            "prefix:        {} (exists: {})",
            self.prefix.display(),
            yes_no(self.prefix_exists)
        )?;
        match &self.target {
            Some(t) => writeln!(f, "target:        {}", t.display())?,
            None => writeln!(f, "target:        not installed")?,
        }
        match self.backend {
            Some(b) => writeln!(f, "backend:       {b}")?,
            None => writeln!(f, "backend:       runtime default")?,
        }
        writeln!(f, "dpi:           {}", self.dpi)?;
        writeln!(
            f,
            "host:          {} (automatic install: {})",
            self.host_family,
            yes_no(self.automatic_install)
        )?;
        writeln!(
            f,
            "component tool: {}",
            if self.component_tool_available { "available" } else { "missing" }
        )?;
        if self.gpus.is_empty() {
            writeln!(f, "gpu:           not detected")?;
        }
        for gpu in &self.gpus {
            writeln!(f, "gpu:           {} ({})", gpu.name, gpu.vendor)?;
        }
        match &self.active_task {
            Some(t) => write!(f, "active task:   {} {} [{}]", t.id, t.label, t.state),
            None => write!(f, "active task:   none"),
        }
    }
}

/// Ask the runtime for its version string (`wine --version`), bounded in time.
pub async fn query_runtime_version(
    runtime: &RuntimeDescriptor,
    env: &ProcessEnvironment,
) -> Option<String> {
    let mut cmd = Command::new(runtime.executable());
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    env.apply(&mut cmd);

    match timeout(VERSION_QUERY_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Ok(Ok(out)) => {
            debug!(code = ?out.status.code(), "runtime version query failed");
            None
        }
        Ok(Err(e)) => {
            debug!(error = %e, "could not run runtime version query");
            None
        }
        Err(_) => {
            debug!("runtime version query timed out");
            None
        }
    }
}
