// src/cleanup/sweep.rs

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal as UnixSignal};
use nix::unistd::Pid as UnixPid;
use sysinfo::{
    Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind,
};
use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::runtime::environment::PREFIX_VAR;
use crate::runtime::{ProcessEnvironment, RuntimeDescriptor};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const COMM_LEN: usize = 15;

/// A live process owned by the runtime for some prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProcess {
    pub pid: u32,
    pub name: String,
}

impl std::fmt::Display for RuntimeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.name, self.pid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub terminated: Vec<RuntimeProcess>,
    /// Processes still alive after SIGKILL (normally empty).
    pub remaining: Vec<RuntimeProcess>,
}

/// Send `signal` to the process group led by `pgid`.
///
/// Returns `false` when the group no longer exists.
pub fn signal_group(pgid: u32, signal: UnixSignal) -> bool {
    let Ok(raw) = i32::try_from(pgid) else {
        return false;
    };
    match killpg(UnixPid::from_raw(raw), signal) {
        Ok(()) => {
            debug!(pgid, ?signal, "signalled process group");
            true
        }
        Err(e) => {
            debug!(pgid, ?signal, error = %e, "process group signal not delivered");
            false
        }
    }
}

/// Ask the runtime server for `env`'s prefix to shut down (`wineserver -k`).
///
/// Best effort: a missing server binary, a spawn failure or a server that
/// does not exit within `limit` are logged and otherwise ignored.
pub async fn shutdown_server(
    runtime: &RuntimeDescriptor,
    env: &ProcessEnvironment,
    limit: Duration,
) -> bool {
    let Some(server) = runtime.server() else {
        debug!("runtime has no server binary; skipping server shutdown");
        return false;
    };

    let mut cmd = Command::new(server);
    cmd.arg("-k")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    env.apply(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(server = %server.display(), error = %e, "could not start server shutdown");
            return false;
        }
    };

    match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(code = ?status.code(), "server shutdown finished");
            status.success()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "waiting for server shutdown failed");
            false
        }
        Err(_) => {
            warn!(?limit, "server shutdown did not finish in time");
            false
        }
    }
}

/// Live processes whose name is in `names` and whose `WINEPREFIX` is `prefix`.
pub async fn find_runtime_processes(prefix: &Path, names: &[String]) -> Vec<RuntimeProcess> {
    let prefix = prefix.to_path_buf();
    let names = names.to_vec();
    match tokio::task::spawn_blocking(move || scan(&prefix, &names)).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "process scan panicked");
            Vec::new()
        }
    }
}

/// Terminate every runtime process of `prefix`: SIGTERM, wait up to
/// `grace`, then SIGKILL whatever is left.
pub async fn sweep_runtime_processes(
    prefix: &Path,
    names: &[String],
    grace: Duration,
) -> SweepReport {
    let found = find_runtime_processes(prefix, names).await;
    if found.is_empty() {
        debug!(prefix = %prefix.display(), "no runtime processes to sweep");
        return SweepReport::default();
    }

    info!(
        prefix = %prefix.display(),
        count = found.len(),
        "terminating leftover runtime processes"
    );
    send_to(&found, Signal::Term);

    let deadline = Instant::now() + grace;
    let mut alive = found.clone();
    while !alive.is_empty() && Instant::now() < deadline {
        sleep(POLL_INTERVAL).await;
        alive = still_alive(&alive, find_runtime_processes(prefix, names).await);
    }

    if !alive.is_empty() {
        warn!(count = alive.len(), "runtime processes ignored SIGTERM; killing");
        send_to(&alive, Signal::Kill);
        sleep(POLL_INTERVAL).await;
        alive = still_alive(&alive, find_runtime_processes(prefix, names).await);
    }

    for p in &alive {
        warn!(process = %p, "runtime process survived SIGKILL");
    }

    SweepReport {
        terminated: found,
        remaining: alive,
    }
}

fn still_alive(previous: &[RuntimeProcess], current: Vec<RuntimeProcess>) -> Vec<RuntimeProcess> {
    current
        .into_iter()
        .filter(|p| previous.iter().any(|q| q.pid == p.pid))
        .collect()
}

fn send_to(targets: &[RuntimeProcess], signal: Signal) {
    let mut sys = System::new();
    let pids: Vec<Pid> = targets.iter().map(|p| Pid::from_u32(p.pid)).collect();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&pids),
        true,
        ProcessRefreshKind::nothing(),
    );
    for target in targets {
        let Some(process) = sys.process(Pid::from_u32(target.pid)) else {
            continue;
        };
        let delivered = match signal {
            Signal::Kill => process.kill(),
            other => process.kill_with(other).unwrap_or(false),
        };
        debug!(process = %target, ?signal, delivered, "signalled runtime process");
    }
}

fn scan(prefix: &Path, names: &[String]) -> Vec<RuntimeProcess> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing()
            .with_environ(UpdateKind::Always)
            .with_cmd(UpdateKind::Always),
    );

    let own = sysinfo::get_current_pid().ok();
    let mut found: Vec<RuntimeProcess> = sys
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != own)
        .filter(|(_, p)| p.status() != ProcessStatus::Zombie)
        .filter_map(|(pid, p)| {
            let name = matching_name(p.name(), p.cmd().first().map(|s| s.as_os_str()), names)?;
            bound_to_prefix(p.environ(), prefix).then(|| RuntimeProcess {
                pid: pid.as_u32(),
                name,
            })
        })
        .collect();
    found.sort_by_key(|p| p.pid);
    found
}

/// The configured name matched by the process name or its argv[0] basename.
///
/// Kernel process names are truncated to [`COMM_LEN`] bytes. Windows
/// binaries run under the runtime loader with `C:\...\app.exe` as argv[0],
/// so both separators are considered.
fn matching_name(name: &OsStr, argv0: Option<&OsStr>, names: &[String]) -> Option<String> {
    let name = name.to_string_lossy();
    let argv0 = argv0.map(|a| a.to_string_lossy().into_owned()).unwrap_or_default();
    let base = argv0.rsplit(['/', '\\']).next().unwrap_or_default();

    names
        .iter()
        .find(|n| {
            n.as_str() == name
                || n.as_str() == base
                || (name.len() == COMM_LEN && n.starts_with(&*name))
        })
        .cloned()
}

fn bound_to_prefix(environ: &[std::ffi::OsString], prefix: &Path) -> bool {
    let wanted = format!("{PREFIX_VAR}=");
    environ.iter().any(|entry| {
        entry
            .to_str()
            .and_then(|e| e.strip_prefix(&wanted))
            .is_some_and(|value| PathBuf::from(value) == prefix)
    })
}
