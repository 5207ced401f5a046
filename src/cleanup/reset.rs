// src/cleanup/reset.rs

//! Soft, repair and hard reset.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cleanup::locks::remove_locks;
use crate::cleanup::sweep::{shutdown_server, sweep_runtime_processes, RuntimeProcess};
use crate::errors::{Result, WinepilotError};
use crate::fs::FileSystem;
use crate::runtime::{ProcessEnvironment, RuntimeDescriptor};

/// Requested severity.
///
/// `Repair` also deletes the configured repair paths inside the prefix and
/// keeps everything else. A hard reset deletes the prefix and only proceeds
/// when both confirmations are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRequest {
    Soft,
    Repair,
    Hard {
        confirm_delete: bool,
        confirm_again: bool,
    },
}

impl ResetRequest {
    pub fn is_hard(&self) -> bool {
        matches!(self, ResetRequest::Hard { .. })
    }

    fn confirmed(&self) -> bool {
        match self {
            ResetRequest::Soft | ResetRequest::Repair => true,
            ResetRequest::Hard {
                confirm_delete,
                confirm_again,
            } => *confirm_delete && *confirm_again,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    Completed,
    /// Hard reset refused for lack of confirmation; nothing was touched.
    ConfirmationRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub status: ResetStatus,
    pub terminated: Vec<RuntimeProcess>,
    pub locks_removed: Vec<PathBuf>,
    pub cache_cleared: bool,
    /// Repair paths that existed and were removed.
    pub repaired: Vec<PathBuf>,
    pub prefix_deleted: bool,
    /// Runtime processes still alive after the sweep.
    pub remaining: Vec<RuntimeProcess>,
}

impl ResetReport {
    fn refused() -> Self {
        Self {
            status: ResetStatus::ConfirmationRequired,
            terminated: Vec::new(),
            locks_removed: Vec::new(),
            cache_cleared: false,
            repaired: Vec::new(),
            prefix_deleted: false,
            remaining: Vec::new(),
        }
    }
}

/// Everything a reset needs to know about the session it cleans up.
#[derive(Debug, Clone)]
pub struct ResetContext {
    pub runtime: Arc<RuntimeDescriptor>,
    pub env: Arc<ProcessEnvironment>,
    pub prefix: PathBuf,
    pub component_cache: PathBuf,
    /// Absolute directories removed by [`ResetRequest::Repair`].
    pub repair_paths: Vec<PathBuf>,
    pub process_names: Vec<String>,
    pub grace_period: Duration,
}

/// Run a reset of the requested severity.
///
/// The caller must make sure no task is running against the prefix.
pub async fn reset(
    fs: &dyn FileSystem,
    ctx: &ResetContext,
    request: ResetRequest,
) -> Result<ResetReport> {
    if !request.confirmed() {
        warn!(?request, "hard reset requires two confirmations; nothing done");
        return Ok(ResetReport::refused());
    }
    if request == ResetRequest::Repair && ctx.repair_paths.is_empty() {
        return Err(WinepilotError::InvalidTask(
            "repair needs [session].repair_paths to list at least one directory".to_string(),
        ));
    }

    info!(?request, prefix = %ctx.prefix.display(), "reset started");

    if fs.is_dir(&ctx.prefix) {
        shutdown_server(&ctx.runtime, &ctx.env, ctx.grace_period).await;
    }
    let sweep = sweep_runtime_processes(&ctx.prefix, &ctx.process_names, ctx.grace_period).await;
    let locks_removed = remove_locks(fs, &ctx.prefix);

    let repaired = if request == ResetRequest::Repair {
        remove_repair_paths(fs, ctx)
    } else {
        Vec::new()
    };

    // A repair keeps the component cache.
    let cache_cleared = request != ResetRequest::Repair && clear_cache(fs, &ctx.component_cache);

    let mut prefix_deleted = false;
    if request.is_hard() && fs.exists(&ctx.prefix) {
        if !sweep.remaining.is_empty() {
            warn!(
                count = sweep.remaining.len(),
                "runtime processes still alive while deleting the prefix"
            );
        }
        fs.remove_dir_all(&ctx.prefix).map_err(WinepilotError::from)?;
        prefix_deleted = true;
        info!(prefix = %ctx.prefix.display(), "prefix deleted");
    }

    Ok(ResetReport {
        status: ResetStatus::Completed,
        terminated: sweep.terminated,
        locks_removed,
        cache_cleared,
        repaired,
        prefix_deleted,
        remaining: sweep.remaining,
    })
}

fn clear_cache(fs: &dyn FileSystem, cache: &Path) -> bool {
    if !fs.exists(cache) || fs.is_symlink(cache) {
        return false;
    }
    match fs.remove_dir_all(cache) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %cache.display(), error = %e, "could not clear component cache");
            false
        }
    }
}

/// Remove the configured repair directories that exist. Symlinks and paths
/// outside the prefix are skipped.
fn remove_repair_paths(fs: &dyn FileSystem, ctx: &ResetContext) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    if !fs.is_dir(&ctx.prefix) {
        info!(prefix = %ctx.prefix.display(), "prefix does not exist; nothing to repair");
        return removed;
    }

    for path in &ctx.repair_paths {
        if !path.starts_with(&ctx.prefix) {
            warn!(path = %path.display(), "repair path outside the prefix; skipped");
            continue;
        }
        if fs.is_symlink(path) || !fs.exists(path) {
            continue;
        }
        let result = if fs.is_dir(path) {
            fs.remove_dir_all(path)
        } else {
            fs.remove_file(path)
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), "removed repair path");
                removed.push(path.clone());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove repair path"),
        }
    }
    removed
}
