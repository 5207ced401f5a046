// src/engine/core.rs

//! Pure intent planning.
//!
//! Every function here turns an intent plus the session's static inputs
//! into a [`TaskSpec`]. Nothing is spawned; filesystem reads go through the
//! [`FileSystem`] seam so planning can be tested against a mock tree.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::backend::{reg_add_args, RegValue, RegistryStore};
use crate::config::{parse_dword, ConfigFile, RegistryKind, RegistryTweak};
use crate::engine::Intent;
use crate::errors::{Result, WinepilotError};
use crate::exec::{CommandSpec, TaskSpec};
use crate::fs::FileSystem;
use crate::host::HostProfile;
use crate::runtime::RuntimeDescriptor;

pub const DPI_RANGE: RangeInclusive<u32> = 96..=480;
pub const DEFAULT_DPI: u32 = 96;
pub const DESKTOP_KEY: &str = r"HKCU\Control Panel\Desktop";
pub const FONTS_KEY: &str = r"HKCU\Software\Wine\Fonts";
pub const DPI_VALUE: &str = "LogPixels";

/// Written by the runtime's first boot; its presence marks an initialised prefix.
const SYSTEM_REGISTRY_FILE: &str = "system.reg";

const GLOB_MAX_DEPTH: usize = 12;

/// Static inputs shared by all planners.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub config: &'a ConfigFile,
    pub runtime: &'a RuntimeDescriptor,
    pub prefix: &'a Path,
    pub fs: &'a dyn FileSystem,
}

/// Plan `intent` into a task.
pub fn plan(intent: &Intent, ctx: &PlanContext<'_>) -> Result<TaskSpec> {
    match intent {
        Intent::Setup => plan_setup(ctx),
        Intent::Components => plan_components(ctx),
        Intent::Install { installer } => plan_install(ctx, installer),
        Intent::Launch { executable } => plan_launch(ctx, executable.as_deref()),
        Intent::SetDpi { dpi } => plan_dpi(ctx, *dpi),
        Intent::ApplyTweaks => plan_tweaks(ctx),
        Intent::Configure => plan_configure(ctx),
    }
}

fn plan_setup(ctx: &PlanContext<'_>) -> Result<TaskSpec> {
    let boot = CommandSpec::runtime(ctx.runtime, ["wineboot", "--init"])
        .with_label("initialise prefix");

    Ok(TaskSpec::new("setup")
        .step(boot)
        .steps(component_steps(ctx))
        .timeout(ctx.config.engine.setup_timeout))
}

fn plan_components(ctx: &PlanContext<'_>) -> Result<TaskSpec> {
    require_prefix(ctx)?;
    let steps = component_steps(ctx);
    if steps.is_empty() {
        return Err(WinepilotError::InvalidTask(
            "the selected version lists no components".to_string(),
        ));
    }
    Ok(TaskSpec::new("components")
        .steps(steps)
        .timeout(ctx.config.engine.setup_timeout))
}

/// One non-fatal step per component; a failed component does not stop setup.
fn component_steps(ctx: &PlanContext<'_>) -> Vec<CommandSpec> {
    let tool = &ctx.config.session.component_tool;
    let Some((_, version)) = ctx.config.selected_version() else {
        return Vec::new();
    };
    version
        .components
        .iter()
        .map(|component| {
            CommandSpec::new(tool, ["-q", component.as_str()])
                .non_fatal()
                .with_label(format!("install {component}"))
        })
        .collect()
}

fn plan_install(ctx: &PlanContext<'_>, installer: &Path) -> Result<TaskSpec> {
    require_prefix(ctx)?;
    if !ctx.fs.is_file(installer) {
        return Err(WinepilotError::TargetNotFound(installer.display().to_string()));
    }

    let mut spec = TaskSpec::new(format!("install {}", file_name(installer)))
        .step(CommandSpec::runtime(ctx.runtime, [installer.display().to_string()]))
        .target(installer)
        .timeout(ctx.config.engine.setup_timeout);
    if let Some(dir) = installer.parent().filter(|d| !d.as_os_str().is_empty()) {
        spec = spec.working_dir(dir);
    }
    Ok(spec)
}

fn plan_launch(ctx: &PlanContext<'_>, executable: Option<&Path>) -> Result<TaskSpec> {
    require_prefix(ctx)?;
    let exe = match executable {
        Some(exe) if ctx.fs.is_file(exe) => exe.to_path_buf(),
        Some(exe) => return Err(WinepilotError::TargetNotFound(exe.display().to_string())),
        None => locate_target(ctx)?,
    };

    let mut spec = TaskSpec::new(format!("launch {}", file_name(&exe)))
        .step(CommandSpec::runtime(ctx.runtime, [exe.display().to_string()]))
        .target(&exe)
        .timeout(ctx.config.engine.launch_timeout);
    if let Some(dir) = exe.parent() {
        spec = spec.working_dir(dir);
    }
    Ok(spec)
}

fn plan_dpi(ctx: &PlanContext<'_>, dpi: u32) -> Result<TaskSpec> {
    require_prefix(ctx)?;
    if !DPI_RANGE.contains(&dpi) {
        return Err(WinepilotError::InvalidTask(format!(
            "dpi {dpi} outside {}..={}",
            DPI_RANGE.start(),
            DPI_RANGE.end()
        )));
    }

    let value = RegValue::Dword(dpi);
    let steps = [DESKTOP_KEY, FONTS_KEY].into_iter().map(|key| {
        CommandSpec::runtime(ctx.runtime, reg_add_args(key, DPI_VALUE, &value))
            .with_label(format!("set {key}\\{DPI_VALUE} = {dpi}"))
    });
    Ok(TaskSpec::new(format!("set dpi to {dpi}")).steps(steps))
}

fn plan_tweaks(ctx: &PlanContext<'_>) -> Result<TaskSpec> {
    require_prefix(ctx)?;
    if ctx.config.tweaks.is_empty() {
        return Err(WinepilotError::InvalidTask(
            "no registry tweaks configured".to_string(),
        ));
    }
    let steps = ctx.config.tweaks.iter().map(|tweak| tweak_step(ctx.runtime, tweak));
    Ok(TaskSpec::new("apply registry tweaks").steps(steps))
}

/// Runs with the launch budget.
fn plan_configure(ctx: &PlanContext<'_>) -> Result<TaskSpec> {
    require_prefix(ctx)?;
    Ok(TaskSpec::new("winecfg")
        .step(CommandSpec::runtime(ctx.runtime, ["winecfg"]).with_label("open runtime configuration"))
        .timeout(ctx.config.engine.launch_timeout))
}

fn tweak_step(runtime: &RuntimeDescriptor, tweak: &RegistryTweak) -> CommandSpec {
    let value = match tweak.kind {
        // Validation guarantees the dword parses.
        RegistryKind::Dword => parse_dword(&tweak.value)
            .map(RegValue::Dword)
            .unwrap_or_else(|| RegValue::Sz(tweak.value.clone())),
        RegistryKind::Sz => RegValue::Sz(tweak.value.clone()),
    };
    CommandSpec::runtime(runtime, reg_add_args(&tweak.key, &tweak.name, &value))
        .with_label(format!("set {}\\{} = {}", tweak.key, tweak.name, value))
}

/// DPI recorded in the registry, or the runtime's default.
pub fn current_dpi(store: &RegistryStore) -> u32 {
    store
        .get(DESKTOP_KEY, DPI_VALUE)
        .and_then(RegValue::as_dword)
        .unwrap_or(DEFAULT_DPI)
}

/// How prerequisites get installed on this host.
#[derive(Debug, Clone)]
pub enum PrerequisitePlan {
    Task(TaskSpec),
    /// No usable package manager; the operator has to do it.
    Manual(String),
}

/// Plan installation of the component tool through the host's package manager.
pub fn plan_prerequisites(profile: &HostProfile, component_tool: &str) -> PrerequisitePlan {
    let packages = vec![component_tool.to_string(), "cabextract".to_string()];
    let Some(installer) = profile.installer() else {
        return PrerequisitePlan::Manual(format!(
            "automatic installation is not available on this system ({:?}); \
             install these packages with your package manager: {}",
            profile.rule(),
            packages.join(" ")
        ));
    };

    let commands = installer.commands(&packages);
    let steps = commands
        .iter()
        .filter_map(|argv| CommandSpec::from_argv(argv));
    PrerequisitePlan::Task(TaskSpec::new("install prerequisites").steps(steps))
}

fn require_prefix(ctx: &PlanContext<'_>) -> Result<()> {
    if ctx.fs.is_file(&ctx.prefix.join(SYSTEM_REGISTRY_FILE)) {
        Ok(())
    } else {
        Err(WinepilotError::PrefixMissing(ctx.prefix.to_path_buf()))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Find the installed target executable for the selected version.
///
/// Target globs are relative to the prefix. When several files match, the
/// greatest path wins, so version-named install directories resolve to the
/// newest release.
pub fn locate_target(ctx: &PlanContext<'_>) -> Result<PathBuf> {
    let Some((key, version)) = ctx.config.selected_version() else {
        return Err(WinepilotError::TargetNotFound(
            "no application version configured".to_string(),
        ));
    };
    if version.targets.is_empty() {
        return Err(WinepilotError::TargetNotFound(format!(
            "version '{key}' lists no targets"
        )));
    }

    let set = build_globset(&version.targets)?;
    let mut found = Vec::new();
    for pattern in &version.targets {
        let (base, depth) = literal_base(pattern);
        walk_matches(ctx.fs, ctx.prefix, &ctx.prefix.join(base), &set, depth, &mut found);
    }

    found.sort();
    found.dedup();
    debug!(count = found.len(), "target candidates");
    found.pop().ok_or_else(|| {
        WinepilotError::TargetNotFound(format!(
            "no file under {} matches {:?}",
            ctx.prefix.display(),
            version.targets
        ))
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .case_insensitive(true)
            .build()
            .map_err(|e| WinepilotError::ConfigError(format!("invalid target glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| WinepilotError::ConfigError(format!("building target globs: {e}")))
}

/// Leading literal directories of `pattern` and how many components remain.
fn literal_base(pattern: &str) -> (PathBuf, usize) {
    let parts: Vec<&str> = pattern.split('/').filter(|p| !p.is_empty()).collect();
    let is_meta = |p: &str| p.contains(['*', '?', '[', '{']);
    let literal = parts
        .iter()
        .take(parts.len().saturating_sub(1))
        .take_while(|p| !is_meta(p))
        .count();

    let rest = &parts[literal..];
    let depth = if rest.iter().any(|p| p.contains("**")) {
        GLOB_MAX_DEPTH
    } else {
        rest.len()
    };
    (parts[..literal].iter().collect(), depth)
}

fn walk_matches(
    fs: &dyn FileSystem,
    root: &Path,
    dir: &Path,
    set: &GlobSet,
    depth: usize,
    out: &mut Vec<PathBuf>,
) {
    if depth == 0 {
        return;
    }
    let Ok(entries) = fs.read_dir(dir) else {
        return;
    };
    for entry in entries {
        if fs.is_symlink(&entry) {
            continue;
        }
        if fs.is_dir(&entry) {
            walk_matches(fs, root, &entry, set, depth - 1, out);
        } else if let Ok(rel) = entry.strip_prefix(root) {
            if set.is_match(rel) {
                out.push(entry);
            }
        }
    }
}
