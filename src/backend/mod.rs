// src/backend/mod.rs

//! Backend Configuration State Machine.
//!
//! The state is the rendering backend recorded in the prefix's registry.
//! A transition to a new [`BackendChoice`] is planned purely by
//! [`plan_transition`]: an optional component install followed by a short
//! registry write. The session runs the two tasks in sequence.
//!
//! Hardware-based recommendations live in [`crate::host::gpu`] and are never
//! applied without an explicit transition.

pub mod registry;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::exec::{CommandSpec, TaskSpec};
use crate::fs::FileSystem;
use crate::runtime::RuntimeDescriptor;
use crate::types::BackendChoice;

pub use registry::{parse_registry, read_user_registry, reg_add_args, RegValue, RegistryStore};

pub const DIRECT3D_KEY: &str = r"HKCU\Software\Wine\Direct3D";
pub const RENDERER_VALUE: &str = "renderer";
pub const MARKER_KEY: &str = r"HKCU\Software\Winepilot";
pub const MARKER_VALUE: &str = "backend";

/// Installed-components registry kept by the component tool in the prefix.
pub const COMPONENT_LOG: &str = "winetricks.log";

/// Renderer value written for `choice`.
pub fn renderer(choice: BackendChoice) -> &'static str {
    match choice {
        BackendChoice::PerformanceVulkan | BackendChoice::ComputeVulkan => "vulkan",
        BackendChoice::LegacyGl => "gl",
        BackendChoice::Software => "gdi",
    }
}

/// Components that must be present in the prefix before `choice` works.
pub fn required_components(choice: BackendChoice) -> &'static [&'static str] {
    match choice {
        BackendChoice::ComputeVulkan => &["vkd3d"],
        _ => &[],
    }
}

/// Components recorded as installed in `<prefix>/winetricks.log`.
pub fn installed_components(fs: &dyn FileSystem, prefix: &Path) -> BTreeSet<String> {
    let path = prefix.join(COMPONENT_LOG);
    match fs.read_to_string(&path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_lowercase)
            .collect(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no installed-components log");
            BTreeSet::new()
        }
    }
}

/// Backend recorded in the registry, if any.
///
/// The marker distinguishes the two Vulkan variants; without it the
/// renderer value alone is interpreted.
pub fn current_backend(store: &RegistryStore) -> Option<BackendChoice> {
    if let Some(choice) = store
        .get(MARKER_KEY, MARKER_VALUE)
        .and_then(RegValue::as_str)
        .and_then(|s| s.parse().ok())
    {
        return Some(choice);
    }

    match store
        .get(DIRECT3D_KEY, RENDERER_VALUE)
        .and_then(RegValue::as_str)?
        .to_lowercase()
        .as_str()
    {
        "vulkan" => Some(BackendChoice::PerformanceVulkan),
        "gl" => Some(BackendChoice::LegacyGl),
        "gdi" | "no3d" => Some(BackendChoice::Software),
        _ => None,
    }
}

/// Tasks that move the prefix to `target`.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub target: BackendChoice,
    /// Required components not yet installed.
    pub missing: Vec<String>,
    /// Installs `missing`; `None` when nothing is missing.
    pub install: Option<TaskSpec>,
    /// Registry write recording the renderer and the marker.
    pub apply: TaskSpec,
}

/// Plan the transition to `target` given the installed-components set.
pub fn plan_transition(
    target: BackendChoice,
    installed: &BTreeSet<String>,
    runtime: &RuntimeDescriptor,
    component_tool: &str,
    install_timeout: Duration,
) -> TransitionPlan {
    let missing: Vec<String> = required_components(target)
        .iter()
        .filter(|c| !installed.contains(**c))
        .map(|c| c.to_string())
        .collect();

    let install = (!missing.is_empty()).then(|| {
        let args = std::iter::once("-q".to_string()).chain(missing.iter().cloned());
        TaskSpec::new(format!("install {} support", target))
            .step(CommandSpec::new(component_tool, args))
            .timeout(install_timeout)
    });

    let apply = TaskSpec::new(format!("switch backend to {target}"))
        .step(
            CommandSpec::runtime(
                runtime,
                reg_add_args(DIRECT3D_KEY, RENDERER_VALUE, &RegValue::Sz(renderer(target).to_string())),
            )
            .with_label(format!("set renderer = {}", renderer(target))),
        )
        .step(
            CommandSpec::runtime(
                runtime,
                reg_add_args(MARKER_KEY, MARKER_VALUE, &RegValue::Sz(target.as_str().to_string())),
            )
            .with_label(format!("record backend = {target}")),
        );

    TransitionPlan {
        target,
        missing,
        install,
        apply,
    }
}
