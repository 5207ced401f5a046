// src/engine/mod.rs

//! Orchestration session for winepilot.
//!
//! This module ties together:
//! - the resolved runtime and its process environment
//! - the host profile
//! - the task engine (single-flight supervision of external operations)
//! - the backend state machine and the reset engine
//!
//! Intents are turned into [`TaskSpec`](crate::exec::TaskSpec)s by the pure
//! planners in [`core`]; the IO shell that owns the engine and talks to the
//! outside world is [`session`].

use std::path::PathBuf;

/// Something the operator asked for that becomes a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Initialise the prefix and install the selected version's components.
    Setup,
    /// Install the selected version's components into an existing prefix.
    Components,
    /// Run a Windows installer through the runtime.
    Install { installer: PathBuf },
    /// Start the target application (located from the config when `None`).
    Launch { executable: Option<PathBuf> },
    /// Write the display DPI.
    SetDpi { dpi: u32 },
    /// Apply the configured registry tweaks.
    ApplyTweaks,
    /// Open the runtime's own configuration tool.
    Configure,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Setup => "setup",
            Intent::Components => "components",
            Intent::Install { .. } => "install",
            Intent::Launch { .. } => "launch",
            Intent::SetDpi { .. } => "dpi",
            Intent::ApplyTweaks => "tweaks",
            Intent::Configure => "winecfg",
        }
    }
}

pub mod core;
pub mod hints;
pub mod session;
pub mod status;

pub use self::core::{
    current_dpi, locate_target, plan, plan_prerequisites, PlanContext, PrerequisitePlan, DPI_RANGE,
};
pub use hints::{derive_hints, Hint};
pub use session::{BackendSwitch, PrerequisiteAction, ResetOutcome, Session};
pub use status::SessionStatus;
