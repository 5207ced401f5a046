// src/engine/hints.rs

//! Troubleshooting hints derived from a failed task's log.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::types::BackendChoice;

/// A suggestion for the operator after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// The graphics stack failed to initialise; try another backend.
    GraphicsFailure { suggested: BackendChoice },
    /// A 32-bit program needed WoW64 support the runtime lacks.
    Missing32BitSupport,
    /// A DLL could not be loaded; installing a component may help.
    MissingLibrary { name: String },
}

impl std::fmt::Display for Hint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hint::GraphicsFailure { suggested } => write!(
                f,
                "graphics initialisation failed; try `winepilot backend --set {suggested}`"
            ),
            Hint::Missing32BitSupport => f.write_str(
                "a 32-bit component failed to load; use a runtime with 32-bit (WoW64) support",
            ),
            Hint::MissingLibrary { name } => write!(
                f,
                "library {name} could not be loaded; a redistributable component may be missing"
            ),
        }
    }
}

struct Patterns {
    graphics: Regex,
    missing_library: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let graphics = Regex::new(r"(?i)(vk_error|vulkan.*(fail|error|not supported)|dri3.*(fail|error|not)|failed to create.*device)");
            let missing = Regex::new(r"(?i)library\s+(\S+\.dll)\s+.*not found");
            match (graphics, missing) {
                (Ok(graphics), Ok(missing_library)) => Some(Patterns {
                    graphics,
                    missing_library,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "invalid hint pattern");
                    None
                }
            }
        })
        .as_ref()
}

/// Inspect `log` for known failure signatures. Each hint appears at most once.
pub fn derive_hints(log: &[String]) -> Vec<Hint> {
    let Some(p) = patterns() else {
        return Vec::new();
    };

    let mut hints = Vec::new();
    if log.iter().any(|l| p.graphics.is_match(l)) {
        hints.push(Hint::GraphicsFailure {
            suggested: BackendChoice::LegacyGl,
        });
    }

    if log.iter().any(|l| {
        let lower = l.to_lowercase();
        lower.contains("syswow64") && lower.contains("ntdll.dll")
    }) {
        hints.push(Hint::Missing32BitSupport);
    }

    let libraries: BTreeSet<String> = log
        .iter()
        .filter_map(|l| p.missing_library.captures(l))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_matches(['"', '\'']).to_lowercase())
        .collect();
    hints.extend(libraries.into_iter().map(|name| Hint::MissingLibrary { name }));

    hints
}
