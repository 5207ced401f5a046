// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, EngineSection, EngineSettings, RawConfigFile, RegistryKind, RegistryTweak,
};
use crate::errors::{Result, WinepilotError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WinepilotError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let engine = validate_engine(&raw.engine)?;
        validate_session(&raw)?;
        validate_versions(&raw)?;
        validate_tweaks(&raw.tweaks)?;
        Ok(ConfigFile::new_unchecked(
            raw.session,
            engine,
            raw.versions,
            raw.tweaks,
        ))
    }
}

fn validate_engine(engine: &EngineSection) -> Result<EngineSettings> {
    let process_names: Vec<String> = engine
        .process_names
        .iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    if process_names.is_empty() {
        return Err(WinepilotError::ConfigError(
            "[engine].process_names must list at least one process name".to_string(),
        ));
    }

    Ok(EngineSettings {
        default_timeout: positive_duration("default_timeout", &engine.default_timeout)?,
        setup_timeout: positive_duration("setup_timeout", &engine.setup_timeout)?,
        launch_timeout: positive_duration("launch_timeout", &engine.launch_timeout)?,
        grace_period: positive_duration("grace_period", &engine.grace_period)?,
        process_names,
    })
}

/// Upper bound for any `[engine]` duration: one year.
const MAX_ENGINE_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn positive_duration(field: &str, value: &str) -> Result<Duration> {
    let dur = parse_duration(value)
        .map_err(|e| WinepilotError::ConfigError(format!("[engine].{field}: {e}")))?;
    if dur.is_zero() {
        return Err(WinepilotError::ConfigError(format!(
            "[engine].{field} must be greater than zero (got {value:?})"
        )));
    }
    if dur > MAX_ENGINE_DURATION {
        return Err(WinepilotError::ConfigError(format!(
            "[engine].{field} must be at most 8760h (got {value:?})"
        )));
    }
    Ok(dur)
}

fn validate_session(cfg: &RawConfigFile) -> Result<()> {
    if cfg.session.component_tool.trim().is_empty() {
        return Err(WinepilotError::ConfigError(
            "[session].component_tool must not be empty".to_string(),
        ));
    }
    for rel in cfg.session.repair_paths.iter() {
        let path = std::path::Path::new(rel);
        let escapes = path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if rel.trim().is_empty() || escapes {
            return Err(WinepilotError::ConfigError(format!(
                "[session].repair_paths entry '{}' must be a relative path inside the prefix",
                rel
            )));
        }
    }
    if let Some(version) = &cfg.session.version {
        if !cfg.versions.contains_key(version) {
            return Err(WinepilotError::ConfigError(format!(
                "[session].version '{}' has no matching [versions.{}] section",
                version, version
            )));
        }
    }
    Ok(())
}

fn validate_versions(cfg: &RawConfigFile) -> Result<()> {
    for (key, version) in cfg.versions.iter() {
        if version.components.iter().any(|c| c.trim().is_empty()) {
            return Err(WinepilotError::ConfigError(format!(
                "[versions.{}] contains an empty component name",
                key
            )));
        }
        for pattern in version.targets.iter() {
            globset::Glob::new(pattern).map_err(|e| {
                WinepilotError::ConfigError(format!(
                    "[versions.{}] invalid target glob '{}': {}",
                    key, pattern, e
                ))
            })?;
        }
    }
    Ok(())
}

fn validate_tweaks(tweaks: &[RegistryTweak]) -> Result<()> {
    for tweak in tweaks {
        if tweak.key.trim().is_empty() || tweak.name.trim().is_empty() {
            return Err(WinepilotError::ConfigError(
                "[[tweaks]] entries need a non-empty key and name".to_string(),
            ));
        }
        if tweak.kind == RegistryKind::Dword && parse_dword(&tweak.value).is_none() {
            return Err(WinepilotError::ConfigError(format!(
                "tweak '{}\\{}' has kind dword but value '{}' is not a 32-bit number",
                tweak.key, tweak.name, tweak.value
            )));
        }
    }
    Ok(())
}

/// Parse a DWORD given as decimal or `0x`-prefixed hex.
pub fn parse_dword(value: &str) -> Option<u32> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
