// src/config/mod.rs

//! Configuration loading and validation for winepilot.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk, falling back to defaults (`loader.rs`).
//! - Validate durations, version selection and tweaks (`validate.rs`).
//! - Parse the small duration syntax used by `[engine]` (`duration.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use validate::parse_dword;
pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, EngineSection, EngineSettings, RawConfigFile, RegistryKind, RegistryTweak,
    SessionSection, VersionConfig,
};
