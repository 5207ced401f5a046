// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only errors that must be raised synchronously to a caller live here:
//! resolution failures, compatibility failures, single-flight refusals and
//! configuration problems. Per-task failures (spawn errors, non-zero exits,
//! timeouts) are reported through the task's terminal state instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::exec::TaskId;
use crate::types::Arch;

#[derive(Error, Debug)]
pub enum WinepilotError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("no usable compatibility runtime found (checked: {checked})")]
    RuntimeNotFound { checked: String },

    #[error(
        "{} is a {binary} executable but the runtime only supports {supported}",
        target.display()
    )]
    ArchitectureMismatch {
        target: PathBuf,
        binary: Arch,
        supported: String,
    },

    #[error("another task is already running ({0})")]
    Busy(TaskId),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("target executable not found: {0}")]
    TargetNotFound(String),

    #[error("prefix does not exist: {}", .0.display())]
    PrefixMissing(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WinepilotError>;
