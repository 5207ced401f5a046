// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::BackendChoice;

/// Command-line arguments for `winepilot`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "winepilot",
    version,
    about = "Set up, run and clean up a Windows application under a Wine prefix.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Winepilot.toml` in the current working directory. A missing
    /// file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Winepilot.toml", global = true)]
    pub config: String,

    /// Override `[session].prefix`.
    #[arg(long, value_name = "DIR", global = true)]
    pub prefix: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WINEPILOT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Print the planned steps without running anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show runtime, prefix, backend and host information.
    Status,

    /// Initialise the prefix and install the selected version's components.
    Setup,

    /// Install the selected version's components into an existing prefix.
    Components,

    /// Run a Windows installer inside the prefix.
    Install {
        /// Path to the installer executable.
        #[arg(value_name = "EXE")]
        installer: PathBuf,
    },

    /// Start the installed application.
    Launch {
        /// Executable to run instead of the configured target.
        #[arg(long, value_name = "EXE")]
        exe: Option<PathBuf>,

        /// Run in the foreground and exit with the application's exit code.
        #[arg(long)]
        handoff: bool,
    },

    /// Show, recommend or switch the rendering backend.
    Backend {
        /// Switch to this backend.
        #[arg(long, value_enum, value_name = "BACKEND")]
        set: Option<BackendChoice>,

        /// Suggest a backend from the detected GPU (never applied).
        #[arg(long, conflicts_with = "set")]
        recommend: bool,
    },

    /// Show or set the display DPI (96-480).
    Dpi {
        #[arg(value_name = "VALUE")]
        value: Option<u32>,
    },

    /// Apply the configured registry tweaks.
    Tweaks,

    /// Open the runtime's configuration dialog (winecfg).
    Winecfg,

    /// Install host prerequisites with the system package manager.
    Prerequisites,

    /// Stop runtime processes and remove transient state.
    Reset {
        /// Also delete `[session].repair_paths`, keeping the installation.
        #[arg(long, conflicts_with = "hard")]
        repair: bool,

        /// Also delete the prefix. Requires both confirmations.
        #[arg(long)]
        hard: bool,

        /// First confirmation for a hard reset.
        #[arg(long)]
        yes: bool,

        /// Second confirmation for a hard reset.
        #[arg(long)]
        yes_delete_prefix: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
