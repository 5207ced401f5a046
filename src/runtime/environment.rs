// src/runtime/environment.rs

//! Process environment construction.
//!
//! [`build_environment`] is referentially transparent: the same descriptor,
//! prefix and inherited environment always produce an equal
//! [`ProcessEnvironment`]. It never touches the filesystem, which is why the
//! prefix-scoped server identifier is a hash of the path rather than of the
//! directory's inode.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::runtime::RuntimeDescriptor;

/// Inherited host environment, as captured by [`host_env`].
pub type HostEnv = BTreeMap<String, String>;

pub const PREFIX_VAR: &str = "WINEPREFIX";
pub const RUNTIME_VAR: &str = "WINE";
pub const SERVER_VAR: &str = "WINESERVER";
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";
pub const DLL_PATH_VAR: &str = "WINEDLLPATH";
pub const SERVER_ID_VAR: &str = "WINEPILOT_SERVER_ID";

/// Full variable set for a child process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessEnvironment {
    vars: BTreeMap<String, String>,
}

impl ProcessEnvironment {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// The prefix this environment points at.
    pub fn prefix(&self) -> Option<PathBuf> {
        self.get(PREFIX_VAR).map(PathBuf::from)
    }

    /// Replace a command's environment with exactly this variable set.
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.env_clear();
        cmd.envs(self.vars.iter());
    }
}

impl From<BTreeMap<String, String>> for ProcessEnvironment {
    fn from(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }
}

/// Capture the current process environment.
///
/// Variables whose name or value is not valid Unicode are skipped; they
/// could not be reproduced faithfully in the map anyway.
pub fn host_env() -> HostEnv {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Derive the environment for a runtime session on `prefix`.
///
/// Sets the prefix, runtime and (when present) server locations, prepends
/// the runtime's library and DLL directories to any inherited search path,
/// and adds the prefix-scoped server identifier. Everything else in
/// `host` is carried over untouched.
pub fn build_environment(
    runtime: &RuntimeDescriptor,
    prefix: &Path,
    host: &HostEnv,
) -> ProcessEnvironment {
    let mut vars = host.clone();

    vars.insert(PREFIX_VAR.to_string(), path_str(prefix));
    vars.insert(RUNTIME_VAR.to_string(), path_str(runtime.executable()));
    if let Some(server) = runtime.server() {
        vars.insert(SERVER_VAR.to_string(), path_str(server));
    }

    prepend_search_path(&mut vars, LIBRARY_PATH_VAR, runtime.library_dirs());
    prepend_search_path(&mut vars, DLL_PATH_VAR, runtime.dll_dirs());

    vars.insert(SERVER_ID_VAR.to_string(), prefix_identity(prefix));

    ProcessEnvironment { vars }
}

/// Short stable identifier for a prefix path.
pub fn prefix_identity(prefix: &Path) -> String {
    let hash = blake3::hash(prefix.to_string_lossy().as_bytes());
    hash.to_hex()[..16].to_string()
}

fn prepend_search_path(vars: &mut BTreeMap<String, String>, name: &str, dirs: &[PathBuf]) {
    if dirs.is_empty() {
        return;
    }

    let mut parts: Vec<String> = dirs.iter().map(|d| path_str(d)).collect();
    if let Some(existing) = vars.get(name).filter(|v| !v.is_empty()) {
        parts.push(existing.clone());
    }
    vars.insert(name.to_string(), parts.join(":"));
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
