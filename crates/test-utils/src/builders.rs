#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use winepilot::config::{
    ConfigFile, EngineSection, RawConfigFile, RegistryKind, RegistryTweak, SessionSection,
    VersionConfig,
};
use winepilot::exec::TaskEngine;
use winepilot::fs::RealFileSystem;
use winepilot::runtime::{build_environment, HostEnv, RuntimeDescriptor};
use winepilot::types::{Arch, RuntimeOrigin};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                session: SessionSection::default(),
                engine: EngineSection::default(),
                versions: BTreeMap::new(),
                tweaks: Vec::new(),
            },
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.config.session.prefix = Some(prefix.into());
        self
    }

    pub fn with_component_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.session.component_cache = Some(dir.into());
        self
    }

    pub fn with_component_tool(mut self, tool: &str) -> Self {
        self.config.session.component_tool = tool.to_string();
        self
    }

    pub fn with_repair_paths(mut self, paths: &[&str]) -> Self {
        self.config.session.repair_paths = paths.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_version(mut self, key: &str, components: &[&str], targets: &[&str]) -> Self {
        self.config.versions.insert(
            key.to_string(),
            VersionConfig {
                runtime_version: None,
                components: components.iter().map(|s| s.to_string()).collect(),
                targets: targets.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn selecting(mut self, key: &str) -> Self {
        self.config.session.version = Some(key.to_string());
        self
    }

    pub fn with_tweak(mut self, key: &str, name: &str, kind: RegistryKind, value: &str) -> Self {
        self.config.tweaks.push(RegistryTweak {
            key: key.to_string(),
            name: name.to_string(),
            kind,
            value: value.to_string(),
        });
        self
    }

    pub fn with_grace_period(mut self, grace: &str) -> Self {
        self.config.engine.grace_period = grace.to_string();
        self
    }

    pub fn with_default_timeout(mut self, timeout: &str) -> Self {
        self.config.engine.default_timeout = timeout.to_string();
        self
    }

    pub fn with_process_names(mut self, names: &[&str]) -> Self {
        self.config.engine.process_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fake runtime installation on disk.
///
/// `bin/wine` is a shell script that prints a version for `--version` and
/// echoes its arguments otherwise, so it can stand in for the real runtime
/// in end-to-end tests.
pub struct RuntimeTree {
    pub dir: TempDir,
}

impl RuntimeTree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create runtime tempdir");
        let tree = Self { dir };
        tree.script(
            "bin/wine",
            "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo wine-test-1.0; exit 0; fi\nprintf '%s\\n' \"wine $*\"\n",
        );
        tree.mkdir("lib64/wine/x86_64-unix");
        tree.mkdir("lib64/wine/x86_64-windows");
        tree
    }

    /// Add 32-bit support directories.
    pub fn with_wow64(self) -> Self {
        self.mkdir("lib/wine/i386-unix");
        self.mkdir("lib/wine/i386-windows");
        self
    }

    /// Add a `bin/wineserver` that exits successfully.
    pub fn with_server(self) -> Self {
        self.script("bin/wineserver", "#!/bin/sh\nexit 0\n");
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn wine(&self) -> PathBuf {
        self.root().join("bin/wine")
    }

    pub fn script(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create script dir");
        }
        fs::write(&path, body).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    pub fn mkdir(&self, rel: &str) {
        fs::create_dir_all(self.root().join(rel)).expect("create runtime dir");
    }
}

impl Default for RuntimeTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor for a runtime that does not exist on disk; enough for tasks
/// whose steps name their own programs.
pub fn descriptor(arches: &[Arch]) -> RuntimeDescriptor {
    RuntimeDescriptor::new("/opt/wine/bin/wine", RuntimeOrigin::Bundled, arches.iter().copied())
}

/// A minimal host environment with `PATH` so `sh` and coreutils resolve.
pub fn minimal_host_env() -> HostEnv {
    let mut env = HostEnv::new();
    env.insert(
        "PATH".to_string(),
        std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string()),
    );
    env
}

/// Engine over the real filesystem with the given settings.
pub fn engine_for(
    runtime: RuntimeDescriptor,
    prefix: &Path,
    config: &ConfigFile,
) -> TaskEngine {
    let env = build_environment(&runtime, prefix, &minimal_host_env());
    TaskEngine::new(
        Arc::new(runtime),
        prefix,
        Arc::new(env),
        config.engine.clone(),
        Arc::new(RealFileSystem),
    )
}

/// Shorthand for a short grace period config used by cancellation tests.
pub fn fast_config(prefix: &Path) -> ConfigFile {
    ConfigFileBuilder::new()
        .with_prefix(prefix)
        .with_grace_period("200ms")
        .with_process_names(&["sleep"])
        .build()
}

/// Smallest PE image the header inspector accepts, for `machine`.
pub fn pe_image(machine: u16) -> Vec<u8> {
    let pe_offset: u32 = 0x80;
    let mut bytes = vec![0u8; pe_offset as usize + 24];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[0x3C..0x40].copy_from_slice(&pe_offset.to_le_bytes());
    let at = pe_offset as usize;
    bytes[at..at + 4].copy_from_slice(b"PE\0\0");
    bytes[at + 4..at + 6].copy_from_slice(&machine.to_le_bytes());
    bytes
}

/// Write `pe_image(machine)` to `path`.
pub fn write_pe(path: &Path, machine: u16) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create pe dir");
    }
    fs::write(path, pe_image(machine)).expect("write pe image");
}

pub const SHORT: Duration = Duration::from_millis(50);
