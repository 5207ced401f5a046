// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [session]
/// prefix = "~/.photoshop_cc"
/// version = "cc2025"
/// repair_paths = [
///     "drive_c/users/{user}/AppData/Local/Adobe/OOBE",
///     "drive_c/ProgramData/Adobe/SLStore",
/// ]
///
/// [engine]
/// grace_period = "3s"
///
/// [versions.cc2025]
/// runtime_version = "11.1"
/// components = ["vcrun2019", "msxml6"]
/// targets = ["drive_c/Program Files/Adobe/*/Photoshop.exe"]
///
/// [[tweaks]]
/// key = 'HKCU\Software\Wine\AppDefaults\Photoshop.exe\DllOverrides'
/// name = "gdiplus"
/// kind = "sz"
/// value = "builtin,native"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub engine: EngineSection,

    /// Supported target-application versions, keyed by a short name.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionConfig>,

    #[serde(default)]
    pub tweaks: Vec<RegistryTweak>,
}

/// `[session]` section: where things live.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Prefix directory; `~/` is expanded. Defaults to `~/.winepilot/prefix`.
    #[serde(default)]
    pub prefix: Option<PathBuf>,

    /// Key into `[versions]`. Defaults to the greatest key.
    #[serde(default)]
    pub version: Option<String>,

    /// Root of a bundled runtime (contains `bin/wine`). `$APPDIR/usr` is used
    /// when unset and `APPDIR` is present.
    #[serde(default)]
    pub bundled_dir: Option<PathBuf>,

    /// Local development build tree (contains `wine`).
    #[serde(default)]
    pub local_build_dir: Option<PathBuf>,

    /// Helper used to install redistributable components.
    #[serde(default = "default_component_tool")]
    pub component_tool: String,

    /// Download cache of the component tool, wiped by resets.
    #[serde(default)]
    pub component_cache: Option<PathBuf>,

    /// Prefix-relative directories removed by a repair reset. `{user}` is
    /// replaced with the prefix's user directory name.
    #[serde(default)]
    pub repair_paths: Vec<String>,
}

fn default_component_tool() -> String {
    "winetricks".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            prefix: None,
            version: None,
            bundled_dir: None,
            local_build_dir: None,
            component_tool: default_component_tool(),
            component_cache: None,
            repair_paths: Vec::new(),
        }
    }
}

/// `[engine]` section, kept as raw strings until validation.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_timeout")]
    pub default_timeout: String,

    #[serde(default = "default_setup_timeout")]
    pub setup_timeout: String,

    #[serde(default = "default_launch_timeout")]
    pub launch_timeout: String,

    /// How long a cancelled process group gets between SIGTERM and SIGKILL.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// Process names owned by the runtime, swept on cancel and reset.
    #[serde(default = "default_process_names")]
    pub process_names: Vec<String>,
}

fn default_timeout() -> String {
    "10m".to_string()
}

fn default_setup_timeout() -> String {
    "60m".to_string()
}

fn default_launch_timeout() -> String {
    "24h".to_string()
}

fn default_grace_period() -> String {
    "3s".to_string()
}

pub fn default_process_names() -> Vec<String> {
    [
        "wine",
        "wine64",
        "wine-preloader",
        "wine64-preloader",
        "wineserver",
        "wineboot",
        "winedbg",
        "winetricks",
        "msiexec.exe",
        "services.exe",
        "plugplay.exe",
        "svchost.exe",
        "rpcss.exe",
        "explorer.exe",
        "winedevice.exe",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            setup_timeout: default_setup_timeout(),
            launch_timeout: default_launch_timeout(),
            grace_period: default_grace_period(),
            process_names: default_process_names(),
        }
    }
}

/// `[versions.<key>]`: what a supported target version needs.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VersionConfig {
    /// Runtime version the target was validated against (informational).
    #[serde(default)]
    pub runtime_version: Option<String>,

    /// Components installed by setup, in order.
    #[serde(default)]
    pub components: Vec<String>,

    /// Globs, relative to the prefix, locating the installed target.
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Sz,
    Dword,
}

/// `[[tweaks]]`: a single registry value applied by the `tweaks` intent.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryTweak {
    pub key: String,
    pub name: String,
    pub kind: RegistryKind,
    pub value: String,
}

/// Validated engine timings and the runtime process-name set.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_timeout: Duration,
    pub setup_timeout: Duration,
    pub launch_timeout: Duration,
    pub grace_period: Duration,
    pub process_names: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10 * 60),
            setup_timeout: Duration::from_secs(60 * 60),
            launch_timeout: Duration::from_secs(24 * 60 * 60),
            grace_period: Duration::from_secs(3),
            process_names: default_process_names(),
        }
    }
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holders can rely on
/// parsed durations and a resolvable version selection.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub session: SessionSection,
    pub engine: EngineSettings,
    pub versions: BTreeMap<String, VersionConfig>,
    pub tweaks: Vec<RegistryTweak>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        session: SessionSection,
        engine: EngineSettings,
        versions: BTreeMap<String, VersionConfig>,
        tweaks: Vec<RegistryTweak>,
    ) -> Self {
        Self {
            session,
            engine,
            versions,
            tweaks,
        }
    }

    /// The version config selected by `session.version`, or the greatest key.
    pub fn selected_version(&self) -> Option<(&str, &VersionConfig)> {
        match self.session.version.as_deref() {
            Some(key) => self.versions.get_key_value(key).map(|(k, v)| (k.as_str(), v)),
            None => self.versions.iter().next_back().map(|(k, v)| (k.as_str(), v)),
        }
    }

    /// Effective prefix directory with `~/` expanded.
    pub fn prefix_path(&self) -> PathBuf {
        match &self.session.prefix {
            Some(p) => expand_home(p),
            None => home_dir().join(".winepilot").join("prefix"),
        }
    }

    /// Effective component-tool download cache.
    pub fn component_cache(&self) -> PathBuf {
        match &self.session.component_cache {
            Some(p) => expand_home(p),
            None => dirs::cache_dir()
                .unwrap_or_else(|| home_dir().join(".cache"))
                .join(&self.session.component_tool),
        }
    }

    /// Absolute repair targets inside the prefix.
    pub fn repair_targets(&self) -> Vec<PathBuf> {
        let prefix = self.prefix_path();
        let user = prefix_user();
        self.session
            .repair_paths
            .iter()
            .map(|rel| prefix.join(rel.replace("{user}", &user)))
            .collect()
    }
}

/// Name of the user directory the runtime creates under `drive_c/users`.
fn prefix_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "wineuser".to_string())
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}
