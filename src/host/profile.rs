// src/host/profile.rs

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use tracing::{debug, info, warn};

use crate::fs::{FileSystem, RealFileSystem};
use crate::types::HostFamily;

pub const OS_RELEASE_PATH: &str = "/etc/os-release";

const DEBIAN_IDS: &[&str] = &[
    "debian", "ubuntu", "pop", "linuxmint", "mint", "kali", "elementary", "zorin",
];
const ARCH_IDS: &[&str] = &["arch", "manjaro", "cachyos", "endeavouros", "garuda"];
const FEDORA_IDS: &[&str] = &[
    "fedora", "nobara", "rhel", "redhat", "centos", "rocky", "almalinux", "alma",
];
const SUSE_IDS: &[&str] = &[
    "opensuse", "opensuse-leap", "opensuse-tumbleweed", "sles", "suse",
];

/// Package-manager invocation for one family, elevated through `sudo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerTemplate {
    /// Binary that must be on `PATH` for the template to be usable.
    pub manager: &'static str,
    /// Optional metadata refresh run before installing.
    pub refresh: Option<&'static [&'static str]>,
    /// Install arguments; package names are appended.
    pub install: &'static [&'static str],
}

impl InstallerTemplate {
    pub fn for_family(family: HostFamily) -> Option<Self> {
        let template = match family {
            HostFamily::Debian => Self {
                manager: "apt-get",
                refresh: Some(&["apt-get", "update"]),
                install: &["apt-get", "install", "-y"],
            },
            HostFamily::Arch => Self {
                manager: "pacman",
                refresh: None,
                install: &["pacman", "-S", "--needed", "--noconfirm"],
            },
            HostFamily::Fedora => Self {
                manager: "dnf",
                refresh: None,
                install: &["dnf", "install", "-y"],
            },
            HostFamily::Suse => Self {
                manager: "zypper",
                refresh: None,
                install: &["zypper", "--non-interactive", "install"],
            },
            HostFamily::Unknown => return None,
        };
        Some(template)
    }

    /// Full argv lists (including `sudo`) installing `packages`.
    pub fn commands(&self, packages: &[String]) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        if let Some(refresh) = self.refresh {
            out.push(elevated(refresh.iter().map(|s| s.to_string())));
        }
        out.push(elevated(
            self.install
                .iter()
                .map(|s| s.to_string())
                .chain(packages.iter().cloned()),
        ));
        out
    }
}

fn elevated(args: impl Iterator<Item = String>) -> Vec<String> {
    std::iter::once("sudo".to_string()).chain(args).collect()
}

/// How a profile was arrived at, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionRule {
    /// Matched on the `ID` field.
    Id(String),
    /// Matched on one of the `ID_LIKE` entries.
    IdLike(String),
    /// The family matched but its package manager is not installed.
    ManagerMissing {
        family: HostFamily,
        manager: &'static str,
    },
    /// Identification file exists but names no known family.
    Unmatched(String),
    /// Identification file missing or unreadable.
    Unreadable,
}

/// Host classification, computed once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProfile {
    family: HostFamily,
    installer: Option<InstallerTemplate>,
    rule: DetectionRule,
}

impl HostProfile {
    pub fn unknown(rule: DetectionRule) -> Self {
        Self {
            family: HostFamily::Unknown,
            installer: None,
            rule,
        }
    }

    pub fn family(&self) -> HostFamily {
        self.family
    }

    /// `None` means prerequisites must be installed by hand.
    pub fn installer(&self) -> Option<&InstallerTemplate> {
        self.installer.as_ref()
    }

    pub fn rule(&self) -> &DetectionRule {
        &self.rule
    }

    pub fn supports_automatic_install(&self) -> bool {
        self.installer.is_some()
    }

    /// Cached profile of the running host.
    pub fn current() -> &'static HostProfile {
        static PROFILE: OnceLock<HostProfile> = OnceLock::new();
        PROFILE.get_or_init(|| {
            let profile = detect(&RealFileSystem, Path::new(OS_RELEASE_PATH), &|program| {
                which::which(program).is_ok()
            });
            info!(family = %profile.family, rule = ?profile.rule, "detected host profile");
            profile
        })
    }
}

/// Classify the host described by `os_release`.
///
/// `has_program` reports whether a binary is on `PATH`; a family whose
/// package manager is missing degrades to `Unknown`.
pub fn detect(
    fs: &dyn FileSystem,
    os_release: &Path,
    has_program: &dyn Fn(&str) -> bool,
) -> HostProfile {
    let contents = match fs.read_to_string(os_release) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %os_release.display(), error = %e, "cannot read os-release");
            return HostProfile::unknown(DetectionRule::Unreadable);
        }
    };

    let fields = parse_os_release(&contents);
    let id = fields.get("ID").map(|s| s.to_lowercase()).unwrap_or_default();
    let id_like = fields
        .get("ID_LIKE")
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let Some((family, rule)) = classify(&id, &id_like) else {
        return HostProfile::unknown(DetectionRule::Unmatched(id));
    };

    let Some(installer) = InstallerTemplate::for_family(family) else {
        return HostProfile::unknown(rule);
    };

    if !has_program(installer.manager) {
        warn!(
            %family,
            manager = installer.manager,
            "package manager for detected family not found; automatic install disabled"
        );
        return HostProfile::unknown(DetectionRule::ManagerMissing {
            family,
            manager: installer.manager,
        });
    }

    HostProfile {
        family,
        installer: Some(installer),
        rule,
    }
}

fn classify(id: &str, id_like: &str) -> Option<(HostFamily, DetectionRule)> {
    let tables: [(HostFamily, &[&str]); 4] = [
        (HostFamily::Debian, DEBIAN_IDS),
        (HostFamily::Arch, ARCH_IDS),
        (HostFamily::Fedora, FEDORA_IDS),
        (HostFamily::Suse, SUSE_IDS),
    ];

    for (family, ids) in tables.iter() {
        if ids.contains(&id) || (family == &HostFamily::Suse && id.starts_with("opensuse")) {
            return Some((*family, DetectionRule::Id(id.to_string())));
        }
    }

    for like in id_like.split_whitespace() {
        for (family, ids) in tables.iter() {
            if ids.contains(&like) {
                return Some((*family, DetectionRule::IdLike(like.to_string())));
            }
        }
    }

    None
}

/// Parse `KEY=value` lines, stripping optional quotes.
pub fn parse_os_release(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}
