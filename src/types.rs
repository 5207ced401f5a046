// src/types.rs

//! Small shared value types used across the resolver, inspector, backend
//! state machine and host detection.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

/// Instruction-set width a runtime can host or a binary targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    X86,
    X64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86 => f.write_str("32-bit"),
            Arch::X64 => f.write_str("64-bit"),
        }
    }
}

/// Render an architecture set as `"64-bit"` or `"32-bit + 64-bit"`.
pub fn describe_arches(arches: &BTreeSet<Arch>) -> String {
    if arches.is_empty() {
        return "none".to_string();
    }
    arches
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Result of inspecting an executable header.
///
/// `Unrecognized` is a degraded answer, not an error: callers warn and
/// carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryArch {
    X86,
    X64,
    Unrecognized,
}

impl BinaryArch {
    pub fn arch(self) -> Option<Arch> {
        match self {
            BinaryArch::X86 => Some(Arch::X86),
            BinaryArch::X64 => Some(Arch::X64),
            BinaryArch::Unrecognized => None,
        }
    }
}

impl fmt::Display for BinaryArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arch() {
            Some(arch) => arch.fmt(f),
            None => f.write_str("unrecognized"),
        }
    }
}

/// Where a resolved runtime came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuntimeOrigin {
    Bundled,
    LocalBuild,
    System,
}

impl fmt::Display for RuntimeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeOrigin::Bundled => f.write_str("bundled"),
            RuntimeOrigin::LocalBuild => f.write_str("local-build"),
            RuntimeOrigin::System => f.write_str("system"),
        }
    }
}

/// Distribution family of the host, used to pick a package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFamily {
    Debian,
    Arch,
    Fedora,
    Suse,
    Unknown,
}

impl fmt::Display for HostFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostFamily::Debian => "debian",
            HostFamily::Arch => "arch",
            HostFamily::Fedora => "fedora",
            HostFamily::Suse => "suse",
            HostFamily::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Rendering backend used by the hosted application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    /// DXVK on Vulkan.
    PerformanceVulkan,
    /// vkd3d-proton on Vulkan, for compute-heavy filters.
    ComputeVulkan,
    /// wined3d on OpenGL.
    LegacyGl,
    /// GDI software rendering.
    Software,
}

impl BackendChoice {
    pub const ALL: [BackendChoice; 4] = [
        BackendChoice::PerformanceVulkan,
        BackendChoice::ComputeVulkan,
        BackendChoice::LegacyGl,
        BackendChoice::Software,
    ];

    /// Stable identifier, also used as the persisted marker value.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendChoice::PerformanceVulkan => "performance-vulkan",
            BackendChoice::ComputeVulkan => "compute-vulkan",
            BackendChoice::LegacyGl => "legacy-gl",
            BackendChoice::Software => "software",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        BackendChoice::ALL
            .into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "invalid backend: {wanted} (expected one of performance-vulkan, compute-vulkan, legacy-gl, software)"
                )
            })
    }
}

/// GPU vendor as reported by the PCI device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Other,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GpuVendor::Nvidia => "NVIDIA",
            GpuVendor::Amd => "AMD",
            GpuVendor::Intel => "Intel",
            GpuVendor::Other => "Unknown",
        };
        f.write_str(s)
    }
}
