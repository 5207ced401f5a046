// src/host/gpu.rs

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::types::{BackendChoice, GpuVendor};

const LSPCI_TIMEOUT: Duration = Duration::from_secs(5);

/// A display adapter from the PCI device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub vendor: GpuVendor,
    pub name: String,
}

impl GpuInfo {
    /// Non-binding backend suggestion for this adapter.
    pub fn recommended_backend(&self) -> Option<BackendChoice> {
        match self.vendor {
            GpuVendor::Nvidia | GpuVendor::Amd => Some(BackendChoice::PerformanceVulkan),
            GpuVendor::Intel => Some(BackendChoice::LegacyGl),
            GpuVendor::Other => None,
        }
    }
}

fn controller_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        match Regex::new(r"(?i)(?:VGA compatible controller|3D controller|Display controller)[^:]*:\s*(.+)$") {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "invalid display controller pattern");
                None
            }
        }
    })
    .as_ref()
}

/// Extract display adapters from `lspci` output.
pub fn parse_lspci(output: &str) -> Vec<GpuInfo> {
    let Some(re) = controller_pattern() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| re.captures(line.trim()))
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let name = m.as_str().trim().to_string();
            GpuInfo {
                vendor: classify_vendor(&name),
                name,
            }
        })
        .collect()
}

fn classify_vendor(name: &str) -> GpuVendor {
    let lower = name.to_lowercase();
    if lower.contains("nvidia") {
        GpuVendor::Nvidia
    } else if lower.contains("amd") || lower.contains("ati ") || lower.contains("radeon") {
        GpuVendor::Amd
    } else if lower.contains("intel") {
        GpuVendor::Intel
    } else {
        GpuVendor::Other
    }
}

/// Run `lspci` and parse its display adapters. Any failure yields an empty list.
pub async fn detect_gpus() -> Vec<GpuInfo> {
    let mut cmd = Command::new("lspci");
    cmd.kill_on_drop(true);

    match timeout(LSPCI_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() => {
            let gpus = parse_lspci(&String::from_utf8_lossy(&out.stdout));
            debug!(count = gpus.len(), "detected display adapters");
            gpus
        }
        Ok(Ok(out)) => {
            debug!(code = ?out.status.code(), "lspci exited unsuccessfully");
            Vec::new()
        }
        Ok(Err(e)) => {
            debug!(error = %e, "lspci unavailable");
            Vec::new()
        }
        Err(_) => {
            warn!(timeout = ?LSPCI_TIMEOUT, "lspci timed out");
            Vec::new()
        }
    }
}

/// First recommendation among `gpus`, preferring discrete vendors.
pub fn recommend(gpus: &[GpuInfo]) -> Option<(BackendChoice, &GpuInfo)> {
    gpus.iter()
        .find(|g| matches!(g.vendor, GpuVendor::Nvidia | GpuVendor::Amd))
        .or_else(|| gpus.iter().find(|g| g.vendor == GpuVendor::Intel))
        .and_then(|g| g.recommended_backend().map(|b| (b, g)))
}
