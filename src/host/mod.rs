// src/host/mod.rs

//! Host inspection.
//!
//! - [`profile`] classifies the distribution family and picks the package
//!   manager template used to install prerequisites.
//! - [`gpu`] reads the PCI device list to offer a backend recommendation.
//!
//! Nothing in here fails: detection problems degrade to `Unknown` or an
//! empty GPU list.

pub mod gpu;
pub mod profile;

pub use gpu::{detect_gpus, parse_lspci, recommend, GpuInfo};
pub use profile::{detect, parse_os_release, DetectionRule, HostProfile, InstallerTemplate};
