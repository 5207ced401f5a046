// src/runtime/resolver.rs

//! Runtime resolution.
//!
//! Candidates are checked strictly in order (bundled, local build, system);
//! the first whose executable exists and is executable wins. Probing is
//! read-only and goes through [`FileSystem`] so it can be tested against a
//! mock tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::SessionSection;
use crate::errors::{Result, WinepilotError};
use crate::fs::FileSystem;
use crate::types::{describe_arches, Arch, RuntimeOrigin};

/// Library roots searched for the primary (64-bit) support directories.
const PRIMARY_LIB_DIRS: &[&str] = &["lib64", "lib", "lib/x86_64-linux-gnu"];
const PRIMARY_ARCH_DIRS: &[&str] = &["x86_64-unix", "x86_64-windows"];

/// Library roots searched for the secondary (32-bit / WoW64) support directories.
const SECONDARY_LIB_DIRS: &[&str] = &["lib", "lib32", "lib/i386-linux-gnu"];
const SECONDARY_ARCH_DIRS: &[&str] = &["i386-unix", "i386-windows"];

/// Directories whose `wine/` subdirectory marks them as loader search paths.
const LOADER_LIB_DIRS: &[&str] = &["lib64", "lib", "lib32"];

/// One place a runtime might be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCandidate {
    pub origin: RuntimeOrigin,
    pub executable: PathBuf,
}

impl RuntimeCandidate {
    pub fn new(origin: RuntimeOrigin, executable: impl Into<PathBuf>) -> Self {
        Self {
            origin,
            executable: executable.into(),
        }
    }
}

/// Immutable description of a resolved runtime.
///
/// Created once per resolution pass. If settings change, resolve again
/// rather than adjusting an existing descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    executable: PathBuf,
    server: Option<PathBuf>,
    library_dirs: Vec<PathBuf>,
    dll_dirs: Vec<PathBuf>,
    architectures: BTreeSet<Arch>,
    origin: RuntimeOrigin,
}

impl RuntimeDescriptor {
    pub fn new(
        executable: impl Into<PathBuf>,
        origin: RuntimeOrigin,
        architectures: impl IntoIterator<Item = Arch>,
    ) -> Self {
        Self {
            executable: executable.into(),
            server: None,
            library_dirs: Vec::new(),
            dll_dirs: Vec::new(),
            architectures: architectures.into_iter().collect(),
            origin,
        }
    }

    pub fn with_server(mut self, server: impl Into<PathBuf>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_library_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.library_dirs = dirs;
        self
    }

    pub fn with_dll_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.dll_dirs = dirs;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Sibling server binary, used for graceful shutdown.
    pub fn server(&self) -> Option<&Path> {
        self.server.as_deref()
    }

    pub fn library_dirs(&self) -> &[PathBuf] {
        &self.library_dirs
    }

    /// DLL search directories, primary architecture first.
    pub fn dll_dirs(&self) -> &[PathBuf] {
        &self.dll_dirs
    }

    pub fn architectures(&self) -> &BTreeSet<Arch> {
        &self.architectures
    }

    pub fn supports(&self, arch: Arch) -> bool {
        self.architectures.contains(&arch)
    }

    pub fn origin(&self) -> RuntimeOrigin {
        self.origin
    }
}

/// Build the ordered candidate list for this host.
///
/// - bundled: `[session].bundled_dir/bin/wine`, else `$APPDIR/usr/bin/wine`
/// - local build: `[session].local_build_dir/wine`, else `wine-build/wine`
///   next to the running executable
/// - system: `wine` on `PATH`
pub fn default_candidates(session: &SessionSection) -> Vec<RuntimeCandidate> {
    let appdir = std::env::var_os("APPDIR").map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    let system = which::which("wine").ok();
    candidates_from(session, appdir, exe_dir, system)
}

/// Pure part of [`default_candidates`].
pub fn candidates_from(
    session: &SessionSection,
    appdir: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    system: Option<PathBuf>,
) -> Vec<RuntimeCandidate> {
    let mut out = Vec::new();

    let bundled_root = session
        .bundled_dir
        .clone()
        .or_else(|| appdir.map(|a| a.join("usr")));
    if let Some(root) = bundled_root {
        out.push(RuntimeCandidate::new(
            RuntimeOrigin::Bundled,
            root.join("bin").join("wine"),
        ));
    }

    let local_build = session
        .local_build_dir
        .clone()
        .or_else(|| exe_dir.map(|d| d.join("wine-build")));
    if let Some(dir) = local_build {
        out.push(RuntimeCandidate::new(RuntimeOrigin::LocalBuild, dir.join("wine")));
    }

    if let Some(path) = system {
        out.push(RuntimeCandidate::new(RuntimeOrigin::System, path));
    }

    out
}

/// Return the first qualifying candidate, in priority order.
pub fn resolve(fs: &dyn FileSystem, candidates: &[RuntimeCandidate]) -> Result<RuntimeDescriptor> {
    for candidate in candidates {
        if fs.is_executable(&candidate.executable) {
            let descriptor = describe(fs, candidate);
            info!(
                executable = %descriptor.executable.display(),
                origin = %descriptor.origin,
                arches = %describe_arches(&descriptor.architectures),
                "resolved compatibility runtime"
            );
            return Ok(descriptor);
        }
        debug!(
            executable = %candidate.executable.display(),
            origin = %candidate.origin,
            "runtime candidate not usable"
        );
    }

    let checked = if candidates.is_empty() {
        "no candidates".to_string()
    } else {
        candidates
            .iter()
            .map(|c| c.executable.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    Err(WinepilotError::RuntimeNotFound { checked })
}

fn describe(fs: &dyn FileSystem, candidate: &RuntimeCandidate) -> RuntimeDescriptor {
    let roots = library_roots(&candidate.executable);

    let primary = existing_arch_dirs(fs, &roots, PRIMARY_LIB_DIRS, PRIMARY_ARCH_DIRS);
    let secondary = existing_arch_dirs(fs, &roots, SECONDARY_LIB_DIRS, SECONDARY_ARCH_DIRS);

    let mut architectures = BTreeSet::from([Arch::X64]);
    if !secondary.is_empty() {
        architectures.insert(Arch::X86);
    }

    let mut descriptor =
        RuntimeDescriptor::new(candidate.executable.clone(), candidate.origin, architectures);

    if let Some(server) = candidate
        .executable
        .parent()
        .map(|bin| bin.join("wineserver"))
        .filter(|s| fs.is_executable(s))
    {
        descriptor = descriptor.with_server(server);
    }

    // A system runtime is already on the loader's default paths.
    if candidate.origin != RuntimeOrigin::System {
        let library_dirs = dedup(
            roots
                .iter()
                .flat_map(|root| LOADER_LIB_DIRS.iter().map(move |lib| root.join(lib)))
                .filter(|lib| fs.is_dir(&lib.join("wine")))
                .collect(),
        );
        let dll_dirs = dedup(primary.into_iter().chain(secondary).collect());
        descriptor = descriptor
            .with_library_dirs(library_dirs)
            .with_dll_dirs(dll_dirs);
    }

    descriptor
}

/// `<bin>/..` first, then `<bin>` itself (build trees keep libs beside the
/// executable).
fn library_roots(executable: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(bin) = executable.parent() {
        if let Some(root) = bin.parent() {
            roots.push(root.to_path_buf());
        }
        roots.push(bin.to_path_buf());
    }
    roots
}

fn existing_arch_dirs(
    fs: &dyn FileSystem,
    roots: &[PathBuf],
    lib_dirs: &[&str],
    arch_dirs: &[&str],
) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        for lib in lib_dirs {
            for sub in arch_dirs {
                let dir = root.join(lib).join("wine").join(sub);
                if fs.is_dir(&dir) {
                    found.push(dir);
                }
            }
        }
    }
    found
}

fn dedup(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    dirs.into_iter().filter(|d| seen.insert(d.clone())).collect()
}
