// tests/runtime_resolution.rs

use std::path::{Path, PathBuf};

use winepilot::config::SessionSection;
use winepilot::errors::WinepilotError;
use winepilot::fs::mock::MockFileSystem;
use winepilot::runtime::resolver::candidates_from;
use winepilot::runtime::{resolve, RuntimeCandidate};
use winepilot::types::{Arch, RuntimeOrigin};

fn candidates() -> Vec<RuntimeCandidate> {
    vec![
        RuntimeCandidate::new(RuntimeOrigin::Bundled, "/app/usr/bin/wine"),
        RuntimeCandidate::new(RuntimeOrigin::LocalBuild, "/home/u/wine-build/wine"),
        RuntimeCandidate::new(RuntimeOrigin::System, "/usr/bin/wine"),
    ]
}

#[test]
fn first_executable_candidate_wins() {
    let fs = MockFileSystem::new();
    fs.add_executable("/home/u/wine-build/wine", b"#!".to_vec());
    fs.add_executable("/usr/bin/wine", b"#!".to_vec());

    let rt = resolve(&fs, &candidates()).unwrap();
    assert_eq!(rt.origin(), RuntimeOrigin::LocalBuild);
    assert_eq!(rt.executable(), Path::new("/home/u/wine-build/wine"));
}

#[test]
fn non_executable_candidate_is_skipped() {
    let fs = MockFileSystem::new();
    fs.add_file("/app/usr/bin/wine", b"not executable".to_vec());
    fs.add_executable("/usr/bin/wine", b"#!".to_vec());

    let rt = resolve(&fs, &candidates()).unwrap();
    assert_eq!(rt.origin(), RuntimeOrigin::System);
}

#[test]
fn resolution_is_deterministic() {
    let fs = MockFileSystem::new();
    fs.add_executable("/app/usr/bin/wine", b"#!".to_vec());
    fs.add_executable("/usr/bin/wine", b"#!".to_vec());

    let a = resolve(&fs, &candidates()).unwrap();
    let b = resolve(&fs, &candidates()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.origin(), RuntimeOrigin::Bundled);
}

#[test]
fn no_candidate_is_runtime_not_found_listing_paths() {
    let fs = MockFileSystem::new();

    match resolve(&fs, &candidates()) {
        Err(WinepilotError::RuntimeNotFound { checked }) => {
            assert!(checked.contains("/app/usr/bin/wine"));
            assert!(checked.contains("/usr/bin/wine"));
        }
        other => panic!("expected RuntimeNotFound, got {other:?}"),
    }
}

#[test]
fn secondary_arch_dirs_add_32bit_support() {
    let fs = MockFileSystem::new();
    fs.add_executable("/app/usr/bin/wine", b"#!".to_vec());
    fs.add_dir("/app/usr/lib64/wine/x86_64-unix");

    let rt = resolve(&fs, &candidates()).unwrap();
    assert!(rt.supports(Arch::X64));
    assert!(!rt.supports(Arch::X86));

    fs.add_dir("/app/usr/lib/wine/i386-windows");
    let rt = resolve(&fs, &candidates()).unwrap();
    assert!(rt.supports(Arch::X86));
    assert_eq!(
        rt.dll_dirs(),
        &[
            PathBuf::from("/app/usr/lib64/wine/x86_64-unix"),
            PathBuf::from("/app/usr/lib/wine/i386-windows"),
        ]
    );
    assert_eq!(
        rt.library_dirs(),
        &[PathBuf::from("/app/usr/lib64"), PathBuf::from("/app/usr/lib")]
    );
}

#[test]
fn sibling_server_is_recorded() {
    let fs = MockFileSystem::new();
    fs.add_executable("/app/usr/bin/wine", b"#!".to_vec());
    fs.add_executable("/app/usr/bin/wineserver", b"#!".to_vec());

    let rt = resolve(&fs, &candidates()).unwrap();
    assert_eq!(rt.server(), Some(Path::new("/app/usr/bin/wineserver")));
}

#[test]
fn system_runtime_records_no_search_paths() {
    let fs = MockFileSystem::new();
    fs.add_executable("/usr/bin/wine", b"#!".to_vec());
    fs.add_dir("/usr/lib/wine/i386-unix");
    fs.add_dir("/usr/lib64/wine/x86_64-unix");

    let rt = resolve(&fs, &candidates()).unwrap();
    assert_eq!(rt.origin(), RuntimeOrigin::System);
    assert!(rt.supports(Arch::X86));
    assert!(rt.library_dirs().is_empty());
    assert!(rt.dll_dirs().is_empty());
}

#[test]
fn candidate_order_prefers_configured_dirs() {
    let session = SessionSection {
        bundled_dir: Some(PathBuf::from("/opt/bundle")),
        local_build_dir: Some(PathBuf::from("/src/wine")),
        ..SessionSection::default()
    };

    let list = candidates_from(
        &session,
        Some(PathBuf::from("/appdir")),
        Some(PathBuf::from("/bin-dir")),
        Some(PathBuf::from("/usr/bin/wine")),
    );

    let paths: Vec<_> = list.iter().map(|c| (c.origin, c.executable.clone())).collect();
    assert_eq!(
        paths,
        vec![
            (RuntimeOrigin::Bundled, PathBuf::from("/opt/bundle/bin/wine")),
            (RuntimeOrigin::LocalBuild, PathBuf::from("/src/wine/wine")),
            (RuntimeOrigin::System, PathBuf::from("/usr/bin/wine")),
        ]
    );
}

#[test]
fn appdir_and_exe_dir_are_fallbacks() {
    let list = candidates_from(
        &SessionSection::default(),
        Some(PathBuf::from("/tmp/.mount_app")),
        Some(PathBuf::from("/opt/winepilot")),
        None,
    );

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].executable, PathBuf::from("/tmp/.mount_app/usr/bin/wine"));
    assert_eq!(list[1].executable, PathBuf::from("/opt/winepilot/wine-build/wine"));
}
