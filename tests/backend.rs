// tests/backend.rs

mod common;
use crate::common::builders::descriptor;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use winepilot::backend::{
    current_backend, installed_components, parse_registry, plan_transition, read_user_registry,
    reg_add_args, RegValue, DIRECT3D_KEY, MARKER_KEY,
};
use winepilot::fs::mock::MockFileSystem;
use winepilot::types::{Arch, BackendChoice};

const USER_REG: &str = r#"WINE REGISTRY Version 2
;; All keys relative to \\User\\S-1-5-21-0-0-0-1000

#arch=win64

[Control Panel\\Desktop] 1700000000
#time=1d9a3b2c4e5f600
"LogPixels"=dword:00000090
"FontSmoothing"="2"

[Software\\Wine\\Direct3D] 1700000001
"renderer"="vulkan"
"csmt"=hex:01,00,00,00
@="default \"quoted\" value"
"#;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn registry_values_are_parsed() {
    let store = parse_registry(USER_REG);

    assert!(store.has_key(r"HKCU\Software\Wine\Direct3D"));
    assert!(store.has_key(r"hkey_current_user\control panel\desktop"));
    assert_eq!(
        store.get(r"HKCU\Control Panel\Desktop", "logpixels"),
        Some(&RegValue::Dword(0x90))
    );
    assert_eq!(
        store.get(DIRECT3D_KEY, "Renderer").and_then(RegValue::as_str),
        Some("vulkan")
    );
    assert_eq!(
        store.get(DIRECT3D_KEY, "csmt"),
        Some(&RegValue::Raw("hex:01,00,00,00".to_string()))
    );
    assert_eq!(
        store.get(DIRECT3D_KEY, ""),
        Some(&RegValue::Sz("default \"quoted\" value".to_string()))
    );
    assert!(store.get(DIRECT3D_KEY, "missing").is_none());
}

#[test]
fn missing_user_registry_reads_as_empty() {
    let fs = MockFileSystem::new();
    assert!(read_user_registry(&fs, Path::new("/pfx")).is_empty());

    fs.add_file("/pfx/user.reg", USER_REG.as_bytes().to_vec());
    assert!(!read_user_registry(&fs, Path::new("/pfx")).is_empty());
}

#[test]
fn backend_is_read_from_renderer_without_marker() {
    assert_eq!(
        current_backend(&parse_registry(USER_REG)),
        Some(BackendChoice::PerformanceVulkan)
    );

    let gl = parse_registry("[Software\\\\Wine\\\\Direct3D]\n\"renderer\"=\"GL\"\n");
    assert_eq!(current_backend(&gl), Some(BackendChoice::LegacyGl));

    let no3d = parse_registry("[Software\\\\Wine\\\\Direct3D]\n\"renderer\"=\"no3d\"\n");
    assert_eq!(current_backend(&no3d), Some(BackendChoice::Software));

    let odd = parse_registry("[Software\\\\Wine\\\\Direct3D]\n\"renderer\"=\"metal\"\n");
    assert_eq!(current_backend(&odd), None);

    assert_eq!(current_backend(&parse_registry("")), None);
}

#[test]
fn marker_distinguishes_vulkan_variants() {
    let contents = format!(
        "{USER_REG}\n[Software\\\\Winepilot] 1700000002\n\"backend\"=\"compute-vulkan\"\n"
    );
    assert_eq!(
        current_backend(&parse_registry(&contents)),
        Some(BackendChoice::ComputeVulkan)
    );
}

#[test]
fn installed_components_come_from_the_component_log() {
    let fs = MockFileSystem::new();
    assert!(installed_components(&fs, Path::new("/pfx")).is_empty());

    fs.add_file("/pfx/winetricks.log", b"vcrun2019\n\n# note\nVKD3D\n".to_vec());
    assert_eq!(
        installed_components(&fs, Path::new("/pfx")),
        set(&["vcrun2019", "vkd3d"])
    );
}

#[test]
fn reg_add_arguments() {
    assert_eq!(
        reg_add_args(MARKER_KEY, "backend", &RegValue::Sz("software".into())),
        vec![
            "reg", "add", r"HKCU\Software\Winepilot", "/v", "backend", "/t", "REG_SZ", "/d",
            "software", "/f"
        ]
    );
    assert_eq!(
        reg_add_args(r"HKCU\Control Panel\Desktop", "LogPixels", &RegValue::Dword(144))[6..9],
        ["REG_DWORD", "/d", "144"]
    );
}

#[test]
fn compute_backend_installs_missing_component_first() {
    let runtime = descriptor(&[Arch::X64]);
    let plan = plan_transition(
        BackendChoice::ComputeVulkan,
        &set(&["vcrun2019"]),
        &runtime,
        "winetricks",
        Duration::from_secs(60),
    );

    assert_eq!(plan.missing, vec!["vkd3d"]);
    let install = plan.install.expect("vkd3d must be installed");
    assert_eq!(install.steps.len(), 1);
    assert_eq!(install.steps[0].program, Path::new("winetricks"));
    assert_eq!(install.steps[0].args, vec!["-q", "vkd3d"]);
    assert_eq!(install.timeout, Some(Duration::from_secs(60)));

    assert_eq!(plan.apply.steps.len(), 2);
    assert_eq!(plan.apply.steps[0].program, runtime.executable());
    assert!(plan.apply.steps[0].args.contains(&"vulkan".to_string()));
    assert!(plan.apply.steps[1].args.contains(&"compute-vulkan".to_string()));
}

#[test]
fn installed_component_skips_the_install_task() {
    let runtime = descriptor(&[Arch::X64]);
    let plan = plan_transition(
        BackendChoice::ComputeVulkan,
        &set(&["vkd3d"]),
        &runtime,
        "winetricks",
        Duration::from_secs(60),
    );
    assert!(plan.missing.is_empty());
    assert!(plan.install.is_none());
}

#[test]
fn every_backend_writes_its_renderer() {
    let runtime = descriptor(&[Arch::X64]);
    for (choice, renderer) in [
        (BackendChoice::PerformanceVulkan, "vulkan"),
        (BackendChoice::LegacyGl, "gl"),
        (BackendChoice::Software, "gdi"),
    ] {
        let plan = plan_transition(choice, &BTreeSet::new(), &runtime, "winetricks", Duration::from_secs(1));
        assert!(plan.install.is_none(), "{choice}");
        let renderer_step = &plan.apply.steps[0];
        assert_eq!(renderer_step.args[2], DIRECT3D_KEY);
        assert_eq!(renderer_step.args[8], renderer);
        assert_eq!(plan.apply.steps[1].args[8], choice.as_str());
    }
}

#[test]
fn backend_names_parse_case_insensitively() {
    assert_eq!("Legacy-GL".parse::<BackendChoice>(), Ok(BackendChoice::LegacyGl));
    assert!("directx".parse::<BackendChoice>().is_err());
}
