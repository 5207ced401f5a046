// tests/host_detection.rs

use std::path::Path;

use winepilot::fs::mock::MockFileSystem;
use winepilot::host::{detect, parse_lspci, parse_os_release, recommend, DetectionRule};
use winepilot::types::{BackendChoice, GpuVendor, HostFamily};

const OS_RELEASE: &str = "/etc/os-release";

fn host_with(os_release: &str) -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file(OS_RELEASE, os_release.as_bytes().to_vec());
    fs
}

fn everything_installed(_: &str) -> bool {
    true
}

#[test]
fn os_release_fields_are_unquoted() {
    let fields = parse_os_release(
        "# comment\nNAME=\"Pop!_OS\"\nID=pop\nID_LIKE='ubuntu debian'\n\nBROKEN LINE\n",
    );
    assert_eq!(fields.get("NAME").map(String::as_str), Some("Pop!_OS"));
    assert_eq!(fields.get("ID").map(String::as_str), Some("pop"));
    assert_eq!(fields.get("ID_LIKE").map(String::as_str), Some("ubuntu debian"));
    assert_eq!(fields.len(), 3);
}

#[test]
fn families_are_detected_from_id() {
    let cases = [
        ("ID=ubuntu\n", HostFamily::Debian, "apt-get"),
        ("ID=\"manjaro\"\n", HostFamily::Arch, "pacman"),
        ("ID=fedora\n", HostFamily::Fedora, "dnf"),
        ("ID=\"opensuse-slowroll\"\n", HostFamily::Suse, "zypper"),
    ];

    for (contents, family, manager) in cases {
        let fs = host_with(contents);
        let profile = detect(&fs, Path::new(OS_RELEASE), &everything_installed);
        assert_eq!(profile.family(), family, "{contents}");
        assert!(matches!(profile.rule(), DetectionRule::Id(_)));
        assert_eq!(profile.installer().map(|i| i.manager), Some(manager));
        assert!(profile.supports_automatic_install());
    }
}

#[test]
fn id_like_is_used_when_id_is_unknown() {
    let fs = host_with("ID=someremix\nID_LIKE=\"rhel centos fedora\"\n");
    let profile = detect(&fs, Path::new(OS_RELEASE), &everything_installed);
    assert_eq!(profile.family(), HostFamily::Fedora);
    assert_eq!(profile.rule(), &DetectionRule::IdLike("rhel".to_string()));
}

#[test]
fn unmatched_host_is_unknown() {
    let fs = host_with("ID=gentoo\n");
    let profile = detect(&fs, Path::new(OS_RELEASE), &everything_installed);
    assert_eq!(profile.family(), HostFamily::Unknown);
    assert_eq!(profile.rule(), &DetectionRule::Unmatched("gentoo".to_string()));
    assert!(profile.installer().is_none());
}

#[test]
fn missing_os_release_is_unknown() {
    let fs = MockFileSystem::new();
    let profile = detect(&fs, Path::new(OS_RELEASE), &everything_installed);
    assert_eq!(profile.family(), HostFamily::Unknown);
    assert_eq!(profile.rule(), &DetectionRule::Unreadable);
}

#[test]
fn missing_package_manager_disables_automatic_install() {
    let fs = host_with("ID=arch\n");
    let profile = detect(&fs, Path::new(OS_RELEASE), &|program| program != "pacman");
    assert_eq!(profile.family(), HostFamily::Unknown);
    assert!(!profile.supports_automatic_install());
    assert_eq!(
        profile.rule(),
        &DetectionRule::ManagerMissing {
            family: HostFamily::Arch,
            manager: "pacman"
        }
    );
}

#[test]
fn installer_commands_are_elevated() {
    let fs = host_with("ID=debian\n");
    let profile = detect(&fs, Path::new(OS_RELEASE), &everything_installed);
    let installer = profile.installer().expect("debian has an installer");

    let packages = vec!["winetricks".to_string(), "cabextract".to_string()];
    let commands = installer.commands(&packages);
    assert_eq!(
        commands,
        vec![
            vec!["sudo", "apt-get", "update"],
            vec!["sudo", "apt-get", "install", "-y", "winetricks", "cabextract"],
        ]
    );
}

const LSPCI: &str = "\
00:00.0 Host bridge: Intel Corporation 8th Gen Core Processor Host Bridge/DRAM Registers (rev 07)
00:02.0 VGA compatible controller: Intel Corporation UHD Graphics 630 (Mobile)
01:00.0 3D controller: NVIDIA Corporation TU117M [GeForce GTX 1650 Mobile / Max-Q] (rev a1)
02:00.0 Network controller: Intel Corporation Wi-Fi 6 AX200 (rev 1a)
";

#[test]
fn lspci_display_adapters_are_extracted() {
    let gpus = parse_lspci(LSPCI);
    assert_eq!(gpus.len(), 2);
    assert_eq!(gpus[0].vendor, GpuVendor::Intel);
    assert_eq!(gpus[0].name, "Intel Corporation UHD Graphics 630 (Mobile)");
    assert_eq!(gpus[1].vendor, GpuVendor::Nvidia);

    let amd = parse_lspci(
        "03:00.0 VGA compatible controller [0300]: Advanced Micro Devices, Inc. [AMD/ATI] Navi 23",
    );
    assert_eq!(amd.len(), 1);
    assert_eq!(amd[0].vendor, GpuVendor::Amd);

    assert!(parse_lspci("").is_empty());
}

#[test]
fn discrete_adapter_wins_the_recommendation() {
    let gpus = parse_lspci(LSPCI);
    let (backend, gpu) = recommend(&gpus).expect("a recommendation");
    assert_eq!(backend, BackendChoice::PerformanceVulkan);
    assert_eq!(gpu.vendor, GpuVendor::Nvidia);

    let integrated = parse_lspci("00:02.0 VGA compatible controller: Intel Corporation Iris Xe");
    assert_eq!(
        recommend(&integrated).map(|(b, _)| b),
        Some(BackendChoice::LegacyGl)
    );

    let unknown = parse_lspci("00:02.0 VGA compatible controller: Matrox Electronics G200eR2");
    assert_eq!(unknown[0].vendor, GpuVendor::Other);
    assert!(recommend(&unknown).is_none());
}
