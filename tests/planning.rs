// tests/planning.rs

mod common;
use crate::common::builders::{descriptor, ConfigFileBuilder};

use std::path::{Path, PathBuf};
use std::time::Duration;

use winepilot::backend::parse_registry;
use winepilot::config::{ConfigFile, RegistryKind};
use winepilot::engine::{
    current_dpi, locate_target, plan, plan_prerequisites, Intent, PlanContext, PrerequisitePlan,
};
use winepilot::errors::WinepilotError;
use winepilot::fs::mock::MockFileSystem;
use winepilot::host::{detect, DetectionRule, HostProfile};
use winepilot::runtime::RuntimeDescriptor;
use winepilot::types::Arch;

const PREFIX: &str = "/home/op/.pfx";

fn prefix() -> &'static Path {
    Path::new(PREFIX)
}

fn initialised_prefix() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file(format!("{PREFIX}/system.reg"), b"WINE REGISTRY Version 2\n".to_vec());
    fs
}

fn config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_prefix(PREFIX)
        .with_version(
            "cc2021",
            &["vcrun2019", "msxml6"],
            &["drive_c/Program Files/Adobe/*/Photoshop.exe"],
        )
        .with_tweak(
            r"HKCU\Software\Wine\AppDefaults\Photoshop.exe\DllOverrides",
            "gdiplus",
            RegistryKind::Sz,
            "builtin,native",
        )
        .with_tweak(r"HKCU\Software\Wine\Direct3D", "MaxVersionGL", RegistryKind::Dword, "0x40006")
        .build()
}

fn ctx<'a>(
    config: &'a ConfigFile,
    runtime: &'a RuntimeDescriptor,
    fs: &'a MockFileSystem,
) -> PlanContext<'a> {
    PlanContext {
        config,
        runtime,
        prefix: prefix(),
        fs,
    }
}

#[test]
fn setup_boots_prefix_then_installs_components_non_fatally() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = MockFileSystem::new();

    let spec = plan(&Intent::Setup, &ctx(&config, &runtime, &fs))?;

    assert_eq!(spec.steps.len(), 3);
    assert_eq!(spec.steps[0].program, runtime.executable());
    assert_eq!(spec.steps[0].args, vec!["wineboot", "--init"]);
    assert!(spec.steps[0].fatal);
    assert_eq!(spec.steps[1].program, Path::new("winetricks"));
    assert_eq!(spec.steps[1].args, vec!["-q", "vcrun2019"]);
    assert!(!spec.steps[1].fatal);
    assert_eq!(spec.steps[2].args, vec!["-q", "msxml6"]);
    assert_eq!(spec.timeout, Some(config.engine.setup_timeout));
    Ok(())
}

#[test]
fn intents_other_than_setup_need_an_initialised_prefix() {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = MockFileSystem::new();
    fs.add_dir(PREFIX);

    for intent in [
        Intent::Components,
        Intent::Install {
            installer: PathBuf::from("/tmp/setup.exe"),
        },
        Intent::Launch { executable: None },
        Intent::SetDpi { dpi: 144 },
        Intent::ApplyTweaks,
        Intent::Configure,
    ] {
        let result = plan(&intent, &ctx(&config, &runtime, &fs));
        assert!(
            matches!(&result, Err(WinepilotError::PrefixMissing(p)) if p == prefix()),
            "{}: {result:?}",
            intent.name()
        );
    }
}

#[test]
fn configure_opens_winecfg_with_launch_budget() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();

    let spec = plan(&Intent::Configure, &ctx(&config, &runtime, &fs))?;

    assert_eq!(Intent::Configure.name(), "winecfg");
    assert_eq!(spec.steps.len(), 1);
    assert_eq!(spec.steps[0].program, runtime.executable());
    assert_eq!(spec.steps[0].args, vec!["winecfg"]);
    assert!(spec.steps[0].fatal);
    assert_eq!(spec.target, None);
    assert_eq!(spec.timeout, Some(config.engine.launch_timeout));
    Ok(())
}

#[test]
fn components_without_any_configured_fail() {
    let config = ConfigFileBuilder::new().with_prefix(PREFIX).build();
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();

    let result = plan(&Intent::Components, &ctx(&config, &runtime, &fs));
    assert!(matches!(result, Err(WinepilotError::InvalidTask(_))));
}

#[test]
fn install_runs_installer_from_its_directory() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X86, Arch::X64]);
    let fs = initialised_prefix();
    fs.add_file("/downloads/ps/Set-up.exe", b"MZ".to_vec());

    let spec = plan(
        &Intent::Install {
            installer: PathBuf::from("/downloads/ps/Set-up.exe"),
        },
        &ctx(&config, &runtime, &fs),
    )?;

    assert_eq!(spec.label, "install Set-up.exe");
    assert_eq!(spec.steps.len(), 1);
    assert_eq!(spec.steps[0].args, vec!["/downloads/ps/Set-up.exe"]);
    assert_eq!(spec.target.as_deref(), Some(Path::new("/downloads/ps/Set-up.exe")));
    assert_eq!(spec.working_dir.as_deref(), Some(Path::new("/downloads/ps")));

    let missing = plan(
        &Intent::Install {
            installer: PathBuf::from("/downloads/none.exe"),
        },
        &ctx(&config, &runtime, &fs),
    );
    assert!(matches!(missing, Err(WinepilotError::TargetNotFound(_))));
    Ok(())
}

#[test]
fn launch_locates_newest_matching_target() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();
    let adobe = format!("{PREFIX}/drive_c/Program Files/Adobe");
    fs.add_file(format!("{adobe}/Adobe Photoshop 2021/Photoshop.exe"), b"MZ".to_vec());
    fs.add_file(format!("{adobe}/Adobe Photoshop 2022/photoshop.EXE"), b"MZ".to_vec());
    fs.add_file(format!("{adobe}/Adobe Bridge 2022/Bridge.exe"), b"MZ".to_vec());
    fs.add_file(format!("{adobe}/Adobe Photoshop 2023/Plugins/Photoshop.exe"), b"MZ".to_vec());

    let c = ctx(&config, &runtime, &fs);
    let expected = PathBuf::from(format!("{adobe}/Adobe Photoshop 2022/photoshop.EXE"));
    assert_eq!(locate_target(&c)?, expected);

    let spec = plan(&Intent::Launch { executable: None }, &c)?;
    assert_eq!(spec.target.as_deref(), Some(expected.as_path()));
    assert_eq!(spec.timeout, Some(config.engine.launch_timeout));
    assert_eq!(spec.working_dir, expected.parent().map(Path::to_path_buf));
    Ok(())
}

#[test]
fn launch_with_explicit_executable_skips_lookup() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();
    fs.add_file("/apps/tool.exe", b"MZ".to_vec());

    let spec = plan(
        &Intent::Launch {
            executable: Some(PathBuf::from("/apps/tool.exe")),
        },
        &ctx(&config, &runtime, &fs),
    )?;
    assert_eq!(spec.steps[0].args, vec!["/apps/tool.exe"]);

    let missing = plan(
        &Intent::Launch {
            executable: Some(PathBuf::from("/apps/gone.exe")),
        },
        &ctx(&config, &runtime, &fs),
    );
    assert!(matches!(missing, Err(WinepilotError::TargetNotFound(_))));
    Ok(())
}

#[test]
fn target_lookup_fails_cleanly() {
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();

    let no_versions = ConfigFileBuilder::new().with_prefix(PREFIX).build();
    assert!(matches!(
        locate_target(&ctx(&no_versions, &runtime, &fs)),
        Err(WinepilotError::TargetNotFound(_))
    ));

    let no_targets = ConfigFileBuilder::new()
        .with_prefix(PREFIX)
        .with_version("cc2021", &[], &[])
        .build();
    assert!(matches!(
        locate_target(&ctx(&no_targets, &runtime, &fs)),
        Err(WinepilotError::TargetNotFound(_))
    ));

    let config = config();
    assert!(matches!(
        locate_target(&ctx(&config, &runtime, &fs)),
        Err(WinepilotError::TargetNotFound(_))
    ));
}

#[test]
fn dpi_is_range_checked_and_written_to_both_keys() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();
    let c = ctx(&config, &runtime, &fs);

    for dpi in [95, 481, 0] {
        assert!(matches!(
            plan(&Intent::SetDpi { dpi }, &c),
            Err(WinepilotError::InvalidTask(_))
        ));
    }

    let spec = plan(&Intent::SetDpi { dpi: 480 }, &c)?;
    assert_eq!(spec.steps.len(), 2);
    assert_eq!(spec.steps[0].args[2], r"HKCU\Control Panel\Desktop");
    assert_eq!(spec.steps[1].args[2], r"HKCU\Software\Wine\Fonts");
    for step in &spec.steps {
        assert_eq!(step.args[4], "LogPixels");
        assert_eq!(step.args[6], "REG_DWORD");
        assert_eq!(step.args[8], "480");
    }
    assert!(plan(&Intent::SetDpi { dpi: 96 }, &c).is_ok());
    Ok(())
}

#[test]
fn dpi_is_read_back_with_default() {
    assert_eq!(current_dpi(&parse_registry("")), 96);
    let store = parse_registry("[Control Panel\\\\Desktop]\n\"LogPixels\"=dword:000000c0\n");
    assert_eq!(current_dpi(&store), 192);
}

#[test]
fn tweaks_become_typed_registry_writes() -> Result<(), WinepilotError> {
    let config = config();
    let runtime = descriptor(&[Arch::X64]);
    let fs = initialised_prefix();

    let spec = plan(&Intent::ApplyTweaks, &ctx(&config, &runtime, &fs))?;
    assert_eq!(spec.steps.len(), 2);
    assert_eq!(spec.steps[0].args[6], "REG_SZ");
    assert_eq!(spec.steps[0].args[8], "builtin,native");
    assert_eq!(spec.steps[1].args[6], "REG_DWORD");
    assert_eq!(spec.steps[1].args[8], "262150");

    let bare = ConfigFileBuilder::new().with_prefix(PREFIX).build();
    assert!(matches!(
        plan(&Intent::ApplyTweaks, &ctx(&bare, &runtime, &fs)),
        Err(WinepilotError::InvalidTask(_))
    ));
    Ok(())
}

#[test]
fn prerequisites_use_the_package_manager_when_available() {
    let fs = MockFileSystem::new();
    fs.add_file("/etc/os-release", b"ID=fedora\n".to_vec());
    let profile = detect(&fs, Path::new("/etc/os-release"), &|_| true);

    let PrerequisitePlan::Task(spec) = plan_prerequisites(&profile, "winetricks") else {
        panic!("fedora supports automatic install");
    };
    assert_eq!(spec.steps.len(), 1);
    assert_eq!(spec.steps[0].program, Path::new("sudo"));
    assert_eq!(
        spec.steps[0].args,
        vec!["dnf", "install", "-y", "winetricks", "cabextract"]
    );
}

#[test]
fn prerequisites_fall_back_to_manual_instructions() {
    let profile = HostProfile::unknown(DetectionRule::Unmatched("gentoo".to_string()));
    match plan_prerequisites(&profile, "winetricks") {
        PrerequisitePlan::Manual(text) => {
            assert!(text.contains("winetricks cabextract"));
            assert!(text.contains("gentoo"));
        }
        PrerequisitePlan::Task(spec) => panic!("unexpected task {spec:?}"),
    }
}

#[test]
fn setup_default_timeout_is_an_hour() {
    assert_eq!(config().engine.setup_timeout, Duration::from_secs(3600));
}
