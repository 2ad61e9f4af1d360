//! Unit-level tests over the library surface, covering behavior the
//! inline module tests don't reach.

mod helpers;

use helpers::{assert_file_contains, assert_file_exists, TestEnv};
use std::fs;

use rockbuilder::bootimg::extlinux::{extract_root_uuid, rewrite_root_uuid};
use rockbuilder::config::{BuildConfig, Distro, Overrides};
use rockbuilder::package;

// --- package naming across components ---

#[test]
fn package_filenames_carry_device_version_and_arch() {
    for component in ["linux", "firmware", "audio"] {
        let name = package::package_filename(component, "6.18.0-rc3-rock5b+");
        assert_eq!(
            name,
            format!("{}-rock5b_6.18.0-rc3-rock5b+_arm64.deb", component)
        );
    }
}

#[test]
fn write_control_produces_a_patched_record() {
    let env = TestEnv::new();
    let staging = package::create_staging_root(&env.work_dir, "audio").unwrap();
    package::write_control(&staging, "audio", "ALSA UCM profiles", "6.18.0-rc3-rock5b+").unwrap();

    let control = staging.join("DEBIAN/control");
    assert_file_exists(&control);
    assert_file_contains(&control, "Package: audio-rock5b");
    assert_file_contains(&control, "Version: 6.18.0-rc3-rock5b+");
    // The template placeholder must never survive into a real record.
    let content = fs::read_to_string(&control).unwrap();
    assert!(!content.contains("0.0.0"));
}

#[test]
fn staging_root_is_recreated_fresh() {
    let env = TestEnv::new();
    let first = package::create_staging_root(&env.work_dir, "linux").unwrap();
    fs::write(first.join("stale-file"), "old").unwrap();

    let second = package::create_staging_root(&env.work_dir, "linux").unwrap();
    assert_eq!(first, second);
    assert!(!second.join("stale-file").exists());
    assert!(second.join("DEBIAN").is_dir());
}

// --- boot entry rewriting (device-path root, not covered inline) ---

#[test]
fn rewrite_handles_device_path_roots_too() {
    let conf = "  append root=/dev/mmcblk0p2 rw rootwait\n";
    let (out, changed) = rewrite_root_uuid(conf, "0b5e-1d9a");
    assert!(changed);
    assert!(out.contains("root=UUID=0b5e-1d9a"));
    assert!(!out.contains("/dev/mmcblk0p2"));
    assert_eq!(extract_root_uuid(&out).as_deref(), Some("0b5e-1d9a"));
}

// --- configuration precedence (touches process env, keep serial) ---

#[test]
#[serial_test::serial(env_vars)]
fn overrides_beat_environment() {
    let env = TestEnv::new();
    std::env::set_var("KERNEL_VERSION", "5.10");

    let overrides = Overrides {
        kernel_version: Some("6.18".into()),
        ..Overrides::default()
    };
    let config = BuildConfig::load(&env.base_dir, &overrides).unwrap();
    assert_eq!(config.kernel_version, "6.18");

    std::env::remove_var("KERNEL_VERSION");
}

#[test]
#[serial_test::serial(env_vars)]
fn environment_beats_env_file() {
    let env = TestEnv::new();
    fs::write(env.base_dir.join(".env"), "KERNEL_VERSION=4.19\nDISTRO=debian\n").unwrap();
    std::env::set_var("KERNEL_VERSION", "5.15");

    let config = BuildConfig::load(&env.base_dir, &Overrides::default()).unwrap();
    assert_eq!(config.kernel_version, "5.15");
    // Untouched by the real environment, the file still applies.
    assert_eq!(config.distro, Distro::Debian);

    std::env::remove_var("KERNEL_VERSION");
}

#[test]
#[serial_test::serial(env_vars)]
fn explicit_cache_request_is_recorded() {
    let env = TestEnv::new();
    std::env::remove_var("USE_CCACHE");

    let config = BuildConfig::load(&env.base_dir, &Overrides::default()).unwrap();
    assert!(!config.ccache_explicit);

    let overrides = Overrides {
        use_ccache: Some(true),
        ..Overrides::default()
    };
    let config = BuildConfig::load(&env.base_dir, &overrides).unwrap();
    assert!(config.ccache_explicit);
    assert!(config.use_ccache);
}
