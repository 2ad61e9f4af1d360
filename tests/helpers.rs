//! Shared test utilities for rockbuilder tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use rockbuilder::config::{
    BuildConfig, Distro, DEFAULT_KERNEL_BRANCH_TEMPLATE, DEFAULT_KERNEL_GIT_URL,
};

/// Test environment with a temporary base directory laid out like a
/// real working tree.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let work_dir = base_dir.join("work");
        let output_dir = base_dir.join("output");
        fs::create_dir_all(&work_dir).unwrap();
        fs::create_dir_all(&output_dir).unwrap();

        Self {
            _temp_dir: temp_dir,
            base_dir,
            work_dir,
            output_dir,
        }
    }

    /// A frozen config pointing at this environment's directories.
    pub fn config(&self) -> BuildConfig {
        BuildConfig {
            kernel_version: "6.18".into(),
            distro: Distro::Ubuntu,
            use_ccache: false,
            ccache_explicit: false,
            work_dir: self.work_dir.clone(),
            output_dir: self.output_dir.clone(),
            rootfs_image: self.output_dir.join("rock5b-rootfs.img"),
            rootfs_size_mb: 64,
            kernel_git_url: DEFAULT_KERNEL_GIT_URL.into(),
            kernel_branch_template: DEFAULT_KERNEL_BRANCH_TEMPLATE.into(),
        }
    }

    /// Lay out a fake kernel build tree with a non-empty Image and,
    /// optionally, the dtb.
    pub fn fake_kernel_build(&self, with_dtb: bool) {
        let boot = self.config().kernel_build_dir().join("arch/arm64/boot");
        fs::create_dir_all(boot.join("dts/rockchip")).unwrap();
        fs::write(boot.join("Image"), vec![0u8; 4096]).unwrap();
        if with_dtb {
            fs::write(boot.join("dts/rockchip/rk3588-rock-5b.dtb"), vec![1u8; 512]).unwrap();
        }
    }

    /// Lay out a fake staged module tree and return its root.
    pub fn fake_module_tree(&self, release: &str) -> PathBuf {
        let staging = self.work_dir.join("staging/modules");
        let modules = staging.join("lib/modules").join(release);
        fs::create_dir_all(modules.join("kernel/drivers")).unwrap();
        fs::write(modules.join("modules.dep"), "").unwrap();
        fs::write(modules.join("kernel/drivers/fake.ko"), "elf").unwrap();
        staging
    }
}

pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

pub fn assert_file_contains(path: &Path, needle: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Could not read {}: {}", path.display(), e));
    assert!(
        content.contains(needle),
        "Expected {} to contain '{}', got:\n{}",
        path.display(),
        needle,
        content
    );
}
