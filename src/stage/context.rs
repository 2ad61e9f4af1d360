//! Shared pipeline state.
//!
//! Stages communicate only through the typed artifacts recorded here;
//! nothing downstream rediscovers files by globbing.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Instant;

use crate::config::BuildConfig;
use crate::kernel::KernelArtifactSet;
use crate::package::BuiltPackage;
use crate::report::{ArtifactEntry, ArtifactManifest, PackageRecord};
use crate::rootfs::RootfsImage;

/// Context threaded through every stage.
pub struct BuildContext {
    pub config: BuildConfig,
    /// Project root (config fragments live here).
    pub base_dir: PathBuf,
    pub started: Instant,
    /// Set by the kernel stage.
    pub kernel: Option<KernelArtifactSet>,
    /// Set by the package stage.
    pub packages: Vec<BuiltPackage>,
    /// Set by the rootfs stage.
    pub rootfs: Option<RootfsImage>,
    /// Set by the boot image stage.
    pub boot_image: Option<PathBuf>,
}

impl BuildContext {
    pub fn new(base_dir: PathBuf, config: BuildConfig) -> Self {
        Self {
            config,
            base_dir,
            started: Instant::now(),
            kernel: None,
            packages: Vec::new(),
            rootfs: None,
            boot_image: None,
        }
    }

    /// Kernel artifacts, or an error naming the sequencing violation.
    pub fn require_kernel(&self) -> Result<&KernelArtifactSet> {
        match &self.kernel {
            Some(k) => Ok(k),
            None => bail!("Kernel artifacts not available - kernel stage did not run"),
        }
    }

    /// Rootfs image, or an error naming the sequencing violation.
    pub fn require_rootfs(&self) -> Result<&RootfsImage> {
        match &self.rootfs {
            Some(r) => Ok(r),
            None => bail!("Rootfs image not available - rootfs stage did not run"),
        }
    }

    /// Inventory for the status report.
    pub fn artifact_entries(&self) -> Vec<ArtifactEntry> {
        let mut entries = Vec::new();
        if let Some(kernel) = &self.kernel {
            entries.push(ArtifactEntry {
                kind: "kernel-image".into(),
                path: kernel.image.clone(),
            });
        }
        for package in &self.packages {
            entries.push(ArtifactEntry {
                kind: "package".into(),
                path: package.path.clone(),
            });
        }
        if let Some(rootfs) = &self.rootfs {
            entries.push(ArtifactEntry {
                kind: "rootfs-image".into(),
                path: rootfs.path.clone(),
            });
        }
        if let Some(boot) = &self.boot_image {
            entries.push(ArtifactEntry {
                kind: "boot-image".into(),
                path: boot.clone(),
            });
        }
        entries
    }

    /// Machine-readable manifest of everything produced so far.
    pub fn manifest(&self) -> ArtifactManifest {
        ArtifactManifest {
            kernel_release: self
                .kernel
                .as_ref()
                .map(|k| k.release.clone())
                .unwrap_or_default(),
            packages: self
                .packages
                .iter()
                .map(|p| PackageRecord {
                    component: p.component.clone(),
                    version: p.version.clone(),
                    arch: p.arch.clone(),
                    path: p.path.clone(),
                })
                .collect(),
            rootfs_image: self.rootfs.as_ref().map(|r| r.path.clone()),
            rootfs_uuid: self.rootfs.as_ref().map(|r| r.uuid.clone()),
            boot_image: self.boot_image.clone(),
        }
    }
}
