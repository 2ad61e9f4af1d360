//! Build status report and artifact manifest.
//!
//! The status file is a plain-text snapshot (stage, progress, elapsed,
//! artifact inventory) rewritten after every stage for external monitors;
//! nothing in the pipeline reads it back. The manifest is JSON and is
//! read back by the standalone `boot-image` command to recover the
//! derived kernel release without re-discovering artifacts on disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::timing::format_duration;

/// Status file name inside the output directory.
pub const STATUS_FILE: &str = "build-status.txt";
/// Manifest file name inside the output directory.
pub const MANIFEST_FILE: &str = "artifacts.json";

/// One line of the artifact inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub kind: String,
    pub path: PathBuf,
}

/// Snapshot written after each stage.
pub struct StatusSnapshot<'a> {
    pub stage: &'a str,
    pub stages_done: usize,
    pub stages_total: usize,
    pub elapsed: Duration,
    pub artifacts: &'a [ArtifactEntry],
}

/// Rewrite the status file. Failures are reported, never fatal: losing
/// a monitoring snapshot must not kill a build.
pub fn write_status(output_dir: &Path, snapshot: &StatusSnapshot<'_>) {
    let mut text = String::new();
    text.push_str(&format!("stage: {}\n", snapshot.stage));
    text.push_str(&format!(
        "progress: {}/{} ({:.0}%)\n",
        snapshot.stages_done,
        snapshot.stages_total,
        snapshot.stages_done as f64 * 100.0 / snapshot.stages_total.max(1) as f64,
    ));
    text.push_str(&format!(
        "elapsed: {}\n",
        format_duration(snapshot.elapsed)
    ));
    text.push_str("artifacts:\n");
    for artifact in snapshot.artifacts {
        text.push_str(&format!(
            "  {}: {}\n",
            artifact.kind,
            artifact.path.display()
        ));
    }

    if let Err(e) = fs::create_dir_all(output_dir)
        .and_then(|_| fs::write(output_dir.join(STATUS_FILE), &text))
    {
        eprintln!("  [WARN] Could not write status report: {}", e);
    }
}

/// Machine-readable record of what the pipeline produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Derived kernel release string, authoritative for all naming.
    pub kernel_release: String,
    /// Built package files.
    pub packages: Vec<PackageRecord>,
    /// Final rootfs image path.
    pub rootfs_image: Option<PathBuf>,
    /// UUID assigned when the rootfs image was formatted.
    pub rootfs_uuid: Option<String>,
    /// Final boot image path.
    pub boot_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub component: String,
    pub version: String,
    pub arch: String,
    pub path: PathBuf,
}

impl ArtifactManifest {
    pub fn save(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .with_context(|| format!("Writing manifest {}", path.display()))?;
        Ok(())
    }

    pub fn load(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "No artifact manifest at {}. Run a full build first.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Parsing manifest {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trip() {
        let dir = std::env::temp_dir().join("rockbuilder-manifest-test");
        fs::create_dir_all(&dir).unwrap();

        let manifest = ArtifactManifest {
            kernel_release: "6.18.0-rc3-rock5b+".into(),
            packages: vec![PackageRecord {
                component: "linux".into(),
                version: "6.18.0-rc3-rock5b+".into(),
                arch: "arm64".into(),
                path: "/out/linux-rock5b_6.18.0-rc3-rock5b+_arm64.deb".into(),
            }],
            rootfs_image: Some("/out/rock5b-rootfs.img".into()),
            rootfs_uuid: Some("2c1f3a44-9f0e-4f7c-9f3a-0f8a6f2d5e11".into()),
            boot_image: None,
        };
        manifest.save(&dir).unwrap();

        let loaded = ArtifactManifest::load(&dir).unwrap();
        assert_eq!(loaded.kernel_release, manifest.kernel_release);
        assert_eq!(loaded.packages.len(), 1);
        assert_eq!(loaded.rootfs_uuid, manifest.rootfs_uuid);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_status_snapshot_contents() {
        let dir = std::env::temp_dir().join("rockbuilder-status-test");
        fs::create_dir_all(&dir).unwrap();

        let artifacts = vec![ArtifactEntry {
            kind: "package".into(),
            path: "/out/linux-rock5b_6.18.0_arm64.deb".into(),
        }];
        write_status(
            &dir,
            &StatusSnapshot {
                stage: "rootfs",
                stages_done: 2,
                stages_total: 4,
                elapsed: Duration::from_secs(30),
                artifacts: &artifacts,
            },
        );

        let text = fs::read_to_string(dir.join(STATUS_FILE)).unwrap();
        assert!(text.contains("stage: rootfs"));
        assert!(text.contains("progress: 2/4 (50%)"));
        assert!(text.contains("linux-rock5b_6.18.0_arm64.deb"));

        fs::remove_dir_all(&dir).ok();
    }
}
