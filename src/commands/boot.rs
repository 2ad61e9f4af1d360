//! Boot-image command - standalone boot image runs and the dry-run mode.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::{BuildConfig, Overrides};
use crate::report::ArtifactManifest;
use crate::stage::boot;

/// Build (or dry-run) the boot image against an existing rootfs image.
///
/// The non-dry run needs the derived kernel release to find the boot
/// files inside the rootfs; it comes from the artifact manifest a prior
/// build wrote, never from re-globbing the filesystem.
pub fn cmd_boot_image(base_dir: &Path, overrides: &Overrides, dry_run: bool) -> Result<()> {
    let config = BuildConfig::load(base_dir, overrides)?;
    let rootfs_image = config.rootfs_image.clone();

    if !rootfs_image.exists() {
        anyhow::bail!(
            "Rootfs image not found: {}\nRun a full build first or pass --rootfs-image.",
            rootfs_image.display()
        );
    }

    if dry_run {
        boot::dry_run(&rootfs_image)?;
        return Ok(());
    }

    let manifest = ArtifactManifest::load(&config.output_dir)
        .context("Boot image needs the kernel release from a prior build")?;
    if manifest.kernel_release.is_empty() {
        anyhow::bail!("Artifact manifest has no kernel release - rerun the full build");
    }

    crate::cleanup::install_panic_hook();
    crate::cleanup::install_signal_handlers();
    let output = boot::build_boot_image(&config, &rootfs_image, &manifest.kernel_release)?;
    println!("Boot image written to {}", output.display());
    Ok(())
}
