//! Boot partition image construction.
//!
//! U-Boot distro-boot reads a FAT partition containing the kernel image,
//! the initrd, optionally the dtb, and `extlinux/extlinux.conf`. The
//! extlinux entry carries the root filesystem UUID; getting that wrong
//! produces an image that flashes fine and never boots.

pub mod extlinux;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::process::Cmd;

/// Volume label of the boot partition, referenced by fstab.
pub const BOOT_LABEL: &str = "boot";
/// Filename U-Boot expects for the kernel.
pub const KERNEL_FILENAME: &str = "Image";
/// Filename U-Boot expects for the initrd.
pub const INITRD_FILENAME: &str = "initrd.img";
/// Size of the synthesized boot partition image.
pub const BOOT_IMAGE_SIZE_MB: u64 = 256;

/// Synthesize an empty FAT32 boot partition template.
pub fn create_boot_template(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Creating boot template {}", path.display()))?;
    file.set_len(BOOT_IMAGE_SIZE_MB * 1024 * 1024)?;

    Cmd::new("mkfs.vfat")
        .args(["-F", "32", "-n", BOOT_LABEL])
        .arg_path(path)
        .error_msg("mkfs.vfat failed for boot template")
        .run()?;
    Ok(())
}

/// Copy one file into the mounted boot partition under a fixed name.
pub fn splice_file(source: &Path, boot_mount: &Path, dest_name: &str, what: &str) -> Result<()> {
    if !source.exists() {
        bail!("{} not found at {}", what, source.display());
    }
    let dest = boot_mount.join(dest_name);
    fs::copy(source, &dest)
        .with_context(|| format!("Copying {} to {}", what, dest.display()))?;
    println!("  {} -> {}", what, dest_name);
    Ok(())
}
