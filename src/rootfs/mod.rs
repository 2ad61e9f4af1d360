//! Root filesystem image mechanics.
//!
//! Creating, formatting and populating the ext4 image the target boots
//! from. The UUID assigned by mkfs is the authoritative identity of the
//! rootfs; the boot stage reads it back with blkid and embeds it in the
//! boot-loader entry.

pub mod chroot;
pub mod fstab;
pub mod identity;
pub mod uboot;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Volume label stamped on the rootfs filesystem. /etc/fstab mounts by
/// this label so a reflashed image with a fresh UUID still boots.
pub const ROOTFS_LABEL: &str = "rootfs";

/// The rootfs image and its identity.
#[derive(Debug, Clone)]
pub struct RootfsImage {
    pub path: PathBuf,
    pub size_mb: u64,
    /// Filesystem UUID, assigned at format time.
    pub uuid: String,
}

/// Create a sparse image file of the configured size.
pub fn create_image(path: &Path, size_mb: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Creating image file {}", path.display()))?;
    file.set_len(size_mb * 1024 * 1024)
        .with_context(|| format!("Sizing image to {} MB", size_mb))?;
    Ok(())
}

/// Format the image as ext4. This assigns the filesystem UUID, which
/// becomes the image's authoritative identifier from here on.
pub fn format_ext4(path: &Path) -> Result<String> {
    Cmd::new("mkfs.ext4")
        .args(["-q", "-F", "-L", ROOTFS_LABEL])
        .arg_path(path)
        .error_msg("mkfs.ext4 failed")
        .run()?;
    query_uuid(path)
}

/// Read the filesystem UUID of an image with blkid.
///
/// Fails if the image is not a formatted filesystem; callers that reach
/// this point with an unformatted image have a sequencing bug.
pub fn query_uuid(path: &Path) -> Result<String> {
    let result = Cmd::new("blkid")
        .args(["-o", "value", "-s", "UUID"])
        .arg_path(path)
        .error_msg(format!("blkid could not read a UUID from {}", path.display()))
        .run()?;
    let uuid = result.stdout_trimmed().to_string();
    if uuid.is_empty() {
        bail!(
            "No filesystem UUID on {} - is the image formatted?",
            path.display()
        );
    }
    Ok(uuid)
}

/// Unpack the base distribution tarball into the mounted rootfs.
pub fn unpack_base(tarball: &Path, mountpoint: &Path) -> Result<()> {
    println!("  Unpacking base system from {}...", tarball.display());
    Cmd::new("tar")
        .args(["-xpf"])
        .arg_path(tarball)
        .arg("-C")
        .arg_path(mountpoint)
        .error_msg("Base tarball extraction failed")
        .run()?;

    // Sanity: a base system without a package manager cannot proceed.
    if !mountpoint.join("usr/bin/apt-get").exists() && !mountpoint.join("usr/bin/dpkg").exists() {
        bail!("Base tarball did not contain a package manager - wrong archive?");
    }
    Ok(())
}

/// Compress a distribution copy of the final image with xz.
///
/// The uncompressed image stays in place; the `.img.xz` next to it is
/// what gets shipped.
pub fn compress_image(image: &Path) -> Result<PathBuf> {
    let compressed = PathBuf::from(format!("{}.xz", image.display()));
    println!("  Compressing image (this can take a while)...");
    Cmd::new("xz")
        .args(["-T0", "-f", "-k"])
        .arg_path(image)
        .error_msg("xz compression failed")
        .run()?;
    if !compressed.exists() {
        bail!("xz reported success but {} is missing", compressed.display());
    }
    println!("  Compressed image: {}", compressed.display());
    Ok(compressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_image_is_sparse_and_sized() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("test.img");
        create_image(&image, 16).unwrap();
        let meta = fs::metadata(&image).unwrap();
        assert_eq!(meta.len(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_query_uuid_rejects_unformatted() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("blank.img");
        create_image(&image, 1).unwrap();
        // blkid exits non-zero on a blank file; either way we must error.
        assert!(query_uuid(&image).is_err());
    }
}
