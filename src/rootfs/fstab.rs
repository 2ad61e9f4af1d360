//! Filesystem table generation.
//!
//! fstab mounts by fixed partition labels, never by UUID: the UUID
//! changes every time an image is reflashed, and an fstab keyed on it
//! would strand the system at boot. The boot-loader entry is the only
//! place the UUID appears, and the boot stage rewrites it per image.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::ROOTFS_LABEL;
use crate::bootimg::BOOT_LABEL;

/// Render /etc/fstab contents.
pub fn render_fstab() -> String {
    format!(
        "# <file system> <mount point> <type> <options> <dump> <pass>\n\
         LABEL={rootfs}\t/\text4\tdefaults,noatime\t0\t1\n\
         LABEL={boot}\t/boot/firmware\tvfat\tdefaults\t0\t2\n",
        rootfs = ROOTFS_LABEL,
        boot = BOOT_LABEL,
    )
}

/// Write /etc/fstab into the mounted rootfs.
pub fn write_fstab(rootfs: &Path) -> Result<()> {
    let etc = rootfs.join("etc");
    fs::create_dir_all(&etc)?;
    fs::write(etc.join("fstab"), render_fstab()).context("Writing /etc/fstab")?;
    fs::create_dir_all(rootfs.join("boot/firmware"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fstab_uses_labels_not_uuids() {
        let fstab = render_fstab();
        assert!(fstab.contains("LABEL=rootfs\t/\text4"));
        assert!(fstab.contains("LABEL=boot\t/boot/firmware\tvfat"));
        assert!(!fstab.contains("UUID="));
    }

    #[test]
    fn test_write_fstab_creates_mountpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_fstab(dir.path()).unwrap();
        assert!(dir.path().join("etc/fstab").exists());
        assert!(dir.path().join("boot/firmware").is_dir());
    }
}
