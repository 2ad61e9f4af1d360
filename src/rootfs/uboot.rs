//! Boot-loader package configuration.
//!
//! u-boot-menu regenerates the on-rootfs extlinux.conf whenever a kernel
//! package is installed. Its /etc/default/u-boot template must be
//! patched to mount root by label and carry the board's console options,
//! otherwise the regenerated entries point nowhere.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::ROOTFS_LABEL;
use crate::bootimg::extlinux::BASE_APPEND_OPTIONS;
use crate::config::DEVICE;

/// Debian package providing the extlinux entry generator.
pub const BOOTLOADER_PACKAGE: &str = "u-boot-menu";

/// Render /etc/default/u-boot.
pub fn render_uboot_default() -> String {
    format!(
        "U_BOOT_MENU_LABEL=\"{device}\"\n\
         U_BOOT_ROOT=\"root=LABEL={label}\"\n\
         U_BOOT_PARAMETERS=\"{options}\"\n\
         U_BOOT_TIMEOUT=\"30\"\n",
        device = DEVICE,
        label = ROOTFS_LABEL,
        options = BASE_APPEND_OPTIONS,
    )
}

/// Patch the bootloader configuration template inside the rootfs.
pub fn write_uboot_default(rootfs: &Path) -> Result<()> {
    let path = rootfs.join("etc/default/u-boot");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, render_uboot_default())
        .with_context(|| format!("Writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uboot_default_mounts_by_label() {
        let content = render_uboot_default();
        assert!(content.contains("root=LABEL=rootfs"));
        assert!(content.contains("console=ttyS2,1500000"));
        assert!(!content.contains("UUID="));
    }
}
