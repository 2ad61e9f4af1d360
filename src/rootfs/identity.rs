//! System identity configuration.
//!
//! Hostname and name resolution are written directly into the mounted
//! rootfs, not through the chroot: these are plain files, and direct
//! writes work even before the target's userspace is usable.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::DEVICE;

/// Hostname given to every image.
pub const HOSTNAME: &str = DEVICE;

/// Write /etc/hostname and /etc/hosts.
pub fn write_hostname(rootfs: &Path) -> Result<()> {
    let etc = rootfs.join("etc");
    fs::create_dir_all(&etc)?;

    fs::write(etc.join("hostname"), format!("{}\n", HOSTNAME))
        .context("Writing /etc/hostname")?;

    fs::write(etc.join("hosts"), hosts_content())
        .context("Writing /etc/hosts")?;
    Ok(())
}

/// Point the target's resolver at a public DNS server so apt works
/// inside the chroot. First boot replaces this via network-manager.
pub fn write_resolv_conf(rootfs: &Path) -> Result<()> {
    let etc = rootfs.join("etc");
    fs::create_dir_all(&etc)?;

    let resolv = etc.join("resolv.conf");
    // The base tarball may ship resolv.conf as a dangling symlink into
    // /run; replace it outright.
    if resolv.symlink_metadata().is_ok() {
        fs::remove_file(&resolv).context("Removing stale resolv.conf")?;
    }
    fs::write(&resolv, "nameserver 1.1.1.1\nnameserver 8.8.8.8\n")
        .context("Writing /etc/resolv.conf")?;
    Ok(())
}

fn hosts_content() -> String {
    format!(
        "127.0.0.1\tlocalhost\n127.0.1.1\t{host}\n\n::1\tlocalhost ip6-localhost ip6-loopback\n",
        host = HOSTNAME
    )
}
