//! Package installation inside the isolated environment.
//!
//! Every in-target operation funnels through `chroot_cmd` so the apt
//! environment (non-interactive frontend, sane PATH) is set in exactly
//! one place.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::process::Cmd;
use crate::retry;

/// Packages every image needs regardless of hardware. Failure to
/// install these is fatal.
pub const TOOLING_PACKAGES: &[&str] = &[
    "sudo",
    "openssh-server",
    "network-manager",
    "ca-certificates",
    "initramfs-tools",
    "u-boot-tools",
];

/// Board support packages that may not exist on every mirror or series.
/// Each is attempted alone and skipped with a warning if unavailable.
pub const OPTIONAL_DEVICE_PACKAGES: &[&str] = &[
    "rockchip-multimedia-config",
    "malirun",
    "rknpu2-runtime",
];

/// Build a command that runs inside the target rootfs.
pub fn chroot_cmd(rootfs: &Path, program: &str, args: &[&str]) -> Cmd {
    Cmd::new("chroot")
        .arg_path(rootfs)
        .arg(program)
        .args(args.iter().copied())
        .env_var("DEBIAN_FRONTEND", "noninteractive")
        .env_var(
            "PATH",
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
        )
}

/// Refresh package lists and apply pending upgrades. Network-bound, so
/// retried; exhaustion is fatal upstream.
pub fn apt_update_upgrade(rootfs: &Path) -> Result<()> {
    println!("  Updating package lists...");
    retry::retry_default("apt-get update", || {
        chroot_cmd(rootfs, "apt-get", &["update"])
            .error_msg("apt-get update failed")
            .run()?;
        Ok(())
    })?;

    println!("  Upgrading base system...");
    chroot_cmd(rootfs, "apt-get", &["-y", "upgrade"])
        .error_msg("apt-get upgrade failed")
        .run()?;
    Ok(())
}

/// Install required packages. Any failure here is fatal.
pub fn apt_install(rootfs: &Path, packages: &[&str]) -> Result<()> {
    println!("  Installing: {}", packages.join(" "));
    chroot_cmd(
        rootfs,
        "apt-get",
        &[&["-y", "install"][..], packages].concat(),
    )
    .error_msg(format!("apt-get install failed for: {}", packages.join(" ")))
    .run()?;
    Ok(())
}

/// Install optional packages one at a time; unavailable ones are skipped
/// with a warning instead of failing the stage.
pub fn apt_install_optional(rootfs: &Path, packages: &[&str]) -> Vec<String> {
    let mut skipped = Vec::new();
    for package in packages {
        println!("  Installing (optional): {}", package);
        let result = chroot_cmd(rootfs, "apt-get", &["-y", "install", package])
            .allow_fail()
            .run();
        match result {
            Ok(r) if r.success() => {}
            Ok(r) => {
                eprintln!(
                    "  [WARN] Optional package '{}' unavailable, skipping: {}",
                    package,
                    r.stderr_trimmed().lines().last().unwrap_or("")
                );
                skipped.push(package.to_string());
            }
            Err(e) => {
                eprintln!(
                    "  [WARN] Optional package '{}' install errored, skipping: {:#}",
                    package, e
                );
                skipped.push(package.to_string());
            }
        }
    }
    skipped
}

/// Install locally built .deb files that were copied into the rootfs.
/// These define the bootable system, so failure is fatal.
pub fn install_local_debs(rootfs: &Path, debs_in_target: &[PathBuf]) -> Result<()> {
    let args: Vec<String> = debs_in_target
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    println!("  Installing built packages...");
    chroot_cmd(rootfs, "dpkg", &[&["-i"][..], &arg_refs[..]].concat())
        .error_msg("dpkg -i failed for built packages")
        .run()?;
    Ok(())
}

/// Regenerate the initramfs for the installed kernel release.
pub fn generate_initramfs(rootfs: &Path, release: &str) -> Result<()> {
    println!("  Generating initramfs for {}...", release);
    chroot_cmd(rootfs, "update-initramfs", &["-c", "-k", release])
        .error_msg("update-initramfs failed")
        .run()?;

    let initrd = rootfs.join("boot").join(format!("initrd.img-{}", release));
    if !initrd.exists() {
        anyhow::bail!(
            "update-initramfs succeeded but {} is missing",
            initrd.display()
        );
    }
    Ok(())
}

/// Drop apt caches so they don't ship in the image.
pub fn clean_apt_caches(rootfs: &Path) -> Result<()> {
    chroot_cmd(rootfs, "apt-get", &["clean"])
        .error_msg("apt-get clean failed")
        .run()?;
    let lists = rootfs.join("var/lib/apt/lists");
    if lists.exists() {
        for entry in std::fs::read_dir(&lists).context("Reading apt lists dir")? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}
