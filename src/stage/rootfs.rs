//! Rootfs assembly stage.
//!
//! Creates and formats the ext4 image, populates it with the base
//! distribution and the built packages inside a chroot, and tears the
//! whole mount chain down again. Every mount and the binfmt shim are
//! scoped acquisitions; declaration order below is the acquisition
//! order, so an early error return drops the guards in exact reverse.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cleanup::{BindMount, BinfmtShim, LoopMount};
use crate::download;
use crate::rootfs::{self, chroot, fstab, identity, uboot, RootfsImage};
use crate::stage::BuildContext;

/// Progress through the assembly, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ImageCreated,
    Formatted,
    Mounted,
    BaseInstalled,
    BindMounted,
    Configured,
    PackagesInstalled,
    Finalized,
    Unmounted,
}

fn advance(state: &mut Option<State>, next: State) {
    *state = Some(next);
    println!("  [state] {:?}", next);
}

/// Assemble the rootfs image and record it in the context.
pub fn run(ctx: &mut BuildContext) -> Result<()> {
    let kernel = ctx.require_kernel()?.clone();
    let config = ctx.config.clone();
    let mut state = None;

    // Image create + format. The UUID assigned here is the identity the
    // boot stage must link against.
    let image = &config.rootfs_image;
    if image.exists() {
        fs::remove_file(image).context("Removing stale rootfs image")?;
    }
    rootfs::create_image(image, config.rootfs_size_mb)?;
    advance(&mut state, State::ImageCreated);

    let uuid = rootfs::format_ext4(image)?;
    println!("  Filesystem UUID: {}", uuid);
    advance(&mut state, State::Formatted);

    let mountpoint = config.work_dir.join("mnt/rootfs");
    let root_mount = LoopMount::mount(image, &mountpoint)?;
    advance(&mut state, State::Mounted);

    // Base system.
    let tarball = download::fetch_base_tarball(&config.work_dir.join("downloads"), config.distro)?;
    rootfs::unpack_base(&tarball, &mountpoint)?;
    advance(&mut state, State::BaseInstalled);

    // Bind mounts so apt and its maintainer scripts work inside the
    // chroot. Declared individually: /dev/pts must die before /dev.
    let dev_mount = BindMount::bind(Path::new("/dev"), &mountpoint.join("dev"))?;
    let pts_mount = BindMount::bind(Path::new("/dev/pts"), &mountpoint.join("dev/pts"))?;
    let proc_mount = BindMount::bind(Path::new("/proc"), &mountpoint.join("proc"))?;
    let sys_mount = BindMount::bind(Path::new("/sys"), &mountpoint.join("sys"))?;
    advance(&mut state, State::BindMounted);

    let shim = BinfmtShim::register(&mountpoint)?;

    // System identity by direct file writes, not through the chroot.
    identity::write_hostname(&mountpoint)?;
    identity::write_resolv_conf(&mountpoint)?;
    advance(&mut state, State::Configured);

    install_everything(&mountpoint, &ctx.packages, &kernel.release)?;
    fstab::write_fstab(&mountpoint)?;
    advance(&mut state, State::PackagesInstalled);

    // Finalize: caches out, shim out, mounts unwound strictly LIFO.
    chroot::clean_apt_caches(&mountpoint)?;
    if let Some(shim) = shim {
        shim.deregister()?;
    }
    advance(&mut state, State::Finalized);

    sys_mount.release()?;
    proc_mount.release()?;
    pts_mount.release()?;
    dev_mount.release()?;
    root_mount.release()?;
    fs::remove_dir(&mountpoint).context("Removing mount point directory")?;
    advance(&mut state, State::Unmounted);

    let compressed = rootfs::compress_image(image)?;
    println!("  Distribution image: {}", compressed.display());

    ctx.rootfs = Some(RootfsImage {
        path: image.clone(),
        size_mb: config.rootfs_size_mb,
        uuid,
    });
    Ok(())
}

/// The in-chroot install sequence: refresh/upgrade, required tooling,
/// optional device support, the built packages, initramfs, bootloader.
fn install_everything(
    mountpoint: &Path,
    packages: &[crate::package::BuiltPackage],
    release: &str,
) -> Result<()> {
    chroot::apt_update_upgrade(mountpoint)?;

    chroot::apt_install(mountpoint, chroot::TOOLING_PACKAGES)
        .context("Required tooling install failed")?;

    let skipped = chroot::apt_install_optional(mountpoint, chroot::OPTIONAL_DEVICE_PACKAGES);
    if !skipped.is_empty() {
        println!("  Skipped optional packages: {}", skipped.join(", "));
    }

    // The built debs define the bootable system; failure here is fatal.
    let in_target = copy_debs_into_target(mountpoint, packages)?;
    chroot::install_local_debs(mountpoint, &in_target)
        .context("Installing built packages failed")?;
    cleanup_deb_drop(mountpoint);

    chroot::generate_initramfs(mountpoint, release)?;

    chroot::apt_install(mountpoint, &[uboot::BOOTLOADER_PACKAGE])
        .context("Bootloader package install failed")?;
    uboot::write_uboot_default(mountpoint)?;

    Ok(())
}

/// Copy the built debs to /tmp/packages inside the target; returns the
/// in-target paths dpkg sees.
fn copy_debs_into_target(
    mountpoint: &Path,
    packages: &[crate::package::BuiltPackage],
) -> Result<Vec<PathBuf>> {
    let drop_dir = mountpoint.join("tmp/packages");
    fs::create_dir_all(&drop_dir)?;

    let mut in_target = Vec::new();
    for package in packages {
        let file_name = package
            .path
            .file_name()
            .context("Package path has no file name")?;
        fs::copy(&package.path, drop_dir.join(file_name))
            .with_context(|| format!("Copying {} into target", package.path.display()))?;
        in_target.push(PathBuf::from("/tmp/packages").join(file_name));
    }
    Ok(in_target)
}

fn cleanup_deb_drop(mountpoint: &Path) {
    let drop_dir = mountpoint.join("tmp/packages");
    if let Err(e) = fs::remove_dir_all(&drop_dir) {
        eprintln!("  [WARN] Could not remove {}: {}", drop_dir.display(), e);
    }
}
