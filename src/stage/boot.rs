//! Boot image stage.
//!
//! Resolves the rootfs UUID, splices kernel/initrd/dtb from the
//! finished rootfs into a FAT boot partition template, and writes the
//! extlinux entry referencing that UUID. The UUID linkage is the single
//! highest-risk correctness point in the pipeline: an entry referencing
//! the wrong identifier produces an image that will not boot.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bootimg::{self, extlinux, INITRD_FILENAME, KERNEL_FILENAME};
use crate::cleanup::LoopMount;
use crate::config::{BuildConfig, DEVICE, DTB_NAME};
use crate::rootfs;
use crate::stage::BuildContext;

/// Build the boot image from the pipeline's own artifacts.
pub fn run(ctx: &mut BuildContext) -> Result<()> {
    let kernel_release = ctx.require_kernel()?.release.clone();
    let rootfs_image = ctx.require_rootfs()?.path.clone();
    let boot_image = build_boot_image(&ctx.config, &rootfs_image, &kernel_release)?;
    ctx.boot_image = Some(boot_image);
    Ok(())
}

/// Dry run: resolve and report the rootfs UUID, mutate nothing.
///
/// Exists because the full run is expensive and operators frequently
/// only need to confirm the identifier before committing.
pub fn dry_run(rootfs_image: &Path) -> Result<String> {
    let uuid = rootfs::query_uuid(rootfs_image)?;
    println!("Rootfs UUID: {}", uuid);
    println!("(dry run - no files were modified)");
    Ok(uuid)
}

/// Assemble the boot partition image and return its output path.
pub fn build_boot_image(
    config: &BuildConfig,
    rootfs_image: &Path,
    kernel_release: &str,
) -> Result<PathBuf> {
    // Step 1: the authoritative identifier. Unreadable means the rootfs
    // was never formatted - nothing to link against.
    let uuid = rootfs::query_uuid(rootfs_image)
        .context("Cannot resolve rootfs UUID - is the image formatted?")?;
    println!("  Rootfs UUID: {}", uuid);

    // Template synthesis and mounts.
    let template = config.work_dir.join("boot-template.img");
    bootimg::create_boot_template(&template)?;

    let boot_mountpoint = config.work_dir.join("mnt/boot");
    let boot_mount = LoopMount::mount(&template, &boot_mountpoint)?;

    let rootfs_mountpoint = config.work_dir.join("mnt/rootfs-ro");
    let rootfs_mount =
        LoopMount::mount_with_options(rootfs_image, &rootfs_mountpoint, &["ro"])?;

    let result = populate(
        &boot_mountpoint,
        &rootfs_mountpoint,
        kernel_release,
        &uuid,
    );

    // Symmetric teardown happens on both outcomes; the orchestrator's
    // unwind would also catch these, but the stage owns its own mounts.
    rootfs_mount.release()?;
    boot_mount.release()?;
    fs::remove_dir(&rootfs_mountpoint).ok();
    fs::remove_dir(&boot_mountpoint).ok();
    result?;

    // Publish to the named output location.
    fs::create_dir_all(&config.output_dir)?;
    let output = config.output_dir.join(format!("{}-boot.img", DEVICE));
    fs::copy(&template, &output)
        .with_context(|| format!("Copying boot image to {}", output.display()))?;
    println!("  Boot image: {}", output.display());
    Ok(output)
}

/// Copy the boot files and write the entry record, then verify.
fn populate(
    boot_mount: &Path,
    rootfs_mount: &Path,
    kernel_release: &str,
    uuid: &str,
) -> Result<()> {
    let rootfs_boot = rootfs_mount.join("boot");

    // Two required files under fixed platform names.
    bootimg::splice_file(
        &rootfs_boot.join(format!("Image-{}", kernel_release)),
        boot_mount,
        KERNEL_FILENAME,
        "Kernel image",
    )?;
    bootimg::splice_file(
        &rootfs_boot.join(format!("initrd.img-{}", kernel_release)),
        boot_mount,
        INITRD_FILENAME,
        "Initramfs",
    )?;

    // One optional file.
    let dtb_source = rootfs_boot.join(DTB_NAME);
    let dtb_present = dtb_source.exists();
    if dtb_present {
        bootimg::splice_file(&dtb_source, boot_mount, DTB_NAME, "Device tree")?;
    } else {
        eprintln!("  [WARN] No device tree blob in rootfs /boot - boot image ships without one");
    }

    // Entry record: rewrite if a template shipped one, synthesize if not.
    let entry_path = boot_mount.join(extlinux::ENTRY_PATH);
    if entry_path.exists() {
        let content = fs::read_to_string(&entry_path)?;
        let (rewritten, replaced) = extlinux::rewrite_root_uuid(&content, uuid);
        if replaced {
            fs::write(&entry_path, rewritten)?;
        } else {
            // Entry exists but carries no root= token; start over with a
            // known-good record rather than guessing at its shape.
            fs::write(&entry_path, extlinux::ExtlinuxEntry::minimal(uuid, dtb_present).render())?;
        }
    } else {
        fs::create_dir_all(entry_path.parent().expect("entry path has a parent"))?;
        fs::write(
            &entry_path,
            extlinux::ExtlinuxEntry::minimal(uuid, dtb_present).render(),
        )?;
    }

    // Verification gate: all three expected files, no exceptions.
    for required in [
        boot_mount.join(KERNEL_FILENAME),
        boot_mount.join(INITRD_FILENAME),
        entry_path.clone(),
    ] {
        if !required.exists() {
            bail!("Boot image verification failed: {} is missing", required.display());
        }
    }

    // And the linkage itself: the entry must reference the UUID we
    // resolved in step 1.
    let final_entry = fs::read_to_string(&entry_path)?;
    match extlinux::extract_root_uuid(&final_entry) {
        Some(embedded) if embedded == uuid => {}
        Some(embedded) => bail!(
            "Boot entry references UUID {} but rootfs has {}",
            embedded,
            uuid
        ),
        None => bail!("Boot entry contains no root=UUID= token after rewrite"),
    }

    println!("  Boot entry verified (root=UUID={})", uuid);
    Ok(())
}
