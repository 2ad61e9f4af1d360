//! Package stage: kernel, firmware and audio debs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::config::DTB_NAME;
use crate::kernel::KernelArtifactSet;
use crate::package::{self, BuiltPackage};
use crate::process::ensure_nonempty;
use crate::stage::BuildContext;

/// The three installable components. The kernel package is load-bearing;
/// the other two are attempted independently and their failure does not
/// stop the stage.
const COMPONENTS: &[(&str, &str)] = &[
    ("linux", "Linux kernel, device tree and modules for the Rock 5B"),
    ("firmware", "WiFi/BT and GPU firmware blobs for the Rock 5B"),
    ("audio", "ALSA UCM profiles and audio configuration for the Rock 5B"),
];

/// Build all packages and record them in the context.
pub fn run(ctx: &mut BuildContext) -> Result<()> {
    let kernel = ctx.require_kernel()?.clone();

    // The gate downstream stages rely on: no kernel image, no pipeline.
    ensure_nonempty(&kernel.image, "Kernel image")?;

    let mut built = Vec::new();
    let mut kernel_package_error = None;

    for (component, description) in COMPONENTS {
        println!("  Building package {}...", package::package_name(component));
        let result = build_component(ctx, &kernel, component, description);
        match result {
            Ok(pkg) => built.push(pkg),
            Err(e) if *component == "linux" => {
                eprintln!("  [FAIL] {} package: {:#}", component, e);
                kernel_package_error = Some(e);
            }
            Err(e) => {
                eprintln!("  [WARN] {} package failed, continuing: {:#}", component, e);
            }
        }
    }

    if let Some(e) = kernel_package_error {
        return Err(e.context("Kernel package build failed"));
    }

    ctx.packages = built;
    Ok(())
}

fn build_component(
    ctx: &BuildContext,
    kernel: &KernelArtifactSet,
    component: &str,
    description: &str,
) -> Result<BuiltPackage> {
    let config = &ctx.config;
    let staging = package::create_staging_root(&config.work_dir, component)?;

    match component {
        "linux" => stage_kernel_payload(&staging, kernel)?,
        _ => stage_companion_payload(ctx, &staging, component)?,
    }

    package::write_control(&staging, component, description, &kernel.release)?;
    package::build_deb(&staging, &config.output_dir, component, &kernel.release)
}

/// Kernel payload: image and modules are required, the dtb degrades to
/// a placeholder.
pub fn stage_kernel_payload(staging: &Path, kernel: &KernelArtifactSet) -> Result<()> {
    let boot = staging.join("boot");
    fs::create_dir_all(&boot)?;

    ensure_nonempty(&kernel.image, "Kernel image")?;
    fs::copy(&kernel.image, boot.join(format!("Image-{}", kernel.release)))
        .context("Copying kernel image into staging")?;

    match &kernel.dtb {
        Some(dtb) => {
            fs::copy(dtb, boot.join(DTB_NAME)).context("Copying dtb into staging")?;
        }
        None => {
            eprintln!("  [WARN] No device tree blob - packaging a placeholder");
            package::write_placeholder_dtb(&boot.join(DTB_NAME))?;
        }
    }

    let modules_source = kernel.modules_dir.join("lib/modules");
    if !modules_source.exists() {
        bail!(
            "Module tree missing at {} - was modules_install skipped?",
            modules_source.display()
        );
    }
    let copied = package::copy_tree(&modules_source, &staging.join("lib/modules"))?;
    println!("    Staged {} module files", copied);
    Ok(())
}

/// Firmware/audio payloads come from the payload directories; the whole
/// tree is the required payload for its component.
fn stage_companion_payload(ctx: &BuildContext, staging: &Path, component: &str) -> Result<()> {
    let payload = ctx.config.payload_dir(component);
    if !payload.is_dir() {
        bail!(
            "Payload directory missing: {}\nProvide the {} payload there.",
            payload.display(),
            component
        );
    }

    let dest = match component {
        "firmware" => staging.join("usr/lib/firmware"),
        "audio" => staging.join("usr/share/alsa"),
        other => bail!("Unknown component '{}'", other),
    };
    let copied = package::copy_tree(&payload, &dest)?;
    if copied == 0 {
        bail!("Payload directory {} is empty", payload.display());
    }
    println!("    Staged {} payload files", copied);
    Ok(())
}
