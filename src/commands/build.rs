//! Build command - runs the full pipeline.

use anyhow::Result;
use std::path::Path;

use crate::config::{BuildConfig, Overrides};
use crate::preflight;
use crate::stage::{self, BuildContext};
use crate::timing::format_duration;

/// Execute a full build.
pub fn cmd_build(base_dir: &Path, overrides: &Overrides) -> Result<()> {
    let config = BuildConfig::load(base_dir, overrides)?;

    println!("=== Rock 5B Image Build ===\n");
    config.print();

    // Catch missing host tools before spending an hour in the kernel.
    let report = preflight::run_checks();
    if !report.all_passed() {
        report.print();
        anyhow::bail!("Preflight checks failed - install the missing tools and retry");
    }

    let mut ctx = BuildContext::new(base_dir.to_path_buf(), config);
    stage::run_pipeline(&mut ctx)?;

    println!("\n=== Build complete ({}) ===", format_duration(ctx.started.elapsed()));
    if let Some(kernel) = &ctx.kernel {
        println!("  Kernel release: {}", kernel.release);
    }
    for package in &ctx.packages {
        println!("  Package: {}", package.path.display());
    }
    if let Some(rootfs) = &ctx.rootfs {
        println!("  Rootfs: {} (UUID {})", rootfs.path.display(), rootfs.uuid);
    }
    if let Some(boot) = &ctx.boot_image {
        println!("  Boot image: {}", boot.display());
    }
    Ok(())
}
