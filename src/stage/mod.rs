//! Pipeline stages and the orchestrator.
//!
//! The pipeline has exactly one shape: kernel -> packages -> rootfs ->
//! boot image. Stages run strictly in sequence on one thread; each
//! receives the shared context and records its typed artifacts there.
//! The orchestrator owns timing, the status report, and the guarantee
//! that the cleanup stack is drained on every exit path.

pub mod boot;
pub mod context;
pub mod kernel;
pub mod package;
pub mod rootfs;

pub use context::BuildContext;

use anyhow::{Context as _, Result};

use crate::cleanup;
use crate::report::{self, StatusSnapshot};
use crate::timing::Timer;

/// The enumerated stage set, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Kernel,
    Package,
    Rootfs,
    BootImage,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 4] = [Stage::Kernel, Stage::Package, Stage::Rootfs, Stage::BootImage];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Kernel => "kernel",
            Stage::Package => "package",
            Stage::Rootfs => "rootfs",
            Stage::BootImage => "boot-image",
        }
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<()> {
        match self {
            Stage::Kernel => kernel::run(ctx),
            Stage::Package => package::run(ctx),
            Stage::Rootfs => rootfs::run(ctx),
            Stage::BootImage => boot::run(ctx),
        }
    }
}

/// Run the full pipeline.
///
/// On failure the error names the failing stage; whatever scoped
/// acquisitions are still outstanding are unwound before returning.
pub fn run_pipeline(ctx: &mut BuildContext) -> Result<()> {
    cleanup::install_panic_hook();
    cleanup::install_signal_handlers();

    let total = Stage::ALL.len();
    for (index, stage) in Stage::ALL.iter().enumerate() {
        println!("\n=== Stage {}/{}: {} ===", index + 1, total, stage.name());
        write_snapshot(ctx, stage.name(), index, total);

        let timer = Timer::start(stage.name());
        let result = stage.run(ctx);
        match result {
            Ok(()) => timer.finish(),
            Err(e) => {
                cleanup::unwind();
                write_snapshot(ctx, &format!("{} (failed)", stage.name()), index, total);
                return Err(e.context(format!("stage '{}' failed", stage.name())));
            }
        }

        write_snapshot(ctx, stage.name(), index + 1, total);
        ctx.manifest()
            .save(&ctx.config.output_dir)
            .context("Saving artifact manifest")?;
    }

    write_snapshot(ctx, "complete", total, total);

    let (acquisitions, releases) = cleanup::stats();
    if acquisitions != releases {
        // Should be unreachable; if it happens the mount-balance
        // invariant is broken and worth shouting about.
        eprintln!(
            "  [WARN] Scoped acquisition imbalance: {} acquired, {} released",
            acquisitions, releases
        );
    }

    Ok(())
}

fn write_snapshot(ctx: &BuildContext, stage: &str, done: usize, total: usize) {
    let artifacts = ctx.artifact_entries();
    report::write_status(
        &ctx.config.output_dir,
        &StatusSnapshot {
            stage,
            stages_done: done,
            stages_total: total,
            elapsed: ctx.started.elapsed(),
            artifacts: &artifacts,
        },
    );
}
