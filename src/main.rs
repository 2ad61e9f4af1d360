//! rockbuilder - Rock 5B bootable image builder.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use rockbuilder::clean::{self, CleanTarget};
use rockbuilder::commands::{self, ShowTarget};
use rockbuilder::config::{BuildConfig, Overrides};
use rockbuilder::preflight;

#[derive(Parser)]
#[command(name = "rockbuilder")]
#[command(about = "Bootable Ubuntu image builder for the Rock 5B")]
#[command(
    after_help = "QUICK START:\n  rockbuilder preflight           Check host tools\n  rockbuilder build               Full build (kernel, packages, rootfs, boot image)\n  rockbuilder boot-image --dry-run  Verify the rootfs UUID without building\n  rockbuilder clean               Remove build outputs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline (kernel -> packages -> rootfs -> boot image)
    Build {
        /// Kernel version to request (selects the source branch)
        #[arg(long)]
        kernel_version: Option<String>,
        /// Base distribution: ubuntu or debian
        #[arg(long)]
        distro: Option<String>,
        /// Disable the compiler cache
        #[arg(long)]
        no_cache: bool,
        /// Explicit rootfs image path
        #[arg(long)]
        rootfs_image: Option<PathBuf>,
        /// Explicit output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build only the boot image against an existing rootfs
    BootImage {
        /// Rootfs image to link against
        #[arg(long)]
        rootfs_image: Option<PathBuf>,
        /// Output directory (manifest is read from here too)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only resolve and print the rootfs UUID; mutate nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check host tool availability before a build
    Preflight {
        /// Exit non-zero if any required check fails
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowWhat,
    },

    /// Clean build artifacts (default: preserves downloads)
    Clean {
        #[command(subcommand)]
        what: Option<CleanWhat>,
    },
}

#[derive(Subcommand)]
enum ShowWhat {
    /// Resolved configuration
    Config,
    /// Last build status snapshot
    Status,
}

#[derive(Subcommand)]
enum CleanWhat {
    /// Outputs only (default)
    Outputs,
    /// Downloaded tarballs and the kernel source clone
    Downloads,
    /// Everything, including the compiler cache
    All,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The context chain names the failing stage and operation,
            // with the underlying tool's output where it was captured.
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    // Load .env if present
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Build {
            kernel_version,
            distro,
            no_cache,
            rootfs_image,
            output,
        } => {
            let overrides = Overrides {
                kernel_version,
                distro,
                use_ccache: no_cache.then_some(false),
                rootfs_image,
                output_dir: output,
            };
            commands::cmd_build(&base_dir, &overrides)?;
        }

        Commands::BootImage {
            rootfs_image,
            output,
            dry_run,
        } => {
            let overrides = Overrides {
                rootfs_image,
                output_dir: output,
                ..Default::default()
            };
            commands::cmd_boot_image(&base_dir, &overrides, dry_run)?;
        }

        Commands::Preflight { strict } => {
            let report = preflight::run_checks();
            report.print();
            if strict && !report.all_passed() {
                anyhow::bail!("{} preflight check(s) failed", report.fail_count());
            }
        }

        Commands::Show { what } => {
            let target = match what {
                ShowWhat::Config => ShowTarget::Config,
                ShowWhat::Status => ShowTarget::Status,
            };
            commands::cmd_show(&base_dir, target, &Overrides::default())?;
        }

        Commands::Clean { what } => {
            let config = BuildConfig::load(&base_dir, &Overrides::default())?;
            let target = match what {
                None | Some(CleanWhat::Outputs) => CleanTarget::Outputs,
                Some(CleanWhat::Downloads) => CleanTarget::Downloads,
                Some(CleanWhat::All) => CleanTarget::All,
            };
            clean::clean(&config, target)?;
        }
    }

    Ok(())
}
