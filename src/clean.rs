//! Build artifact cleaning.

use anyhow::Result;
use std::fs;

use crate::config::BuildConfig;

/// What to remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    /// Output images, packages and reports (preserves downloads/sources).
    Outputs,
    /// Downloaded base tarballs and the kernel source clone.
    Downloads,
    /// Everything, including the ccache directory.
    All,
}

/// Clean build artifacts.
pub fn clean(config: &BuildConfig, target: CleanTarget) -> Result<()> {
    let mut cleaned = false;

    if matches!(target, CleanTarget::Outputs | CleanTarget::All) {
        cleaned |= remove_dir(&config.output_dir)?;
        cleaned |= remove_dir(&config.kernel_build_dir())?;
        cleaned |= remove_dir(&config.work_dir.join("staging"))?;
    }

    if matches!(target, CleanTarget::Downloads | CleanTarget::All) {
        cleaned |= remove_dir(&config.work_dir.join("downloads"))?;
        cleaned |= remove_dir(&config.kernel_source_dir())?;
    }

    if matches!(target, CleanTarget::All) {
        cleaned |= remove_dir(&config.work_dir.join("ccache"))?;
        cleaned |= remove_dir(&config.work_dir)?;
    }

    if cleaned {
        println!("Clean complete.");
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}

fn remove_dir(path: &std::path::Path) -> Result<bool> {
    if path.exists() {
        println!("Removing {}...", path.display());
        fs::remove_dir_all(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
