//! Show command - configuration and build status.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::config::{BuildConfig, Overrides};
use crate::report::STATUS_FILE;

pub enum ShowTarget {
    Config,
    Status,
}

pub fn cmd_show(base_dir: &Path, target: ShowTarget, overrides: &Overrides) -> Result<()> {
    let config = BuildConfig::load(base_dir, overrides)?;
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Status => {
            let status_path = config.output_dir.join(STATUS_FILE);
            match fs::read_to_string(&status_path) {
                Ok(content) => print!("{}", content),
                Err(_) => println!("No build status yet ({} missing).", status_path.display()),
            }
        }
    }
    Ok(())
}
