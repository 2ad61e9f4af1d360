//! Kernel cross-compilation for the Rock 5B.
//!
//! Fetches the vendor tree at the branch matching the requested version,
//! configures it from defconfig plus the board fragment, and builds
//! Image, dtbs and modules with the arm64 cross toolchain. The release
//! string the build derives (`make kernelrelease`) is authoritative for
//! every downstream consumer; the requested version is only used to pick
//! the branch.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ccache::ToolchainCache;
use crate::config::{BuildConfig, CROSS_COMPILE, DTB_NAME};
use crate::process::{ensure_nonempty, Cmd};
use crate::retry;

/// Board config fragment, applied on top of the arm64 defconfig.
pub const CONFIG_FRAGMENT_NAME: &str = "kconfig-rock5b.config";

/// Everything the kernel build hands to later stages.
#[derive(Debug, Clone)]
pub struct KernelArtifactSet {
    /// The kernel image (arch/arm64/boot/Image). Always present.
    pub image: PathBuf,
    /// The board device tree blob. Missing is tolerated; downstream
    /// substitutes a placeholder.
    pub dtb: Option<PathBuf>,
    /// Staged module tree (lib/modules/<release> lives under here).
    pub modules_dir: PathBuf,
    /// Derived release string, e.g. "6.18.0-rc3-rock5b+". Authoritative
    /// over the requested version for all naming.
    pub release: String,
}

/// Fetch the kernel source: shallow clone of the one branch matching the
/// requested version. Reuses an existing checkout.
pub fn fetch_source(config: &BuildConfig) -> Result<PathBuf> {
    let dest = config.kernel_source_dir();
    if dest.join("Makefile").exists() {
        println!("  [SKIP] Kernel source already present: {}", dest.display());
        return Ok(dest);
    }

    let branch = config.kernel_branch();
    println!("  Cloning kernel source (branch {})...", branch);
    println!("    URL: {}", config.kernel_git_url);

    fs::create_dir_all(&config.work_dir)?;
    retry::retry_default("kernel source clone", || {
        // A failed attempt can leave a partial checkout behind.
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        Cmd::new("git")
            .args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(&branch)
            .arg(&config.kernel_git_url)
            .arg_path(&dest)
            .error_msg(format!("git clone of branch '{}' failed", branch))
            .run()?;
        Ok(())
    })?;

    if !dest.join("Makefile").exists() {
        bail!("Cloned kernel source is invalid (no Makefile)");
    }

    println!(
        "    Source version: {}",
        makefile_version(&dest).unwrap_or_else(|_| "unknown".to_string())
    );
    Ok(dest)
}

/// Read "VERSION.PATCHLEVEL.SUBLEVEL" out of the top-level Makefile.
pub fn parse_makefile_version(content: &str) -> Result<String> {
    let mut version = String::new();
    let mut patchlevel = String::new();
    let mut sublevel = String::new();

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("VERSION = ") {
            version = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("PATCHLEVEL = ") {
            patchlevel = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("SUBLEVEL = ") {
            sublevel = v.trim().to_string();
        }
    }

    if version.is_empty() {
        bail!("Could not parse kernel version from Makefile");
    }
    Ok(format!("{}.{}.{}", version, patchlevel, sublevel))
}

fn makefile_version(source: &Path) -> Result<String> {
    let content = fs::read_to_string(source.join("Makefile"))?;
    parse_makefile_version(&content)
}

/// Configure the kernel: defconfig base, board fragment on top, then
/// olddefconfig to resolve dependencies. Skipped when the fragment is
/// unchanged since the last run.
pub fn configure(config: &BuildConfig, base_dir: &Path) -> Result<()> {
    let build_dir = config.kernel_build_dir();
    fs::create_dir_all(&build_dir)?;

    let fragment_path = base_dir.join(CONFIG_FRAGMENT_NAME);
    if !fragment_path.exists() {
        bail!(
            "Board config fragment not found at {}\nExpected {} in the project root.",
            fragment_path.display(),
            CONFIG_FRAGMENT_NAME
        );
    }
    let fragment = fs::read_to_string(&fragment_path)
        .with_context(|| format!("Failed to read {}", fragment_path.display()))?;

    let config_path = build_dir.join(".config");
    let hash_path = build_dir.join(".config.fragment-hash");

    let fragment_hash = {
        let mut hasher = Sha256::new();
        hasher.update(fragment.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    let unchanged = config_path.exists()
        && fs::read_to_string(&hash_path)
            .map(|cached| cached.trim() == fragment_hash)
            .unwrap_or(false);

    if unchanged {
        println!("  [SKIP] Config unchanged, reusing existing .config");
    } else {
        println!("  Generating base config from defconfig...");
        kernel_make(config, &["defconfig"])
            .error_msg("make defconfig failed")
            .run()?;

        println!("  Applying board config fragment...");
        let merged = apply_config_fragment(&fs::read_to_string(&config_path)?, &fragment);
        fs::write(&config_path, merged)?;

        fs::write(&hash_path, &fragment_hash)?;
    }

    // Run every time: the source tree may have grown new options since
    // .config was generated, and olddefconfig answers them silently.
    println!("  Resolving config dependencies...");
    kernel_make(config, &["olddefconfig"])
        .error_msg("make olddefconfig failed")
        .run()?;

    Ok(())
}

/// Merge a config fragment into .config contents.
///
/// Each fragment line either replaces the existing setting for that
/// option or is appended. Handles both `CONFIG_FOO=...` and
/// `# CONFIG_FOO is not set` forms.
pub fn apply_config_fragment(existing: &str, fragment: &str) -> String {
    let mut lines: Vec<String> = existing.lines().map(String::from).collect();

    for frag_line in fragment.lines() {
        let frag_line = frag_line.trim();
        if frag_line.is_empty() {
            continue;
        }
        let Some(option) = config_option_name(frag_line) else {
            continue;
        };

        let mut replaced = false;
        for line in lines.iter_mut() {
            if config_option_name(line) == Some(option.clone()) {
                *line = frag_line.to_string();
                replaced = true;
                break;
            }
        }
        if !replaced {
            lines.push(frag_line.to_string());
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Extract the CONFIG_* name a line sets or unsets.
fn config_option_name(line: &str) -> Option<String> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("# ") {
        let rest = rest.strip_suffix(" is not set")?;
        if rest.starts_with("CONFIG_") {
            return Some(rest.to_string());
        }
        return None;
    }
    if line.starts_with("CONFIG_") {
        return line.split('=').next().map(String::from);
    }
    None
}

/// Compile Image, dtbs and modules.
///
/// The job count is bounded by the host core count; this fork/join
/// fan-out inside make is the only parallelism in the whole pipeline.
pub fn build(config: &BuildConfig, cache: Option<&ToolchainCache>) -> Result<()> {
    let cpus = match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            eprintln!("  [WARN] Could not detect CPU count ({}), using 4 cores", e);
            4
        }
    };
    let jobs_arg = format!("-j{}", cpus);

    println!("  Building kernel ({} jobs)...", cpus);
    let mut cmd = kernel_make_with_cache(config, cache, &[&jobs_arg, "Image", "dtbs", "modules"])
        .error_msg("Kernel build failed");
    if let Some(cache) = cache {
        cmd = cmd.env_var("CCACHE_DIR", cache.cache_dir().to_string_lossy());
    }
    cmd.run_interactive()?;
    Ok(())
}

/// Ask the build tree for the release string it actually produced.
///
/// This can legitimately differ from the requested version ("6.18"
/// requested, "6.18.0-rc3-rock5b+" produced) and is what every
/// downstream name must use.
pub fn kernel_release(config: &BuildConfig) -> Result<String> {
    let result = kernel_make(config, &["-s", "kernelrelease"])
        .error_msg("make kernelrelease failed")
        .run()?;
    let release = result.stdout_trimmed().lines().last().unwrap_or("").trim().to_string();
    if release.is_empty() {
        bail!("make kernelrelease produced no output");
    }
    Ok(release)
}

/// Install modules into a private staging tree; returns the staging root.
pub fn install_modules(config: &BuildConfig) -> Result<PathBuf> {
    let staging = config.work_dir.join("staging/modules");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    println!("  Installing modules...");
    let mod_path_arg = format!("INSTALL_MOD_PATH={}", staging.display());
    kernel_make(config, &[&mod_path_arg, "modules_install"])
        .error_msg("make modules_install failed")
        .run()?;
    Ok(staging)
}

/// Verify build outputs and assemble the artifact set.
///
/// The kernel image must exist and be non-empty; the dtb is best-effort.
pub fn verify_artifacts(config: &BuildConfig, modules_dir: PathBuf, release: String) -> Result<KernelArtifactSet> {
    let build_dir = config.kernel_build_dir();
    let image = build_dir.join("arch/arm64/boot/Image");
    ensure_nonempty(&image, "Kernel image")?;

    let dtb_path = build_dir
        .join("arch/arm64/boot/dts/rockchip")
        .join(DTB_NAME);
    let dtb = if dtb_path.exists() {
        Some(dtb_path)
    } else {
        eprintln!(
            "  [WARN] Device tree blob not found at {} - downstream will use a placeholder",
            dtb_path.display()
        );
        None
    };

    Ok(KernelArtifactSet {
        image,
        dtb,
        modules_dir,
        release,
    })
}

fn kernel_make(config: &BuildConfig, targets: &[&str]) -> Cmd {
    kernel_make_with_cache(config, None, targets)
}

fn kernel_make_with_cache(
    config: &BuildConfig,
    cache: Option<&ToolchainCache>,
    targets: &[&str],
) -> Cmd {
    let source = config.kernel_source_dir();
    let build_dir = config.kernel_build_dir();
    let cross = match cache {
        Some(cache) => cache.cross_compile_value(),
        None => CROSS_COMPILE.to_string(),
    };
    Cmd::new("make")
        .arg("-C")
        .arg_path(&source)
        .arg(format!("O={}", build_dir.display()))
        .arg("ARCH=arm64")
        .arg(format!("CROSS_COMPILE={}", cross))
        .args(targets.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_makefile_version() {
        let makefile = "VERSION = 6\nPATCHLEVEL = 18\nSUBLEVEL = 0\nEXTRAVERSION = -rc3\n";
        assert_eq!(parse_makefile_version(makefile).unwrap(), "6.18.0");
    }

    #[test]
    fn test_parse_makefile_version_missing() {
        assert!(parse_makefile_version("NAME = Baby Opossum Posse\n").is_err());
    }

    #[test]
    fn test_fragment_replaces_existing_option() {
        let existing = "CONFIG_A=y\nCONFIG_B=m\n# CONFIG_C is not set\n";
        let fragment = "CONFIG_B=y\nCONFIG_C=y\n";
        let merged = apply_config_fragment(existing, fragment);
        assert!(merged.contains("CONFIG_A=y"));
        assert!(merged.contains("CONFIG_B=y"));
        assert!(!merged.contains("CONFIG_B=m"));
        assert!(merged.contains("CONFIG_C=y"));
        assert!(!merged.contains("# CONFIG_C is not set"));
    }

    #[test]
    fn test_fragment_appends_new_option() {
        let merged = apply_config_fragment("CONFIG_A=y\n", "CONFIG_NEW=y\n");
        assert!(merged.contains("CONFIG_A=y"));
        assert!(merged.contains("CONFIG_NEW=y"));
    }

    #[test]
    fn test_fragment_can_unset_option() {
        let merged = apply_config_fragment("CONFIG_A=y\n", "# CONFIG_A is not set\n");
        assert!(merged.contains("# CONFIG_A is not set"));
        assert!(!merged.contains("CONFIG_A=y"));
    }

    #[test]
    fn test_option_name_extraction() {
        assert_eq!(config_option_name("CONFIG_FOO=y"), Some("CONFIG_FOO".into()));
        assert_eq!(
            config_option_name("# CONFIG_BAR is not set"),
            Some("CONFIG_BAR".into())
        );
        assert_eq!(config_option_name("# just a comment"), None);
        assert_eq!(config_option_name(""), None);
    }
}
