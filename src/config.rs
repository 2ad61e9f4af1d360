//! Build configuration for rockbuilder.
//!
//! Settings resolve with precedence: explicit CLI argument > environment
//! variable (including `.env`) > compiled-in default. The result is one
//! immutable `BuildConfig` constructed at startup; stages only ever see
//! it by reference.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Fixed hardware target. The whole pipeline is specific to this board.
pub const DEVICE: &str = "rock5b";
/// Debian architecture string for the target.
pub const TARGET_ARCH: &str = "arm64";
/// Cross-compiler prefix for the target.
pub const CROSS_COMPILE: &str = "aarch64-linux-gnu-";
/// Device tree blob produced by the kernel build.
pub const DTB_NAME: &str = "rk3588-rock-5b.dtb";

/// Default kernel version to request.
pub const DEFAULT_KERNEL_VERSION: &str = "6.18";
/// Default git URL for the vendor kernel tree.
pub const DEFAULT_KERNEL_GIT_URL: &str = "https://github.com/radxa/kernel.git";
/// Branch naming convention: one branch per kernel version.
pub const DEFAULT_KERNEL_BRANCH_TEMPLATE: &str = "rk3588-{version}";
/// Default rootfs image size in MB.
pub const DEFAULT_ROOTFS_SIZE_MB: u64 = 4096;

/// Base distribution installed into the rootfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distro {
    Ubuntu,
    Debian,
}

impl Distro {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ubuntu" => Ok(Distro::Ubuntu),
            "debian" => Ok(Distro::Debian),
            other => bail!(
                "Unknown distribution '{}' (expected ubuntu or debian)",
                other
            ),
        }
    }

    /// Release series the base tarball is fetched for.
    pub fn series(&self) -> &'static str {
        match self {
            Distro::Ubuntu => "noble",
            Distro::Debian => "trixie",
        }
    }

    /// URL of the minimal base rootfs tarball.
    pub fn base_tarball_url(&self) -> String {
        match self {
            Distro::Ubuntu => format!(
                "https://cdimage.ubuntu.com/ubuntu-base/releases/{series}/release/ubuntu-base-24.04-base-{arch}.tar.gz",
                series = self.series(),
                arch = TARGET_ARCH
            ),
            Distro::Debian => format!(
                "https://deb.debian.org/base-images/{series}/debian-{series}-{arch}.tar.gz",
                series = self.series(),
                arch = TARGET_ARCH
            ),
        }
    }

    /// Local filename the base tarball is cached under.
    pub fn base_tarball_name(&self) -> String {
        format!("{}-{}-base-{}.tar.gz", self, self.series(), TARGET_ARCH)
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distro::Ubuntu => write!(f, "ubuntu"),
            Distro::Debian => write!(f, "debian"),
        }
    }
}

/// Explicit CLI overrides, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub kernel_version: Option<String>,
    pub distro: Option<String>,
    pub use_ccache: Option<bool>,
    pub rootfs_image: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Frozen build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Requested kernel version (e.g. "6.18"). The release string the
    /// build actually produces is authoritative downstream.
    pub kernel_version: String,
    /// Base distribution for the rootfs.
    pub distro: Distro,
    /// Whether to wrap the cross-compiler in ccache.
    pub use_ccache: bool,
    /// True when caching was requested explicitly (CLI flag or env var)
    /// rather than left at the default. Explicit requests make cache
    /// init failures fatal instead of degrading to a cold build.
    pub ccache_explicit: bool,
    /// Working directory for sources, staging and mounts.
    pub work_dir: PathBuf,
    /// Output directory for packages, images and reports.
    pub output_dir: PathBuf,
    /// Path of the rootfs image to create.
    pub rootfs_image: PathBuf,
    /// Rootfs image size in MB.
    pub rootfs_size_mb: u64,
    /// Git URL of the kernel tree.
    pub kernel_git_url: String,
    /// Branch template, `{version}` substituted with the requested version.
    pub kernel_branch_template: String,
}

impl BuildConfig {
    /// Resolve configuration from overrides, environment and defaults.
    ///
    /// A `.env` file in `base_dir` is honored; real environment variables
    /// win over it, explicit overrides win over both.
    pub fn load(base_dir: &Path, overrides: &Overrides) -> Result<Self> {
        let mut env_vars = read_env_file(&base_dir.join(".env"));
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        let kernel_version = overrides
            .kernel_version
            .clone()
            .or_else(|| env_vars.get("KERNEL_VERSION").cloned())
            .unwrap_or_else(|| DEFAULT_KERNEL_VERSION.to_string());

        let distro_str = overrides
            .distro
            .clone()
            .or_else(|| env_vars.get("DISTRO").cloned())
            .unwrap_or_else(|| "ubuntu".to_string());
        let distro = Distro::parse(&distro_str)?;

        let ccache_explicit =
            overrides.use_ccache.is_some() || env_vars.contains_key("USE_CCACHE");
        let use_ccache = match overrides.use_ccache {
            Some(v) => v,
            None => env_vars
                .get("USE_CCACHE")
                .map(|v| is_truthy(v))
                .unwrap_or(true),
        };

        let work_dir = path_setting(&env_vars, "WORK_DIR", base_dir, "work");
        let output_dir = overrides
            .output_dir
            .clone()
            .map(|p| absolutize(p, base_dir))
            .unwrap_or_else(|| path_setting(&env_vars, "OUTPUT_DIR", base_dir, "output"));

        let rootfs_image = overrides
            .rootfs_image
            .clone()
            .map(|p| absolutize(p, base_dir))
            .unwrap_or_else(|| {
                env_vars
                    .get("ROOTFS_IMAGE")
                    .map(|s| absolutize(PathBuf::from(s), base_dir))
                    .unwrap_or_else(|| output_dir.join(format!("{}-rootfs.img", DEVICE)))
            });

        let rootfs_size_mb = match env_vars.get("ROOTFS_SIZE_MB") {
            Some(s) => s
                .parse()
                .map_err(|_| anyhow::anyhow!("ROOTFS_SIZE_MB is not a number: '{}'", s))?,
            None => DEFAULT_ROOTFS_SIZE_MB,
        };

        let kernel_git_url = env_vars
            .get("KERNEL_GIT_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KERNEL_GIT_URL.to_string());

        let kernel_branch_template = env_vars
            .get("KERNEL_BRANCH_TEMPLATE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KERNEL_BRANCH_TEMPLATE.to_string());

        Ok(Self {
            kernel_version,
            distro,
            use_ccache,
            ccache_explicit,
            work_dir,
            output_dir,
            rootfs_image,
            rootfs_size_mb,
            kernel_git_url,
            kernel_branch_template,
        })
    }

    /// Branch to clone for the requested kernel version.
    pub fn kernel_branch(&self) -> String {
        self.kernel_branch_template
            .replace("{version}", &self.kernel_version)
    }

    /// Directory the kernel source is cloned into.
    pub fn kernel_source_dir(&self) -> PathBuf {
        self.work_dir.join("linux")
    }

    /// Out-of-tree kernel build directory.
    pub fn kernel_build_dir(&self) -> PathBuf {
        self.work_dir.join("kernel-build")
    }

    /// Directory for companion payloads (firmware, audio).
    ///
    /// These trees are provisioned by the operator, not fetched: drop
    /// the vendor firmware blobs under `payloads/firmware/` and the
    /// ALSA UCM profiles under `payloads/audio/` before a build. A
    /// missing or empty tree skips that package with a warning; only
    /// the kernel package is load-bearing.
    pub fn payload_dir(&self, component: &str) -> PathBuf {
        self.work_dir.join("payloads").join(component)
    }

    /// Print configuration for `show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  KERNEL_VERSION: {}", self.kernel_version);
        println!("  DISTRO: {}", self.distro);
        println!("  USE_CCACHE: {}", self.use_ccache);
        println!("  WORK_DIR: {}", self.work_dir.display());
        println!("  OUTPUT_DIR: {}", self.output_dir.display());
        println!("  ROOTFS_IMAGE: {}", self.rootfs_image.display());
        println!("  ROOTFS_SIZE_MB: {}", self.rootfs_size_mb);
        println!("  KERNEL_GIT_URL: {}", self.kernel_git_url);
        println!("  KERNEL_BRANCH: {}", self.kernel_branch());
        println!(
            "  PAYLOAD_DIRS: {} (operator-provided firmware/audio trees)",
            self.work_dir.join("payloads").display()
        );
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn absolutize(path: PathBuf, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn path_setting(
    env_vars: &HashMap<String, String>,
    key: &str,
    base_dir: &Path,
    default: &str,
) -> PathBuf {
    env_vars
        .get(key)
        .map(|s| absolutize(PathBuf::from(s), base_dir))
        .unwrap_or_else(|| base_dir.join(default))
}

/// Parse a `.env` file into a key/value map. Missing file is fine.
fn read_env_file(path: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let Ok(content) = fs::read_to_string(path) else {
        return vars;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(kernel_version: &str) -> BuildConfig {
        BuildConfig {
            kernel_version: kernel_version.into(),
            distro: Distro::Ubuntu,
            use_ccache: true,
            ccache_explicit: false,
            work_dir: "/tmp/w".into(),
            output_dir: "/tmp/o".into(),
            rootfs_image: "/tmp/o/r.img".into(),
            rootfs_size_mb: 4096,
            kernel_git_url: DEFAULT_KERNEL_GIT_URL.into(),
            kernel_branch_template: DEFAULT_KERNEL_BRANCH_TEMPLATE.into(),
        }
    }

    #[test]
    fn test_distro_parse() {
        assert_eq!(Distro::parse("Ubuntu").unwrap(), Distro::Ubuntu);
        assert_eq!(Distro::parse("debian").unwrap(), Distro::Debian);
        assert!(Distro::parse("arch").is_err());
    }

    #[test]
    fn test_distro_display_round_trips_through_parse() {
        for distro in [Distro::Ubuntu, Distro::Debian] {
            assert_eq!(Distro::parse(&distro.to_string()).unwrap(), distro);
        }
    }

    #[test]
    fn test_branch_template_substitution() {
        assert_eq!(minimal("6.18").kernel_branch(), "rk3588-6.18");
        assert_eq!(minimal("6.12").kernel_branch(), "rk3588-6.12");
    }

    #[test]
    fn test_payload_dir_is_per_component() {
        let config = minimal("6.18");
        assert_eq!(
            config.payload_dir("firmware"),
            PathBuf::from("/tmp/w/payloads/firmware")
        );
        assert_eq!(
            config.payload_dir("audio"),
            PathBuf::from("/tmp/w/payloads/audio")
        );
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("no"));
    }

    #[test]
    fn test_env_file_parsing() {
        let dir = std::env::temp_dir().join("rockbuilder-envtest");
        std::fs::create_dir_all(&dir).unwrap();
        let env_path = dir.join(".env");
        std::fs::write(
            &env_path,
            "# comment\nKERNEL_VERSION=\"6.12\"\n\nDISTRO='debian'\n",
        )
        .unwrap();
        let vars = read_env_file(&env_path);
        assert_eq!(vars.get("KERNEL_VERSION").unwrap(), "6.12");
        assert_eq!(vars.get("DISTRO").unwrap(), "debian");
        std::fs::remove_dir_all(&dir).ok();
    }
}
