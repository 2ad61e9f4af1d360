//! Preflight checks: validate host tools before a build starts.
//!
//! A kernel build that dies an hour in because dpkg-deb was missing is
//! the worst possible failure mode; check everything up front.

use crate::cleanup::QEMU_STATIC;
use crate::config::CROSS_COMPILE;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
}

impl CheckResult {
    pub fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    pub fn warn_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let icon = match check.status {
                CheckStatus::Pass => "✓",
                CheckStatus::Fail => "✗",
                CheckStatus::Warn => "!",
            };
            match &check.details {
                Some(details) => println!("  {} {} - {}", icon, check.name, details),
                None => println!("  {} {}", icon, check.name),
            }
        }

        println!();
        if self.all_passed() {
            if self.warn_count() > 0 {
                println!("All required checks passed ({} warnings).", self.warn_count());
            } else {
                println!("All checks passed.");
            }
        } else {
            println!("{} check(s) failed. Fix these before building.", self.fail_count());
        }
    }
}

/// Run all host tool checks.
pub fn run_checks() -> PreflightReport {
    let mut checks = Vec::new();

    let cross_gcc = format!("{}gcc", CROSS_COMPILE);
    let required: &[(&str, &str, &str)] = &[
        ("git", "git", "Required to fetch the kernel source"),
        ("make", "make", "Required to build the kernel"),
        (cross_gcc.as_str(), "gcc-aarch64-linux-gnu", "Required to cross-compile for arm64"),
        ("dpkg-deb", "dpkg", "Required to build packages"),
        ("mkfs.ext4", "e2fsprogs", "Required to format the rootfs image"),
        ("mkfs.vfat", "dosfstools", "Required to format the boot image"),
        ("blkid", "util-linux", "Required to read the rootfs UUID"),
        ("mount", "util-linux", "Required for loopback and bind mounts"),
        ("chroot", "coreutils", "Required for in-target package installs"),
        ("tar", "tar", "Required to unpack the base distribution"),
        ("curl", "curl", "Required to download the base distribution"),
        ("xz", "xz-utils", "Required to compress the final image"),
    ];

    for (tool, package, purpose) in required {
        checks.push(check_tool(tool, package, purpose, true));
    }

    let optional: &[(&str, &str, &str)] = &[
        ("ccache", "ccache", "Speeds up kernel rebuilds"),
        (
            QEMU_STATIC,
            "qemu-user-static",
            "Required only when building on a non-arm64 host",
        ),
    ];

    for (tool, package, purpose) in optional {
        checks.push(check_tool(tool, package, purpose, false));
    }

    PreflightReport { checks }
}

fn check_tool(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.to_string_lossy()),
        Err(_) => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass_with("git", "/usr/bin/git"),
                CheckResult::warn("ccache", "not found"),
                CheckResult::fail("blkid", "not found"),
            ],
        };
        assert!(!report.all_passed());
        assert_eq!(report.fail_count(), 1);
        assert_eq!(report.warn_count(), 1);
    }

    #[test]
    fn test_all_passed_with_warnings() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass_with("git", "/usr/bin/git"),
                CheckResult::warn("ccache", "not found"),
            ],
        };
        assert!(report.all_passed());
    }
}
