//! Debian package construction.
//!
//! Three installable units come out of the pipeline: the kernel package
//! (image + dtb + modules), board firmware, and the audio support
//! payload. Each is staged into a private root, given a control record
//! whose Version is patched to the derived kernel release, and built
//! with dpkg-deb.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{DEVICE, TARGET_ARCH};
use crate::process::Cmd;

/// A finished package archive.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub component: String,
    pub version: String,
    pub arch: String,
    pub path: PathBuf,
}

/// Package name for a component: `<component>-<device>`.
pub fn package_name(component: &str) -> String {
    format!("{}-{}", component, DEVICE)
}

/// Archive filename: `<component>-<device>_<version>_<arch>.deb`.
pub fn package_filename(component: &str, version: &str) -> String {
    format!("{}_{}_{}.deb", package_name(component), version, TARGET_ARCH)
}

/// Control record template for a component. Version starts as a
/// placeholder and is patched before the archive is built.
pub fn control_template(component: &str, description: &str) -> String {
    format!(
        "Package: {name}\n\
         Version: 0.0.0\n\
         Architecture: {arch}\n\
         Maintainer: rockbuilder <builder@localhost>\n\
         Priority: optional\n\
         Section: kernel\n\
         Description: {description}\n",
        name = package_name(component),
        arch = TARGET_ARCH,
        description = description,
    )
}

/// Rewrite the Version field of a control record.
///
/// The derived kernel release is the only legitimate version for these
/// packages; whatever the template carried is discarded.
pub fn patch_control_version(content: &str, version: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut patched = false;
    for line in content.lines() {
        if line.starts_with("Version:") {
            out.push_str(&format!("Version: {}", version));
            patched = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !patched {
        out.push_str(&format!("Version: {}\n", version));
    }
    out
}

/// Read the Version field back out of a control record.
pub fn control_version(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
}

/// Create a fresh staging root for one package.
pub fn create_staging_root(work_dir: &Path, component: &str) -> Result<PathBuf> {
    let staging = work_dir.join("staging/packages").join(component);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("Clearing staging root {}", staging.display()))?;
    }
    fs::create_dir_all(staging.join("DEBIAN"))?;
    Ok(staging)
}

/// Write the patched control record into a staging root.
pub fn write_control(staging: &Path, component: &str, description: &str, version: &str) -> Result<()> {
    let control = patch_control_version(&control_template(component, description), version);
    fs::write(staging.join("DEBIAN/control"), control)
        .with_context(|| format!("Writing control file for {}", component))?;
    Ok(())
}

/// Build the archive from a staging root.
pub fn build_deb(staging: &Path, output_dir: &Path, component: &str, version: &str) -> Result<BuiltPackage> {
    fs::create_dir_all(output_dir)?;
    let out_path = output_dir.join(package_filename(component, version));

    Cmd::new("dpkg-deb")
        .args(["--build", "--root-owner-group"])
        .arg_path(staging)
        .arg_path(&out_path)
        .error_msg(format!("dpkg-deb failed for {}", package_name(component)))
        .run()?;

    if !out_path.exists() {
        bail!("dpkg-deb reported success but {} is missing", out_path.display());
    }

    println!("  Built {}", out_path.display());
    Ok(BuiltPackage {
        component: component.to_string(),
        version: version.to_string(),
        arch: TARGET_ARCH.to_string(),
        path: out_path,
    })
}

/// Copy a directory tree into a staging root, preserving layout.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<u64> {
    let mut files = 0;
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("Walking {}", source.display()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields children of its root");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            let link = fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            // Rebuilding the link rather than copying keeps module trees
            // (full of build/source symlinks) intact.
            std::os::unix::fs::symlink(&link, &target).or_else(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;
            files += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Copying {}", entry.path().display()))?;
            files += 1;
        }
    }
    Ok(files)
}

/// Write the placeholder that stands in for a missing device tree blob.
///
/// An empty dtb would be worse than none; the placeholder is clearly
/// marked so a flashing tool or human can spot it.
pub fn write_placeholder_dtb(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"PLACEHOLDER-DTB: real blob was not produced by this build\n")
        .with_context(|| format!("Writing placeholder dtb {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_filename() {
        assert_eq!(
            package_filename("linux", "6.18.0-rc3-rock5b+"),
            "linux-rock5b_6.18.0-rc3-rock5b+_arm64.deb"
        );
    }

    #[test]
    fn test_patch_control_version_replaces() {
        let template = control_template("linux", "Rock 5B kernel");
        let patched = patch_control_version(&template, "6.18.0-rock5b");
        assert_eq!(control_version(&patched).unwrap(), "6.18.0-rock5b");
        assert!(!patched.contains("0.0.0"));
        // Everything else survives untouched.
        assert!(patched.contains("Package: linux-rock5b"));
        assert!(patched.contains("Architecture: arm64"));
    }

    #[test]
    fn test_patch_control_version_appends_when_absent() {
        let patched = patch_control_version("Package: x\n", "1.2.3");
        assert_eq!(control_version(&patched).unwrap(), "1.2.3");
    }

    #[test]
    fn test_copy_tree_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/file.txt"), "x").unwrap();
        fs::write(src.join("top.txt"), "y").unwrap();

        let copied = copy_tree(&src, &dst).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("a/b/file.txt")).unwrap(), "x");
        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "y");
    }
}
