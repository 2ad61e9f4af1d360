//! Base distribution tarball download.
//!
//! Fetches the minimal base rootfs tarball with curl and verifies its
//! SHA256 against the published checksum file. Network failures retry
//! through the shared policy.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Distro;
use crate::process::Cmd;
use crate::retry;

/// Connect timeout for curl, in seconds. The original tooling ran with
/// none; a stuck TCP connect should not hang the whole pipeline.
const CONNECT_TIMEOUT_SECS: u32 = 30;

/// Fetch the base tarball for `distro` into `downloads_dir`.
///
/// Returns the local path. An already-present tarball is reused as-is;
/// the checksum was verified when it arrived and a corrupt tarball would
/// have been deleted then.
pub fn fetch_base_tarball(downloads_dir: &Path, distro: Distro) -> Result<PathBuf> {
    let dest = downloads_dir.join(distro.base_tarball_name());
    if dest.exists() {
        println!(
            "  [SKIP] Base tarball already present: {}",
            dest.display()
        );
        return Ok(dest);
    }

    fs::create_dir_all(downloads_dir)
        .with_context(|| format!("Creating {}", downloads_dir.display()))?;

    let url = distro.base_tarball_url();
    println!("  Downloading {} base tarball...", distro);
    println!("    URL: {}", url);

    retry::retry_default("base tarball download", || {
        download_file(&url, &dest)
    })?;

    // Published checksum lives next to the tarball on the mirror.
    let sha_url = format!("{}.sha256", url);
    match retry::retry_default("checksum download", || fetch_text(&sha_url)) {
        Ok(body) => {
            let expected = body
                .split_whitespace()
                .next()
                .context("Empty checksum file")?
                .to_string();
            verify_sha256(&dest, &expected)?;
        }
        Err(e) => {
            // Some mirrors publish no per-file checksum. Not worth
            // failing the build over; the tarball still has to survive
            // tar extraction.
            eprintln!("  [WARN] No checksum available for base tarball: {:#}", e);
        }
    }

    println!("  Downloaded to {}", dest.display());
    Ok(dest)
}

/// Download a single file with curl.
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let partial = dest.with_extension("part");
    Cmd::new("curl")
        .args([
            "-L",
            "--fail",
            "--connect-timeout",
            &CONNECT_TIMEOUT_SECS.to_string(),
            "-o",
        ])
        .arg_path(&partial)
        .arg(url)
        .error_msg(format!("curl failed for {}", url))
        .run()?;
    fs::rename(&partial, dest)
        .with_context(|| format!("Moving {} into place", dest.display()))?;
    Ok(())
}

/// Fetch a small text resource (checksum files).
fn fetch_text(url: &str) -> Result<String> {
    let result = Cmd::new("curl")
        .args([
            "-L",
            "--fail",
            "-s",
            "--connect-timeout",
            &CONNECT_TIMEOUT_SECS.to_string(),
        ])
        .arg(url)
        .error_msg(format!("curl failed for {}", url))
        .run()?;
    Ok(result.stdout)
}

/// Verify the SHA256 of a downloaded file; deletes it on mismatch.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    println!("  Verifying SHA256 checksum...");
    let actual = sha256_file(path)?;

    if !actual.eq_ignore_ascii_case(expected) {
        fs::remove_file(path).ok();
        bail!(
            "Checksum mismatch for {}!\n  Expected: {}\n  Got: {}\n\
             The download may be corrupted. Deleted partial file.",
            path.display(),
            expected,
            actual
        );
    }

    println!("  Checksum verified OK");
    Ok(())
}

/// SHA256 of a file's contents, hex-encoded.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)
        .with_context(|| format!("Opening {} for hashing", path.display()))?;
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Hashing {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_file_known_value() {
        let dir = std::env::temp_dir().join("rockbuilder-sha-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("abc.txt");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_verify_sha256_mismatch_deletes_file() {
        let dir = std::env::temp_dir().join("rockbuilder-sha-mismatch");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.bin");
        fs::write(&path, "payload").unwrap();
        let err = verify_sha256(&path, "00".repeat(32).as_str()).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
        assert!(!path.exists());
        fs::remove_dir_all(&dir).ok();
    }
}
