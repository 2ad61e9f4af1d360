//! Compiler-output cache wrapping the cross-compiler.
//!
//! ccache is transparent to build semantics; it only changes elapsed
//! time. We snapshot its hit/miss counters around the kernel compile so
//! the final report can show what the cache bought us.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CROSS_COMPILE;
use crate::process::Cmd;

/// Aggregate ccache counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Counters accumulated between `earlier` and `self`.
    pub fn since(&self, earlier: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits.saturating_sub(earlier.hits),
            misses: self.misses.saturating_sub(earlier.misses),
        }
    }

    /// Hit rate in percent, or None if nothing was compiled.
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 * 100.0 / total as f64)
        }
    }
}

/// Parse `ccache -s` output into counters.
///
/// Handles both the ccache 4.x summary ("Hits: 123 / 200 (61.5%)",
/// "Misses: 77") and the legacy 3.x table ("cache hit (direct) 123").
pub fn parse_stats(output: &str) -> CacheStats {
    let mut stats = CacheStats::default();
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Hits:") {
            if let Some(n) = first_integer(rest) {
                stats.hits = n;
            }
        } else if let Some(rest) = line.strip_prefix("Misses:") {
            if let Some(n) = first_integer(rest) {
                stats.misses = n;
            }
        } else if line.starts_with("cache hit (direct)")
            || line.starts_with("cache hit (preprocessed)")
        {
            if let Some(n) = last_integer(line) {
                stats.hits += n;
            }
        } else if line.starts_with("cache miss") {
            if let Some(n) = last_integer(line) {
                stats.misses += n;
            }
        }
    }
    stats
}

fn first_integer(s: &str) -> Option<u64> {
    s.split_whitespace().find_map(|tok| tok.parse().ok())
}

fn last_integer(s: &str) -> Option<u64> {
    s.split_whitespace().rev().find_map(|tok| tok.parse().ok())
}

/// The toolchain cache, ready for use by the kernel build.
pub struct ToolchainCache {
    cache_dir: PathBuf,
}

impl ToolchainCache {
    /// Prepare the cache under `work_dir`.
    ///
    /// Returns `None` when caching is off or ccache is unusable and the
    /// caller did not explicitly ask for it. An explicit request with an
    /// unusable cache is an error: silently building cold when the user
    /// asked for caching hides a one-hour surprise.
    pub fn init(work_dir: &Path, requested: bool) -> Result<Option<Self>> {
        if !requested {
            return Ok(None);
        }

        if which::which("ccache").is_err() {
            bail!("ccache requested but not found on host. Install ccache or pass --no-cache.");
        }

        let cache_dir = work_dir.join("ccache");
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            bail!(
                "ccache requested but cache directory {} is not writable: {}",
                cache_dir.display(),
                e
            );
        }

        Ok(Some(Self { cache_dir }))
    }

    /// Best-effort variant for callers that treat the cache as optional.
    pub fn init_optional(work_dir: &Path) -> Option<Self> {
        if which::which("ccache").is_err() {
            eprintln!("  [WARN] ccache not found, building without compiler cache");
            return None;
        }
        let cache_dir = work_dir.join("ccache");
        match fs::create_dir_all(&cache_dir) {
            Ok(()) => Some(Self { cache_dir }),
            Err(e) => {
                eprintln!(
                    "  [WARN] ccache directory {} not writable ({}), building cold",
                    cache_dir.display(),
                    e
                );
                None
            }
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `CROSS_COMPILE` value that routes compiler invocations through
    /// ccache. Make accepts a multi-word value here.
    pub fn cross_compile_value(&self) -> String {
        format!("ccache {}", CROSS_COMPILE)
    }

    /// Snapshot the current counters.
    pub fn stats(&self) -> Result<CacheStats> {
        let result = Cmd::new("ccache")
            .arg("-s")
            .env_var("CCACHE_DIR", self.cache_dir.to_string_lossy())
            .error_msg("ccache -s failed")
            .run()
            .context("Querying ccache statistics")?;
        Ok(parse_stats(&result.stdout))
    }

    /// Print the delta between two snapshots.
    pub fn report(&self, before: &CacheStats, after: &CacheStats) {
        let delta = after.since(before);
        match delta.hit_rate() {
            Some(rate) => println!(
                "  ccache: {} hits, {} misses ({:.1}% hit rate)",
                delta.hits, delta.misses, rate
            ),
            None => println!("  ccache: no compilations recorded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modern_format() {
        let out = "\
Cacheable calls:    200 /  210 (95.2%)
  Hits:             123 /  200 (61.5%)
    Direct:         100 /  123 (81.3%)
    Preprocessed:    23 /  123 (18.7%)
  Misses:            77 /  200 (38.5%)
";
        let stats = parse_stats(out);
        assert_eq!(stats.hits, 123);
        assert_eq!(stats.misses, 77);
    }

    #[test]
    fn test_parse_legacy_format() {
        let out = "\
cache directory                     /tmp/ccache
cache hit (direct)                   100
cache hit (preprocessed)              23
cache miss                            77
";
        let stats = parse_stats(out);
        assert_eq!(stats.hits, 123);
        assert_eq!(stats.misses, 77);
    }

    #[test]
    fn test_delta_and_hit_rate() {
        let before = CacheStats { hits: 10, misses: 5 };
        let after = CacheStats {
            hits: 110,
            misses: 105,
        };
        let delta = after.since(&before);
        assert_eq!(delta, CacheStats { hits: 100, misses: 100 });
        assert_eq!(delta.hit_rate(), Some(50.0));
        assert_eq!(CacheStats::default().hit_rate(), None);
    }

    #[test]
    fn test_init_disabled_is_none() {
        let result = ToolchainCache::init(Path::new("/nonexistent"), false).unwrap();
        assert!(result.is_none());
    }
}
