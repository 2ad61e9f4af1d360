//! Shared retry policy for network operations.
//!
//! Every retryable operation (git clone, base tarball download, apt-get
//! update) goes through this one utility instead of growing its own loop.
//! Exhausting the attempts escalates the last error to the caller, which
//! treats it as fatal.

use anyhow::Result;
use std::time::Duration;

/// Default number of attempts for retryable network operations.
pub const DEFAULT_ATTEMPTS: u32 = 3;
/// Default delay before the first retry. Grows linearly per attempt.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// Run `op` up to `max_attempts` times.
///
/// The delay before attempt N is `delay * N`, so transient outages get a
/// little room to clear. Every failed attempt is logged with the label.
pub fn retry<T, F>(label: &str, max_attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    assert!(max_attempts >= 1, "retry needs at least one attempt");

    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let wait = delay * attempt;
                eprintln!(
                    "  [WARN] {} failed (attempt {}/{}): {:#}",
                    label, attempt, max_attempts, e
                );
                eprintln!("  Retrying in {:?}...", wait);
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "{} failed after {} attempts",
                    label, max_attempts
                )))
            }
        }
    }
}

/// Retry with the default policy.
pub fn retry_default<T, F>(label: &str, op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry(label, DEFAULT_ATTEMPTS, DEFAULT_DELAY, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Duration;

    #[test]
    fn test_succeeds_first_try() {
        let mut calls = 0;
        let result = retry("noop", 3, Duration::ZERO, || {
            calls += 1;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recovers_after_failures() {
        let mut calls = 0;
        let result = retry("flaky", 3, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                bail!("transient");
            }
            Ok("ok")
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhaustion_reports_attempts() {
        let mut calls = 0;
        let err = retry::<(), _>("doomed", 2, Duration::ZERO, || {
            calls += 1;
            bail!("still down");
        })
        .unwrap_err();
        assert_eq!(calls, 2);
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
