//! Retry policy for boundary transfers
//!
//! Exponential backoff with a cap and optional jitter. Only transient
//! failures are retried: timeouts, connection errors, HTTP 429 and 5xx.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

use super::drive::HttpStatusError;

/// Retry behaviour for remote transfers
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fewer, slower retries
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// More, faster retries (development)
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            jitter: true,
        }
    }

    /// Single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Classifies errors as worth retrying
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for anyhow::Error {
    fn is_retryable(&self) -> bool {
        self.chain().any(|cause| {
            if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
                return err.is_timeout()
                    || err.is_connect()
                    || err.status().is_some_and(|s| is_retryable_status(s.as_u16()));
            }
            if let Some(err) = cause.downcast_ref::<HttpStatusError>() {
                return is_retryable_status(err.status);
            }
            if let Some(err) = cause.downcast_ref::<std::io::Error>() {
                return matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                );
            }
            false
        })
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `retry` (1-based), before jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let factor = self.config.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.config.base_delay.as_millis() as f64 * factor)
            .min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        let scale: f64 = rand::rng().random_range(0.5..=1.0);
        delay.mul_f64(scale)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let delay = self.jittered(self.delay_for(attempt));
                    log::warn!(
                        "{} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        label,
                        attempt,
                        max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    log::debug!("{} failed after {} attempt(s)", label, attempt);
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::default().max_attempts, 3);
        assert_eq!(RetryConfig::conservative().max_attempts, 2);
        assert_eq!(RetryConfig::aggressive().max_attempts, 5);
        assert_eq!(RetryConfig::disabled().max_attempts, 1);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }

    #[test]
    fn test_error_classification() {
        let throttled = anyhow::Error::new(HttpStatusError {
            status: 429,
            message: "rate limited".into(),
        })
        .context("GET file");
        assert!(throttled.is_retryable());

        let missing = anyhow::Error::new(HttpStatusError {
            status: 404,
            message: "not found".into(),
        });
        assert!(!missing.is_retryable());

        let timeout = anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(timeout.is_retryable());
        assert!(!anyhow::anyhow!("bad input").is_retryable());
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(fast(3));

        let result = policy
            .execute("download", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::Error::new(HttpStatusError {
                            status: 503,
                            message: "unavailable".into(),
                        }))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(fast(5));

        let result: Result<()> = policy
            .execute("upload", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("forbidden")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(fast(2));

        let result: Result<()> = policy
            .execute("find", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(anyhow::Error::new(std::io::Error::from(
                        std::io::ErrorKind::TimedOut,
                    )))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
