//! Retry configuration, delay calculation, and the shared retry helper.
//!
//! Every upstream metadata call goes through [`with_retry()`], keeping the
//! retry policy in a single place. Cancellation is the caller dropping the
//! future; the backoff sleep is an await point, so a caller that gives up
//! never has a queued retry fire on its behalf.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::Result;
use crate::telemetry;

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff: `initial_delay * 2^attempt`, capped at
/// `max_delay`. With the defaults this is 1s, 2s, 4s.
///
/// ```rust
/// # use speculum::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the initial request. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Maximum delay between retries. Default: 60s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of additional attempts.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// Retries on transient errors (as classified by
/// [`SpeculumError::is_transient()`](crate::SpeculumError::is_transient))
/// up to `config.max_retries` additional times. Permanent errors are
/// returned immediately without retry.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                    .increment(1);
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpeculumError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::new()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn default_backoff_is_powers_of_two_seconds() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::new().max_delay(Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SpeculumError::Http("connection reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SpeculumError::UpstreamStatus {
                status: 503,
                url: "https://registry.example".into(),
            })
        })
        .await;
        assert!(matches!(
            result,
            Err(SpeculumError::UpstreamStatus { status: 503, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SpeculumError::UpstreamStatus {
                status: 403,
                url: "https://registry.example".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_config_makes_single_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryConfig::disabled(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SpeculumError::Http("timeout".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_caller_cancels_pending_retries() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new().max_retries(5);
        let outcome = tokio::time::timeout(
            Duration::from_millis(1500),
            with_retry(&config, "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SpeculumError::Http("connection refused".into()))
            }),
        )
        .await;
        assert!(outcome.is_err(), "timeout should win over the backoff");
        // Initial attempt plus the retry after the 1s backoff; the 2s backoff
        // is abandoned when the deadline fires.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
