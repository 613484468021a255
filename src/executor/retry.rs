//! Retry policy for provider calls.
//!
//! Only [`ProviderError::Transient`] failures are retried. Each attempt runs
//! under a deadline; a missed deadline counts as a transient failure.

use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineSettings;
use crate::error::{ProviderError, ProviderResult};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Builds a retry policy from manifest settings.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.backoff_multiplier.max(1.0),
            jitter: true,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub const fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Returns the delay before retry number `retry` (zero-based), ignoring
    /// any provider hint.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let cap = self.max_delay.as_secs_f64();
        let grown = (base * self.multiplier.powi(exponent)).min(cap);

        let seconds = if self.jitter {
            (grown + grown * 0.25 * jitter_fraction()).min(cap)
        } else {
            grown
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(self.max_delay)
    }
}

/// Pseudo-random fraction in `[0, 1)` from the clock.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Outcome of a retried call.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result.
    pub result: ProviderResult<T>,
    /// Number of attempts made.
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// attempts.
///
/// The delay before a retry is the larger of the computed backoff and the
/// provider's retry-after hint. No retry is started once `cancel` fires.
pub async fn retry_call<T, F, Fut>(
    config: &RetryConfig,
    timeout: Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(timeout)),
        };

        let error = match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) if error.is_retryable() && attempts < config.max_attempts => error,
            Err(error) => {
                return Attempted {
                    result: Err(error),
                    attempts,
                };
            }
        };

        let backoff = config.delay_for(attempts - 1);
        let delay = error.retry_after().map_or(backoff, |hint| hint.max(backoff));
        warn!(
            attempt = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying after transient failure: {error}"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {
                debug!("Cancelled while waiting to retry");
                return Attempted {
                    result: Err(error),
                    attempts,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();
        let delay = config.delay_for(0);
        assert!(delay >= Duration::from_millis(500));
        assert!(delay <= Duration::from_millis(625));
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: true,
        };
        for retry in 0..12 {
            assert!(config.delay_for(retry) <= Duration::from_millis(500));
        }
        assert!(config.delay_for(9) >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = retry_call(&fast(), Duration::from_secs(5), &CancellationToken::new(), || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::transient("throttled"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let outcome: Attempted<()> =
            retry_call(&fast(), Duration::from_secs(5), &CancellationToken::new(), || async {
                Err(ProviderError::permanent("invalid cidr"))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(ProviderError::Permanent { .. })));
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let outcome: Attempted<()> = retry_call(
            &fast().with_max_attempts(2),
            Duration::from_secs(5),
            &CancellationToken::new(),
            || async { Err(ProviderError::transient("busy")) },
        )
        .await;

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let outcome: Attempted<()> = retry_call(
            &fast().with_max_attempts(2),
            Duration::from_millis(50),
            &CancellationToken::new(),
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
        )
        .await;

        assert_eq!(outcome.attempts, 2);
        let err = outcome.result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: Attempted<()> = retry_call(
            &RetryConfig::default().with_jitter(false),
            Duration::from_secs(5),
            &cancel,
            || async { Err(ProviderError::transient("busy")) },
        )
        .await;

        assert_eq!(outcome.attempts, 1);
    }
}
