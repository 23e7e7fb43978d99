//! Exponential backoff for rate-limited providers
//!
//! Only [`ProviderError::RateLimited`] is retried against the same provider;
//! every other failure is returned at once so the caller can fall through to
//! the next provider in the chain.

use crate::config::BackoffConfig;
use crate::error::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy built from [`BackoffConfig`]
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    /// Create a policy from configuration
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(BackoffConfig {
            max_retries: 0,
            ..BackoffConfig::default()
        })
    }

    /// Maximum number of retries
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Un-jittered delay before retry `attempt` (1-based), capped at `max_delay`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let millis = self.config.base_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry `attempt`, with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.config.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.config.jitter;
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        base.mul_f64(factor).min(self.config.max_delay)
    }

    /// Run `operation`, retrying while it reports `RateLimited`
    pub async fn retry_rate_limited<F, Fut, T>(
        &self,
        provider: &str,
        mut operation: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Err(ProviderError::RateLimited { detail, .. }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        provider,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        detail = %detail,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => {
                    if attempt > 0 && other.is_ok() {
                        debug!(provider, retries = attempt, "Succeeded after backoff");
                    }
                    return other;
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            max_retries: 3,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let backoff = Backoff::new(no_jitter());
        assert_eq!(backoff.base_delay_for(0), Duration::ZERO);
        assert_eq!(backoff.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.base_delay_for(2), Duration::from_millis(200));
        // capped
        assert_eq!(backoff.base_delay_for(3), Duration::from_millis(350));
        assert_eq!(backoff.base_delay_for(30), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::new(BackoffConfig {
            jitter: 0.25,
            max_delay: Duration::from_secs(10),
            ..no_jitter()
        });
        for _ in 0..100 {
            let d = backoff.delay_for(2);
            assert!(d >= Duration::from_millis(150) && d <= Duration::from_millis(250), "{d:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limited_then_succeeds() {
        let backoff = Backoff::new(no_jitter());
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let counter = calls.clone();
        let result = backoff
            .retry_rate_limited("finnhub", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::rate_limited("finnhub", "429"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff on the paused clock
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let backoff = Backoff::new(no_jitter());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = backoff
            .retry_rate_limited("finnhub", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::rate_limited("finnhub", "429")) }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let backoff = Backoff::new(no_jitter());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = backoff
            .retry_rate_limited("yahoo", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Timeout("yahoo".into())) }
            })
            .await;

        assert_eq!(result, Err(ProviderError::Timeout("yahoo".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
