//! Guarded provider calls
//!
//! Every call to an external dependency, data or model, goes through
//! [`ProviderGateway`]. The gateway consults the circuit breaker, applies the
//! per-call timeout, runs an optional validator over the result and records
//! the outcome in the shared [`HealthRegistry`].

use crate::enrichment::DataPoint;
use crate::error::ProviderError;
use crate::health::HealthRegistry;
use crate::providers::{Operation, Provider};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Circuit-breaking call wrapper
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    health: HealthRegistry,
}

impl ProviderGateway {
    /// Create a gateway over a health registry
    pub fn new(health: HealthRegistry) -> Self {
        Self { health }
    }

    /// Health registry shared with this gateway
    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Invoke a data provider operation
    pub async fn invoke(
        &self,
        provider: &dyn Provider,
        operation: &Operation,
        timeout: Duration,
    ) -> Result<DataPoint, ProviderError> {
        self.call(provider.name(), timeout, provider.invoke(operation))
            .await
    }

    /// Guarded call without result validation
    pub async fn call<T, F>(&self, name: &str, timeout: Duration, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        self.call_validated(name, timeout, call, |_| Ok(())).await
    }

    /// Guarded call whose result must pass `validate`
    ///
    /// A validator rejection is reported as [`ProviderError::ValidationFailure`]
    /// and counts as a provider failure.
    pub async fn call_validated<T, F, V>(
        &self,
        name: &str,
        timeout: Duration,
        call: F,
        validate: V,
    ) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
        V: FnOnce(&T) -> Result<(), String>,
    {
        let guard = self.health.acquire(name)?;

        let outcome = match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(ProviderError::Timeout(name.to_string())),
            Ok(Err(e)) => Err(e),
            Ok(Ok(value)) => validate(&value).map(|()| value).map_err(|detail| {
                ProviderError::ValidationFailure {
                    provider: name.to_string(),
                    detail,
                }
            }),
        };

        match &outcome {
            Ok(_) => guard.success(),
            Err(e) => {
                debug!(provider = name, error = %e, "Provider call failed");
                guard.failure(e);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::enrichment::{DataKind, Quote};
    use crate::health::CircuitState;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that replays scripted outcomes and counts real calls
    struct Scripted {
        outcomes: std::sync::Mutex<Vec<Result<f64, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<f64, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: std::sync::Mutex::new(outcomes.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn supports(&self, kind: DataKind) -> bool {
            kind == DataKind::Quote
        }

        async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop().unwrap_or(Ok(1.0));
            next.map(|price| DataPoint::Quote(Quote::new(operation.subject(), price)))
        }
    }

    fn quote_op() -> Operation {
        Operation::Quote {
            symbol: "AAPL".into(),
        }
    }

    fn gateway(threshold: u32) -> ProviderGateway {
        ProviderGateway::new(HealthRegistry::new(BreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_secs(30),
            half_open_trials: 1,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_and_fails_fast_without_io() {
        let gw = gateway(3);
        let provider = Scripted::new(vec![
            Err(ProviderError::unreachable("scripted", "down")),
            Err(ProviderError::unreachable("scripted", "down")),
            Err(ProviderError::unreachable("scripted", "down")),
        ]);

        for _ in 0..3 {
            assert!(gw.invoke(provider.as_ref(), &quote_op(), Duration::from_secs(1)).await.is_err());
        }
        assert_eq!(gw.health().state("scripted"), CircuitState::Open);

        let err = gw
            .invoke(provider.as_ref(), &quote_op(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::CircuitOpen("scripted".into()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_after_cooldown() {
        let gw = gateway(1);
        let provider = Scripted::new(vec![
            Err(ProviderError::Timeout("scripted".into())),
            Err(ProviderError::Timeout("scripted".into())),
            Ok(187.5),
        ]);
        let t = Duration::from_secs(1);

        assert!(gw.invoke(provider.as_ref(), &quote_op(), t).await.is_err());
        tokio::time::advance(Duration::from_secs(30)).await;

        // failed trial re-opens and restarts the cooldown
        assert!(gw.invoke(provider.as_ref(), &quote_op(), t).await.is_err());
        assert_eq!(gw.health().state("scripted"), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(
            gw.invoke(provider.as_ref(), &quote_op(), t).await,
            Err(ProviderError::CircuitOpen(_))
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        let value = gw.invoke(provider.as_ref(), &quote_op(), t).await.unwrap();
        assert!(matches!(value, DataPoint::Quote(q) if q.price == 187.5));
        let snapshot = gw.health().snapshot("scripted").unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_and_counted() {
        let gw = gateway(1);
        let result: Result<(), _> = gw
            .call("slow", Duration::from_millis(50), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(ProviderError::Timeout("slow".into())));
        assert_eq!(gw.health().state("slow"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_validation_failure_counts() {
        let gw = gateway(2);
        let result = gw
            .call_validated(
                "finnhub",
                Duration::from_secs(1),
                async { Ok(-3.0_f64) },
                |price| {
                    if *price > 0.0 {
                        Ok(())
                    } else {
                        Err(format!("implausible price {price}"))
                    }
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::ValidationFailure { ref detail, .. }) if detail.contains("-3")
        ));
        assert_eq!(gw.health().snapshot("finnhub").unwrap().consecutive_failures, 1);
    }
}
