//! Data provider capability trait and HTTP adapters
//!
//! The engine only sees [`Provider`]; each adapter translates one upstream
//! API into [`DataPoint`]s and classifies its failures into
//! [`ProviderError`]s.

use crate::enrichment::{DataKind, DataPoint};
use crate::error::ProviderError;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;

pub mod brave;
pub mod finnhub;
pub mod fred;
pub mod yahoo;

pub use brave::BraveSearchClient;
pub use finnhub::FinnhubClient;
pub use fred::FredClient;
pub use yahoo::YahooFinanceClient;

/// Operation requested from a provider, with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Latest quote for a symbol
    Quote {
        /// Ticker symbol
        symbol: String,
    },
    /// Daily history for a symbol
    Historical {
        /// Ticker symbol
        symbol: String,
        /// Days of history
        days: u32,
    },
    /// Latest observations of an economic series
    Indicator {
        /// Series id
        series_id: String,
        /// Observations wanted
        last_n: usize,
    },
    /// News search
    News {
        /// Search text or ticker
        query: String,
        /// Maximum headlines
        max_results: usize,
    },
}

impl Operation {
    /// Data kind this operation produces
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Quote { .. } => DataKind::Quote,
            Self::Historical { .. } => DataKind::Historical,
            Self::Indicator { .. } => DataKind::Indicator,
            Self::News { .. } => DataKind::News,
        }
    }

    /// Subject the result is keyed by
    pub fn subject(&self) -> &str {
        match self {
            Self::Quote { symbol } | Self::Historical { symbol, .. } => symbol,
            Self::Indicator { series_id, .. } => series_id,
            Self::News { query, .. } => query,
        }
    }
}

/// A source of market, economic or news data
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider name, also the circuit breaker key
    fn name(&self) -> &str;

    /// Whether this provider can serve a data kind
    fn supports(&self, kind: DataKind) -> bool;

    /// Whether this provider can serve this particular operation
    ///
    /// The cascade skips providers that decline, so a declined operation
    /// never counts against the provider's health.
    fn accepts(&self, operation: &Operation) -> bool {
        self.supports(operation.kind())
    }

    /// Perform one operation
    async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError>;
}

/// Client-side request limiter shared by clones of an adapter
pub(crate) type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Limiter allowing `per_minute` requests per minute (at least one)
pub(crate) fn rate_limiter(per_minute: u32) -> SharedRateLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Error for an operation the provider does not serve
pub(crate) fn unsupported(provider: &str, operation: &Operation) -> ProviderError {
    ProviderError::malformed(provider, format!("unsupported operation: {}", operation.kind()))
}

/// Send a GET request and decode JSON, classifying failures
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(provider, status, &body));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e))?;
    serde_json::from_str(&body).map_err(|e| ProviderError::malformed(provider, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_and_subject() {
        let op = Operation::Indicator {
            series_id: "DGS10".into(),
            last_n: 10,
        };
        assert_eq!(op.kind(), DataKind::Indicator);
        assert_eq!(op.subject(), "DGS10");

        let op = Operation::Historical {
            symbol: "NVDA".into(),
            days: 30,
        };
        assert_eq!(op.kind(), DataKind::Historical);
        assert_eq!(op.subject(), "NVDA");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory provider shared by engine tests

    use super::{Operation, Provider};
    use crate::enrichment::{DataKind, DataPoint, Indicator, NewsItem, Observation, Quote};
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers from fixed tables; anything unknown is a malformed response
    pub(crate) struct StaticProvider {
        name: &'static str,
        quotes: HashMap<String, Quote>,
        news: Vec<NewsItem>,
        indicators: HashMap<String, Indicator>,
        down: bool,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        pub(crate) fn new(name: &'static str) -> Self {
            Self {
                name,
                quotes: HashMap::new(),
                news: Vec::new(),
                indicators: HashMap::new(),
                down: false,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        /// Every call fails as unreachable
        pub(crate) fn down(name: &'static str) -> Self {
            Self {
                down: true,
                ..Self::new(name)
            }
        }

        /// Every call sleeps for `delay` first
        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn with_quote(mut self, symbol: &str, price: f64, change_percent: f64) -> Self {
            let previous = price / (1.0 + change_percent / 100.0);
            let mut quote = Quote::new(symbol, price).with_previous_close(previous);
            quote.change_percent = Some(change_percent);
            self.quotes.insert(symbol.to_string(), quote);
            self
        }

        pub(crate) fn with_pe(mut self, symbol: &str, pe: f64) -> Self {
            if let Some(q) = self.quotes.get_mut(symbol) {
                q.pe_ratio = Some(pe);
            }
            self
        }

        pub(crate) fn with_market_cap(mut self, symbol: &str, cap: f64) -> Self {
            if let Some(q) = self.quotes.get_mut(symbol) {
                q.market_cap = Some(cap);
            }
            self
        }

        pub(crate) fn with_headline(mut self, title: &str) -> Self {
            self.news.push(NewsItem {
                title: title.to_string(),
                url: None,
                source: Some("Test Wire".to_string()),
                summary: None,
                published_at: None,
            });
            self
        }

        pub(crate) fn with_indicator(mut self, series_id: &str, value: f64) -> Self {
            self.indicators.insert(
                series_id.to_string(),
                Indicator {
                    series_id: series_id.to_string(),
                    observations: vec![Observation {
                        date: "2024-06-01".to_string(),
                        value,
                    }],
                },
            );
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, _kind: DataKind) -> bool {
            true
        }

        async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.down {
                return Err(ProviderError::unreachable(self.name, "connection refused"));
            }
            let found = match operation {
                Operation::Quote { symbol } => self.quotes.get(symbol).cloned().map(DataPoint::Quote),
                Operation::News { max_results, .. } if !self.news.is_empty() => Some(DataPoint::News(
                    self.news.iter().take(*max_results).cloned().collect(),
                )),
                Operation::Indicator { series_id, .. } => {
                    self.indicators.get(series_id).cloned().map(DataPoint::Indicator)
                }
                _ => None,
            };
            found.ok_or_else(|| ProviderError::malformed(self.name, format!("no data for {}", operation.subject())))
        }
    }
}
