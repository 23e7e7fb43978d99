//! Federal Reserve Economic Data (FRED) adapter
//!
//! API Key: free registration at https://fred.stlouisfed.org/docs/api/api_key.html
//! Rate Limit: 120 requests per minute

use super::{Operation, Provider, SharedRateLimiter, get_json, rate_limiter, unsupported};
use crate::enrichment::{DataKind, DataPoint, Indicator, Observation};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const NAME: &str = "fred";
const BASE_URL: &str = "https://api.stlouisfed.org/fred";
const DEFAULT_RATE_LIMIT: u32 = 120;

/// Series used by the engine
pub mod series {
    /// Federal Funds Effective Rate
    pub const FED_FUNDS_RATE: &str = "FEDFUNDS";
    /// Consumer Price Index (All Urban)
    pub const CPI: &str = "CPIAUCSL";
    /// 10-Year Treasury Constant Maturity Rate
    pub const TREASURY_10Y: &str = "DGS10";
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<RawObservation>,
}

/// Value is "." when missing
#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

/// FRED client
#[derive(Debug, Clone)]
pub struct FredClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: SharedRateLimiter,
}

impl FredClient {
    /// Create a client with the default rate limit
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            rate_limiter: rate_limiter(DEFAULT_RATE_LIMIT),
        }
    }

    /// Point the client at another base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The `last_n` most recent numeric observations, newest first
    #[instrument(skip(self), fields(provider = NAME))]
    pub async fn observations(&self, series_id: &str, last_n: usize) -> Result<Indicator, ProviderError> {
        self.rate_limiter.until_ready().await;

        // ask for extra rows since missing values are dropped
        let limit = (last_n * 2).max(1).to_string();
        let request = self
            .client
            .get(format!("{}/series/observations", self.base_url))
            .query(&[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", limit.as_str()),
            ]);
        let response: ObservationsResponse = get_json(NAME, request).await?;

        let total = response.observations.len();
        let observations: Vec<Observation> = parse_observations(response.observations)
            .into_iter()
            .take(last_n)
            .collect();
        debug!(series_id, total, kept = observations.len(), "FRED observations");

        Ok(Indicator {
            series_id: series_id.to_string(),
            observations,
        })
    }
}

fn parse_observations(raw: Vec<RawObservation>) -> Vec<Observation> {
    raw.into_iter()
        .filter_map(|o| {
            o.value.parse::<f64>().ok().map(|value| Observation {
                date: o.date,
                value,
            })
        })
        .collect()
}

#[async_trait]
impl Provider for FredClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supports(&self, kind: DataKind) -> bool {
        kind == DataKind::Indicator
    }

    async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError> {
        match operation {
            Operation::Indicator { series_id, last_n } => {
                self.observations(series_id, *last_n).await.map(DataPoint::Indicator)
            }
            other => Err(unsupported(NAME, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_are_dropped() {
        let response: ObservationsResponse = serde_json::from_str(
            r#"{"observations":[
                {"realtime_start":"2024-06-10","date":"2024-06-07","value":"4.43"},
                {"realtime_start":"2024-06-10","date":"2024-06-06","value":"."},
                {"realtime_start":"2024-06-10","date":"2024-06-05","value":"4.29"}
            ]}"#,
        )
        .unwrap();

        let parsed = parse_observations(response.observations);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].date, "2024-06-07");
        assert!((parsed[1].value - 4.29).abs() < f64::EPSILON);
    }

    #[test]
    fn test_supports_only_indicators() {
        let client = FredClient::new("k");
        assert!(client.supports(DataKind::Indicator));
        assert!(!client.supports(DataKind::Quote));
        assert!(!client.accepts(&Operation::Quote { symbol: "AAPL".into() }));
    }

    #[tokio::test]
    #[ignore] // Requires FRED_API_KEY and network access
    async fn test_live_observations() {
        let key = std::env::var("FRED_API_KEY").unwrap();
        let indicator = FredClient::new(key)
            .observations(series::TREASURY_10Y, 5)
            .await
            .unwrap();
        assert!(!indicator.observations.is_empty());
        assert!(indicator.observations.len() <= 5);
    }
}
