//! Finnhub adapter (quotes and company news)

use super::{Operation, Provider, SharedRateLimiter, get_json, rate_limiter, unsupported};
use crate::enrichment::{DataKind, DataPoint, NewsItem, Quote};
use crate::error::ProviderError;
use crate::intent::is_valid_symbol;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const NAME: &str = "finnhub";
const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Free tier allows 60 calls per minute
const DEFAULT_RATE_LIMIT: u32 = 60;

/// Days of company news searched
const NEWS_LOOKBACK_DAYS: i64 = 7;

/// Finnhub REST client
#[derive(Debug, Clone)]
pub struct FinnhubClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: SharedRateLimiter,
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    /// Current price
    c: Option<f64>,
    /// Change
    d: Option<f64>,
    /// Percent change
    dp: Option<f64>,
    /// High of the day
    h: Option<f64>,
    /// Low of the day
    l: Option<f64>,
    /// Open of the day
    o: Option<f64>,
    /// Previous close
    pc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FinnhubMetrics {
    #[serde(default)]
    metric: FinnhubMetric,
}

#[derive(Debug, Default, Deserialize)]
struct FinnhubMetric {
    #[serde(rename = "peBasicExclExtraTTM")]
    pe_basic_excl_extra_ttm: Option<f64>,
    #[serde(rename = "peTTM")]
    pe_ttm: Option<f64>,
    /// Millions of dollars
    #[serde(rename = "marketCapitalization")]
    market_capitalization: Option<f64>,
}

/// Best-effort valuation fields
#[derive(Debug, Default)]
struct Valuation {
    pe_ratio: Option<f64>,
    market_cap: Option<f64>,
}

impl From<FinnhubMetric> for Valuation {
    fn from(metric: FinnhubMetric) -> Self {
        Self {
            pe_ratio: metric
                .pe_basic_excl_extra_ttm
                .or(metric.pe_ttm)
                .filter(|pe| pe.is_finite()),
            market_cap: metric
                .market_capitalization
                .filter(|cap| cap.is_finite() && *cap > 0.0)
                .map(|millions| millions * 1_000_000.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubNews {
    headline: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    url: String,
    /// Unix seconds
    #[serde(default)]
    datetime: i64,
}

fn non_empty(s: String) -> Option<String> {
    (!s.trim().is_empty()).then_some(s)
}

impl FinnhubClient {
    /// Create a client with the default rate limit
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_rate_limit(api_key, DEFAULT_RATE_LIMIT)
    }

    /// Create a client allowing `per_minute` requests per minute
    pub fn with_rate_limit(api_key: impl Into<String>, per_minute: u32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            rate_limiter: rate_limiter(per_minute),
        }
    }

    /// Point the client at another base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, ProviderError> {
        self.rate_limiter.until_ready().await;
        let request = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .header("X-Finnhub-Token", &self.api_key);
        get_json(NAME, request).await
    }

    /// Live quote with best-effort P/E and market cap
    #[instrument(skip(self), fields(provider = NAME))]
    pub async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let raw: FinnhubQuote = self.get("/quote", &[("symbol", symbol)]).await?;

        // unknown symbols come back as all zeros
        let price = raw
            .c
            .filter(|c| *c > 0.0)
            .ok_or_else(|| ProviderError::malformed(NAME, format!("no quote for {symbol}")))?;

        let mut quote = Quote::new(symbol.to_ascii_uppercase(), price);
        quote.previous_close = raw.pc.filter(|p| *p > 0.0);
        quote.change = raw.d;
        quote.change_percent = raw.dp;
        quote.open = raw.o;
        quote.high = raw.h;
        quote.low = raw.l;

        match self.valuation(symbol).await {
            Ok(valuation) => {
                quote.pe_ratio = valuation.pe_ratio;
                quote.market_cap = valuation.market_cap;
            }
            Err(e) => debug!(symbol, error = %e, "Valuation metrics unavailable"),
        }
        Ok(quote)
    }

    async fn valuation(&self, symbol: &str) -> Result<Valuation, ProviderError> {
        let metrics: FinnhubMetrics = self
            .get("/stock/metric", &[("symbol", symbol), ("metric", "all")])
            .await?;
        Ok(metrics.metric.into())
    }

    /// Company news from the last week
    #[instrument(skip(self), fields(provider = NAME))]
    pub async fn company_news(&self, symbol: &str, max_results: usize) -> Result<Vec<NewsItem>, ProviderError> {
        let to = Utc::now().date_naive();
        let from = to - ChronoDuration::days(NEWS_LOOKBACK_DAYS);
        let (from, to) = (from.to_string(), to.to_string());

        let raw: Vec<FinnhubNews> = self
            .get("/company-news", &[("symbol", symbol), ("from", &from), ("to", &to)])
            .await?;

        Ok(raw
            .into_iter()
            .take(max_results)
            .map(|n| NewsItem {
                title: n.headline,
                url: non_empty(n.url),
                source: non_empty(n.source),
                summary: non_empty(n.summary),
                published_at: DateTime::from_timestamp(n.datetime, 0).filter(|_| n.datetime > 0),
            })
            .collect())
    }
}

#[async_trait]
impl Provider for FinnhubClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supports(&self, kind: DataKind) -> bool {
        matches!(kind, DataKind::Quote | DataKind::News)
    }

    fn accepts(&self, operation: &Operation) -> bool {
        match operation {
            Operation::Quote { .. } => true,
            // company news needs a symbol; free-text queries go to search providers
            Operation::News { query, .. } => is_valid_symbol(query),
            _ => false,
        }
    }

    async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError> {
        match operation {
            Operation::Quote { symbol } => self.quote(symbol).await.map(DataPoint::Quote),
            Operation::News { query, max_results } if is_valid_symbol(query) => {
                self.company_news(query, *max_results).await.map(DataPoint::News)
            }
            other => Err(unsupported(NAME, other)),
        }
    }
}
