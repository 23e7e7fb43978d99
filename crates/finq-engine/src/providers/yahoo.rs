//! Yahoo Finance adapter (quotes and daily history, no API key)

use super::{Operation, Provider, unsupported};
use crate::enrichment::{DataKind, DataPoint, HistoricalSeries, PriceBar, Quote};
use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use time::OffsetDateTime;
use tracing::instrument;
use yahoo_finance_api as yahoo;

const NAME: &str = "yahoo";

/// Yahoo Finance client
#[derive(Clone)]
pub struct YahooFinanceClient {
    connector: std::sync::Arc<yahoo::YahooConnector>,
}

impl fmt::Debug for YahooFinanceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YahooFinanceClient").finish_non_exhaustive()
    }
}

impl YahooFinanceClient {
    /// Create a client
    pub fn new() -> Result<Self, ProviderError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| classify(&e))?;
        Ok(Self {
            connector: std::sync::Arc::new(connector),
        })
    }

    /// Latest quote; previous close comes from the prior daily bar
    #[instrument(skip(self), fields(provider = NAME))]
    pub async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let response = self
            .connector
            .get_quote_range(symbol, "1d", "5d")
            .await
            .map_err(|e| classify(&e))?;
        let bars = response.quotes().map_err(|e| classify(&e))?;

        let last = bars
            .last()
            .ok_or_else(|| ProviderError::malformed(NAME, format!("no quotes for {symbol}")))?;

        let mut quote = Quote::new(symbol.to_ascii_uppercase(), last.close);
        quote.open = Some(last.open);
        quote.high = Some(last.high);
        quote.low = Some(last.low);
        quote.volume = Some(last.volume);

        if let Some(previous) = bars.len().checked_sub(2).and_then(|i| bars.get(i)) {
            quote = quote.with_previous_close(previous.close);
        }
        Ok(quote)
    }

    /// Daily closes over the last `days` days
    #[instrument(skip(self), fields(provider = NAME))]
    pub async fn history(&self, symbol: &str, days: u32) -> Result<HistoricalSeries, ProviderError> {
        let end = OffsetDateTime::now_utc();
        let start = end - time::Duration::days(i64::from(days));

        let response = self
            .connector
            .get_quote_history(symbol, start, end)
            .await
            .map_err(|e| classify(&e))?;
        let bars = response.quotes().map_err(|e| classify(&e))?;

        Ok(HistoricalSeries {
            symbol: symbol.to_ascii_uppercase(),
            bars: bars
                .iter()
                .map(|q| PriceBar {
                    timestamp: DateTime::from_timestamp(q.timestamp as i64, 0).unwrap_or_else(Utc::now),
                    close: q.close,
                    volume: q.volume,
                })
                .collect(),
        })
    }
}

/// Map a client error onto the provider taxonomy
fn classify(err: &yahoo::YahooError) -> ProviderError {
    let detail = err.to_string();
    let lower = detail.to_ascii_lowercase();
    if lower.contains("too many requests") || lower.contains("429") {
        ProviderError::rate_limited(NAME, detail)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ProviderError::Timeout(NAME.to_string())
    } else if lower.contains("connection") || lower.contains("fetch") || lower.contains("builder") {
        ProviderError::unreachable(NAME, detail)
    } else {
        ProviderError::malformed(NAME, detail)
    }
}

#[async_trait]
impl Provider for YahooFinanceClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supports(&self, kind: DataKind) -> bool {
        matches!(kind, DataKind::Quote | DataKind::Historical)
    }

    async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError> {
        match operation {
            Operation::Quote { symbol } => self.quote(symbol).await.map(DataPoint::Quote),
            Operation::Historical { symbol, days } => {
                self.history(symbol, *days).await.map(DataPoint::Historical)
            }
            other => Err(unsupported(NAME, other)),
        }
    }
}
