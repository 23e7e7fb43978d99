//! Market data types and the enrichment result

use crate::error::{EngineError, Result};
use crate::intent::{Intent, QueryCategory};
use crate::tools::portfolio_builder::{self, Portfolio};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of data a provider can supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Live quote
    Quote,
    /// Historical price series
    Historical,
    /// Economic indicator series
    Indicator,
    /// News headlines
    News,
    /// Model portfolio, computed locally
    Allocation,
}

impl DataKind {
    /// Name used in fact keys and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Historical => "historical",
            Self::Indicator => "indicator",
            Self::News => "news",
            Self::Allocation => "allocation",
        }
    }

    /// Relevance rank for a query category, lower is more relevant
    pub fn relevance(self, category: QueryCategory) -> u8 {
        use DataKind::{Allocation, Historical, Indicator, News, Quote};
        let order: [DataKind; 5] = match category {
            QueryCategory::Price => [Quote, Historical, News, Indicator, Allocation],
            QueryCategory::Comparison => [Quote, Historical, Indicator, News, Allocation],
            QueryCategory::Portfolio => [Allocation, Indicator, Quote, Historical, News],
            QueryCategory::General => [Quote, News, Indicator, Historical, Allocation],
        };
        order.iter().position(|k| *k == self).map_or(u8::MAX, |p| p as u8)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol
    pub symbol: String,
    /// Last price
    pub price: f64,
    /// Previous close
    pub previous_close: Option<f64>,
    /// Absolute change against previous close
    pub change: Option<f64>,
    /// Percent change against previous close
    pub change_percent: Option<f64>,
    /// Session open
    pub open: Option<f64>,
    /// Session high
    pub high: Option<f64>,
    /// Session low
    pub low: Option<f64>,
    /// Session volume
    pub volume: Option<u64>,
    /// Price/earnings ratio
    pub pe_ratio: Option<f64>,
    /// Market capitalization in dollars
    #[serde(default)]
    pub market_cap: Option<f64>,
}

impl Quote {
    /// Quote with only a price
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            previous_close: None,
            change: None,
            change_percent: None,
            open: None,
            high: None,
            low: None,
            volume: None,
            pe_ratio: None,
            market_cap: None,
        }
    }

    /// Set previous close and derive the change fields
    pub fn with_previous_close(mut self, previous_close: f64) -> Self {
        self.previous_close = Some(previous_close);
        if previous_close > 0.0 {
            let change = self.price - previous_close;
            self.change = Some(change);
            self.change_percent = Some(change / previous_close * 100.0);
        }
        self
    }
}

/// Dollar amount with a T/B/M suffix
pub fn format_market_cap(dollars: f64) -> String {
    const SCALES: [(f64, &str); 3] = [(1e12, "T"), (1e9, "B"), (1e6, "M")];
    SCALES
        .iter()
        .find(|(scale, _)| dollars >= *scale)
        .map_or_else(
            || format!("${dollars:.0}"),
            |(scale, suffix)| format!("${:.2}{suffix}", dollars / scale),
        )
}

/// One bar of a historical series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar timestamp
    pub timestamp: DateTime<Utc>,
    /// Close price
    pub close: f64,
    /// Volume
    pub volume: u64,
}

/// Historical price series for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    /// Ticker symbol
    pub symbol: String,
    /// Bars, oldest first
    pub bars: Vec<PriceBar>,
}

impl HistoricalSeries {
    /// Percent change from first to last close
    pub fn period_change_percent(&self) -> Option<f64> {
        let first = self.bars.first()?.close;
        let last = self.bars.last()?.close;
        (first > 0.0).then(|| (last - first) / first * 100.0)
    }
}

/// Direction of an indicator over its recent observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Latest above the earlier value
    Rising,
    /// Latest below the earlier value
    Falling,
    /// Unchanged
    Flat,
}

/// Dated value of an indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observation date (YYYY-MM-DD)
    pub date: String,
    /// Value
    pub value: f64,
}

/// Economic indicator series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// Series id (e.g. "FEDFUNDS")
    pub series_id: String,
    /// Observations, newest first
    pub observations: Vec<Observation>,
}

impl Indicator {
    /// Most recent observation
    pub fn latest(&self) -> Option<&Observation> {
        self.observations.first()
    }

    /// Trend over up to the last five observations
    pub fn trend(&self) -> Option<Trend> {
        let latest = self.observations.first()?.value;
        let earlier = self.observations.iter().take(5).last()?.value;
        Some(if latest > earlier {
            Trend::Rising
        } else if latest < earlier {
            Trend::Falling
        } else {
            Trend::Flat
        })
    }
}

/// News headline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Headline
    pub title: String,
    /// Link
    pub url: Option<String>,
    /// Publisher
    pub source: Option<String>,
    /// Short description
    pub summary: Option<String>,
    /// Publish time
    pub published_at: Option<DateTime<Utc>>,
}

/// A value fetched from a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DataPoint {
    /// Live quote
    Quote(Quote),
    /// Historical series
    Historical(HistoricalSeries),
    /// Economic indicator
    Indicator(Indicator),
    /// Headlines
    News(Vec<NewsItem>),
    /// Model portfolio
    Allocation(Portfolio),
}

impl DataPoint {
    /// Kind of this value
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Quote(_) => DataKind::Quote,
            Self::Historical(_) => DataKind::Historical,
            Self::Indicator(_) => DataKind::Indicator,
            Self::News(_) => DataKind::News,
            Self::Allocation(_) => DataKind::Allocation,
        }
    }

    /// One-line key/value rendering used in prompts and templates
    pub fn render(&self) -> String {
        match self {
            Self::Quote(q) => {
                let mut out = format!("price ${:.2}", q.price);
                if let (Some(change), Some(pct)) = (q.change, q.change_percent) {
                    out.push_str(&format!(", change {change:+.2} ({pct:+.2}%)"));
                }
                if let (Some(low), Some(high)) = (q.low, q.high) {
                    out.push_str(&format!(", day range {low:.2}-{high:.2}"));
                }
                if let Some(pe) = q.pe_ratio {
                    out.push_str(&format!(", P/E {pe:.2}"));
                }
                if let Some(cap) = q.market_cap {
                    out.push_str(&format!(", market cap {}", format_market_cap(cap)));
                }
                out
            }
            Self::Historical(h) => {
                let mut out = format!("{} bars", h.bars.len());
                if let (Some(first), Some(last)) = (h.bars.first(), h.bars.last()) {
                    out.push_str(&format!(
                        ", {} close {:.2} -> {} close {:.2}",
                        first.timestamp.format("%Y-%m-%d"),
                        first.close,
                        last.timestamp.format("%Y-%m-%d"),
                        last.close
                    ));
                }
                if let Some(pct) = h.period_change_percent() {
                    out.push_str(&format!(" ({pct:+.2}%)"));
                }
                out
            }
            Self::Indicator(i) => match i.latest() {
                Some(latest) => {
                    let trend = match i.trend() {
                        Some(Trend::Rising) => ", rising",
                        Some(Trend::Falling) => ", falling",
                        _ => "",
                    };
                    format!("{} as of {}{trend}", latest.value, latest.date)
                }
                None => "no observations".to_string(),
            },
            Self::News(items) => items
                .iter()
                .map(|n| match &n.source {
                    Some(src) => format!("\"{}\" ({src})", n.title),
                    None => format!("\"{}\"", n.title),
                })
                .collect::<Vec<_>>()
                .join("; "),
            Self::Allocation(p) => p.summary(),
        }
    }
}

/// Identifies one enrichment job: what kind of data about which subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactKey {
    /// Data kind
    pub kind: DataKind,
    /// Ticker, series id, or news query
    pub subject: String,
}

impl FactKey {
    /// Create a key
    pub fn new(kind: DataKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
        }
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.subject)
    }
}

static FETCH_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A fetched value with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// The value
    pub value: DataPoint,
    /// Provider that supplied it
    pub provider: String,
    /// Process-wide fetch order, strictly increasing
    pub sequence: u64,
    /// Wall-clock fetch time
    pub fetched_at: DateTime<Utc>,
}

impl Fact {
    /// Stamp a freshly fetched value
    pub fn new(value: DataPoint, provider: impl Into<String>) -> Self {
        Self {
            value,
            provider: provider.into(),
            sequence: FETCH_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            fetched_at: Utc::now(),
        }
    }
}

/// Outcome of enriching one query; partial results are valid
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentResult {
    facts: BTreeMap<FactKey, Fact>,
    missing: Vec<FactKey>,
    timed_out: bool,
}

impl EnrichmentResult {
    /// Empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fetched fact
    pub fn insert(&mut self, key: FactKey, fact: Fact) {
        self.missing.retain(|k| k != &key);
        self.facts.insert(key, fact);
    }

    /// Record a key that could not be fetched
    pub fn mark_missing(&mut self, key: FactKey) {
        if !self.facts.contains_key(&key) && !self.missing.contains(&key) {
            self.missing.push(key);
        }
    }

    /// Record that the caller deadline cut the fetch short
    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    /// Fact for a key
    pub fn get(&self, key: &FactKey) -> Option<&Fact> {
        self.facts.get(key)
    }

    /// Quote for a symbol, if fetched
    pub fn quote(&self, symbol: &str) -> Option<&Quote> {
        match &self.facts.get(&FactKey::new(DataKind::Quote, symbol))?.value {
            DataPoint::Quote(q) => Some(q),
            _ => None,
        }
    }

    /// All facts in key order
    pub fn facts(&self) -> impl Iterator<Item = (&FactKey, &Fact)> {
        self.facts.iter()
    }

    /// Facts of one kind
    pub fn facts_of(&self, kind: DataKind) -> impl Iterator<Item = (&FactKey, &Fact)> {
        self.facts.iter().filter(move |(k, _)| k.kind == kind)
    }

    /// Facts ordered most relevant first for an intent
    ///
    /// Within a kind, subjects follow the intent's ticker order.
    pub fn ranked(&self, intent: &Intent) -> Vec<(&FactKey, &Fact)> {
        let mut ranked: Vec<_> = self.facts.iter().collect();
        ranked.sort_by_key(|(k, f)| {
            let ticker_pos = intent
                .tickers
                .iter()
                .position(|t| t == &k.subject)
                .unwrap_or(usize::MAX);
            (k.kind.relevance(intent.category), ticker_pos, f.sequence)
        });
        ranked
    }

    /// Add the model portfolio a portfolio intent asks for
    ///
    /// Computed from the parsed risk profile and amount, so it is present
    /// even when every data provider is down.
    pub fn add_allocation(&mut self, intent: &Intent) {
        if let Some(portfolio) = portfolio_builder::for_intent(intent) {
            let key = FactKey::new(DataKind::Allocation, portfolio.risk_profile.clone());
            self.insert(key, Fact::new(DataPoint::Allocation(portfolio), "portfolio_builder"));
        }
    }

    /// Keys that were requested but not fetched
    pub fn missing(&self) -> &[FactKey] {
        &self.missing
    }

    /// Whether the caller deadline cut the fetch short
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Number of facts
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Whether no fact was fetched
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Fail with `InsufficientData` when a price query has no quote at all
    pub fn check_required(&self, intent: &Intent) -> Result<()> {
        if intent.category == QueryCategory::Price
            && !intent.tickers.is_empty()
            && self.facts_of(DataKind::Quote).next().is_none()
        {
            return Err(EngineError::InsufficientData(format!(
                "no live quote available for {}",
                intent.tickers.join(", ")
            )));
        }
        Ok(())
    }
}
