//! Tool for side-by-side quote comparison

use super::{fetch_failed, normalize_symbol};
use crate::cascade::Cascade;
use crate::enrichment::{DataPoint, Quote, format_market_cap};
use crate::providers::Operation;
use async_trait::async_trait;
use finq_llm::tools::schema;
use finq_tools::{Tool, ToolError, parse_params};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

const NAME: &str = "comparator";
const MIN_SYMBOLS: usize = 2;
const MAX_SYMBOLS: usize = 5;

/// Compare quotes of several symbols
pub struct ComparatorTool {
    cascade: Arc<Cascade>,
}

#[derive(Debug, Deserialize)]
struct ComparatorParams {
    symbols: Vec<String>,
}

impl ComparatorTool {
    /// Create the tool over a cascade
    pub fn new(cascade: Arc<Cascade>) -> Self {
        Self { cascade }
    }

    async fn quote(&self, symbol: String) -> Result<Quote, String> {
        let fact = self
            .cascade
            .fetch(&Operation::Quote {
                symbol: symbol.clone(),
            })
            .await
            .map_err(|e| fetch_failed(NAME, &e).to_string())?;
        match fact.value {
            DataPoint::Quote(q) => Ok(q),
            _ => Err(format!("no quote for {symbol}")),
        }
    }
}

fn by_change(a: &&Quote, b: &&Quote) -> Ordering {
    a.change_percent.partial_cmp(&b.change_percent).unwrap_or(Ordering::Equal)
}

/// Symbols with the highest and lowest daily change
fn performers(quotes: &[Quote]) -> Option<(&Quote, &Quote)> {
    let with_change = || quotes.iter().filter(|q| q.change_percent.is_some());
    Some((with_change().max_by(by_change)?, with_change().min_by(by_change)?))
}

/// Symbol with the largest market cap
fn largest(quotes: &[Quote]) -> Option<&Quote> {
    quotes
        .iter()
        .filter(|q| q.market_cap.is_some())
        .max_by(|a, b| a.market_cap.partial_cmp(&b.market_cap).unwrap_or(Ordering::Equal))
}

/// Symbol with the lowest positive P/E
fn cheapest(quotes: &[Quote]) -> Option<&Quote> {
    quotes
        .iter()
        .filter(|q| q.pe_ratio.is_some_and(|pe| pe > 0.0))
        .min_by(|a, b| a.pe_ratio.partial_cmp(&b.pe_ratio).unwrap_or(Ordering::Equal))
}

#[async_trait]
impl Tool for ComparatorTool {
    async fn execute(&self, params: Value) -> finq_tools::Result<Value> {
        let params: ComparatorParams = parse_params(NAME, params)?;

        let mut symbols = Vec::new();
        for raw in &params.symbols {
            let symbol = normalize_symbol(NAME, raw)?;
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if !(MIN_SYMBOLS..=MAX_SYMBOLS).contains(&symbols.len()) {
            return Err(ToolError::invalid(
                NAME,
                format!("expected {MIN_SYMBOLS} to {MAX_SYMBOLS} distinct symbols, got {}", symbols.len()),
            ));
        }

        let fetched = join_all(symbols.iter().cloned().map(|s| self.quote(s))).await;

        let mut quotes = Vec::new();
        let mut unavailable = Vec::new();
        for (symbol, outcome) in symbols.iter().zip(fetched) {
            match outcome {
                Ok(q) => quotes.push(q),
                Err(e) => {
                    debug!(symbol, error = %e, "Comparison quote unavailable");
                    unavailable.push(symbol.clone());
                }
            }
        }
        if quotes.len() < MIN_SYMBOLS {
            return Err(ToolError::failed(
                NAME,
                format!("quotes unavailable for {}", unavailable.join(", ")),
            ));
        }

        let rows: Vec<Value> = quotes
            .iter()
            .map(|q| {
                json!({
                    "symbol": q.symbol,
                    "price": q.price,
                    "change_percent": q.change_percent,
                    "pe_ratio": q.pe_ratio,
                    "market_cap": q.market_cap,
                    "market_cap_display": q.market_cap.map(format_market_cap),
                })
            })
            .collect();
        let (best, worst) = performers(&quotes).map_or((None, None), |(b, w)| {
            (Some(b.symbol.clone()), Some(w.symbol.clone()))
        });

        Ok(json!({
            "quotes": rows,
            "best_performer": best,
            "worst_performer": worst,
            "lowest_pe": cheapest(&quotes).map(|q| q.symbol.clone()),
            "largest_market_cap": largest(&quotes).map(|q| q.symbol.clone()),
            "unavailable": unavailable,
        }))
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Compare 2 to 5 stocks by price, daily change, P/E ratio and market cap"
    }

    fn input_schema(&self) -> Value {
        schema::object(
            json!({
                "symbols": schema::array("Ticker symbols to compare", schema::string("Ticker symbol")),
            }),
            &["symbols"],
        )
    }
}
