//! Tool for fetching a live quote

use super::{fetch_failed, normalize_symbol};
use crate::cascade::Cascade;
use crate::enrichment::DataPoint;
use crate::providers::Operation;
use async_trait::async_trait;
use finq_llm::tools::schema;
use finq_tools::{Tool, ToolError, parse_params};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const NAME: &str = "price_lookup";

/// Latest quote for one symbol
pub struct PriceLookupTool {
    cascade: Arc<Cascade>,
}

#[derive(Debug, Deserialize)]
struct PriceLookupParams {
    symbol: String,
}

impl PriceLookupTool {
    /// Create the tool over a cascade
    pub fn new(cascade: Arc<Cascade>) -> Self {
        Self { cascade }
    }
}

#[async_trait]
impl Tool for PriceLookupTool {
    async fn execute(&self, params: Value) -> finq_tools::Result<Value> {
        let params: PriceLookupParams = parse_params(NAME, params)?;
        let symbol = normalize_symbol(NAME, &params.symbol)?;

        let fact = self
            .cascade
            .fetch(&Operation::Quote { symbol })
            .await
            .map_err(|e| fetch_failed(NAME, &e))?;

        let DataPoint::Quote(quote) = &fact.value else {
            return Err(ToolError::failed(NAME, "provider returned a non-quote value"));
        };
        Ok(json!({
            "symbol": quote.symbol,
            "price": quote.price,
            "previous_close": quote.previous_close,
            "change": quote.change,
            "change_percent": quote.change_percent,
            "day_low": quote.low,
            "day_high": quote.high,
            "volume": quote.volume,
            "pe_ratio": quote.pe_ratio,
            "market_cap": quote.market_cap,
            "source": fact.provider,
        }))
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Get the latest price, daily change and P/E ratio for a stock ticker"
    }

    fn input_schema(&self) -> Value {
        schema::object(
            json!({ "symbol": schema::string("Ticker symbol, e.g. AAPL") }),
            &["symbol"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::StaticProvider;
    use crate::tools::testing::cascade_over;

    #[tokio::test]
    async fn test_lookup() {
        let tool = PriceLookupTool::new(cascade_over(
            StaticProvider::new("static").with_quote("NVDA", 120.0, 2.5),
        ));

        let out = tool.execute(json!({"symbol": "$nvda"})).await.unwrap();
        assert_eq!(out["symbol"], "NVDA");
        assert_eq!(out["price"], 120.0);
        assert_eq!(out["source"], "static");
        assert!((out["change_percent"].as_f64().unwrap() - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let tool = PriceLookupTool::new(cascade_over(StaticProvider::new("static")));

        let err = tool.execute(json!({"ticker": "AAPL"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = tool.execute(json!({"symbol": "not a ticker"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_unknown_symbol_fails() {
        let tool = PriceLookupTool::new(cascade_over(StaticProvider::new("static")));
        let err = tool.execute(json!({"symbol": "ZZZZ"})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { ref reason, .. } if reason.contains("ZZZZ")));
    }
}
