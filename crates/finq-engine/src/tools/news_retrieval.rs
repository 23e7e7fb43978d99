//! Tool for searching recent headlines

use super::fetch_failed;
use crate::cascade::Cascade;
use crate::enrichment::DataPoint;
use crate::intent::is_valid_symbol;
use crate::providers::Operation;
use async_trait::async_trait;
use finq_llm::tools::schema;
use finq_tools::{Tool, ToolError, parse_params};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const NAME: &str = "news_retrieval";
const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_CAP: usize = 20;

/// Recent headlines for a ticker or topic
pub struct NewsRetrievalTool {
    cascade: Arc<Cascade>,
}

#[derive(Debug, Deserialize)]
struct NewsParams {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

impl NewsRetrievalTool {
    /// Create the tool over a cascade
    pub fn new(cascade: Arc<Cascade>) -> Self {
        Self { cascade }
    }
}

/// Tickers are matched case-insensitively, topics are searched verbatim
fn normalize_query(query: &str) -> String {
    let trimmed = query.trim().trim_start_matches('$');
    let upper = trimmed.to_ascii_uppercase();
    if is_valid_symbol(&upper) && !trimmed.contains(' ') {
        upper
    } else {
        query.trim().to_string()
    }
}

#[async_trait]
impl Tool for NewsRetrievalTool {
    async fn execute(&self, params: Value) -> finq_tools::Result<Value> {
        let params: NewsParams = parse_params(NAME, params)?;
        let query = normalize_query(&params.query);
        if query.is_empty() {
            return Err(ToolError::invalid(NAME, "query must not be empty"));
        }
        let max_results = params
            .max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_CAP);

        let fact = self
            .cascade
            .fetch(&Operation::News {
                query: query.clone(),
                max_results,
            })
            .await
            .map_err(|e| fetch_failed(NAME, &e))?;

        let DataPoint::News(items) = fact.value else {
            return Err(ToolError::failed(NAME, "provider returned a non-news value"));
        };
        let headlines: Vec<Value> = items
            .into_iter()
            .map(|n| {
                json!({
                    "title": n.title,
                    "source": n.source,
                    "url": n.url,
                    "summary": n.summary,
                    "published_at": n.published_at.map(|t| t.to_rfc3339()),
                })
            })
            .collect();

        Ok(json!({
            "query": query,
            "count": headlines.len(),
            "headlines": headlines,
            "source": fact.provider,
        }))
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Search recent news headlines about a stock ticker or a market topic"
    }

    fn input_schema(&self) -> Value {
        schema::object(
            json!({
                "query": schema::string("Ticker symbol or search text"),
                "max_results": schema::integer("Maximum headlines to return (default 5)"),
            }),
            &["query"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::StaticProvider;
    use crate::tools::testing::cascade_over;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("tsla"), "TSLA");
        assert_eq!(normalize_query(" $msft "), "MSFT");
        assert_eq!(normalize_query("fed rate cut"), "fed rate cut");
    }

    #[tokio::test]
    async fn test_headlines_are_capped() {
        let provider = StaticProvider::new("static")
            .with_headline("Tesla deliveries beat")
            .with_headline("EV demand cools")
            .with_headline("Autopilot inquiry widens");
        let tool = NewsRetrievalTool::new(cascade_over(provider));

        let out = tool
            .execute(json!({"query": "TSLA", "max_results": 2}))
            .await
            .unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(out["headlines"][0]["title"], "Tesla deliveries beat");
        assert_eq!(out["headlines"][1]["source"], "Test Wire");
    }

    #[tokio::test]
    async fn test_empty_query() {
        let tool = NewsRetrievalTool::new(cascade_over(StaticProvider::new("static")));
        let err = tool.execute(json!({"query": "   "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
