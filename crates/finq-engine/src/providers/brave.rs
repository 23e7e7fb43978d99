//! Brave Search adapter for news headlines

use super::{Operation, Provider, SharedRateLimiter, get_json, rate_limiter, unsupported};
use crate::enrichment::{DataKind, DataPoint, NewsItem};
use crate::error::ProviderError;
use crate::intent::is_valid_symbol;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

const NAME: &str = "brave";
const BASE_URL: &str = "https://api.search.brave.com/res/v1";
const DEFAULT_RATE_LIMIT: u32 = 60;

/// The API caps `count` at 20
const MAX_COUNT: usize = 20;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    url: Option<String>,
    description: Option<String>,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

/// Brave Search client
#[derive(Debug, Clone)]
pub struct BraveSearchClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: SharedRateLimiter,
}

impl BraveSearchClient {
    /// Create a client
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

    /// Search the web for recent headlines about `query`
    #[instrument(skip(self), fields(provider = NAME))]
    pub async fn news(&self, query: &str, max_results: usize) -> Result<Vec<NewsItem>, ProviderError> {
        self.rate_limiter.until_ready().await;

        let count = max_results.clamp(1, MAX_COUNT).to_string();
        let request = self
            .client
            .get(format!("{}/web/search", self.base_url))
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[
                ("q", search_text(query).as_str()),
                ("count", count.as_str()),
                ("text_decorations", "false"),
            ]);
        let response: SearchResponse = get_json(NAME, request).await?;
        Ok(to_news(response, max_results))
    }
}

/// Tickers get a news-flavored query; free text is searched as is
fn search_text(query: &str) -> String {
    if is_valid_symbol(query) {
        format!("{query} stock news latest")
    } else {
        query.to_string()
    }
}

fn to_news(response: SearchResponse, max_results: usize) -> Vec<NewsItem> {
    response
        .web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .filter(|r| !r.title.trim().is_empty())
        .take(max_results)
        .map(|r| NewsItem {
            title: r.title,
            url: r.url,
            source: r.profile.and_then(|p| p.name),
            summary: r.description,
            published_at: None,
        })
        .collect()
}

#[async_trait]
impl Provider for BraveSearchClient {
    fn name(&self) -> &str {
        NAME
    }

    fn supports(&self, kind: DataKind) -> bool {
        kind == DataKind::News
    }

    async fn invoke(&self, operation: &Operation) -> Result<DataPoint, ProviderError> {
        match operation {
            Operation::News { query, max_results } => {
                self.news(query, *max_results).await.map(DataPoint::News)
            }
            other => Err(unsupported(NAME, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_text() {
        assert_eq!(search_text("NVDA"), "NVDA stock news latest");
        assert_eq!(search_text("fed rate decision"), "fed rate decision");
    }

    #[test]
    fn test_to_news() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"type":"search","web":{"results":[
                {"title":"Nvidia beats estimates","url":"https://example.com/a","description":"Record revenue","profile":{"name":"Example News"}},
                {"title":"","url":"https://example.com/empty"},
                {"title":"Chip stocks rally","url":"https://example.com/b"}
            ]}}"#,
        )
        .unwrap();

        let news = to_news(response, 5);
        assert_eq!(news.len(), 2);
        assert_eq!(news[0].source.as_deref(), Some("Example News"));
        assert_eq!(news[1].title, "Chip stocks rally");

        let empty: SearchResponse = serde_json::from_str(r#"{"type":"search"}"#).unwrap();
        assert!(to_news(empty, 5).is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires BRAVE_API_KEY and network access
    async fn test_live_news() {
        let key = std::env::var("BRAVE_API_KEY").unwrap();
        let news = BraveSearchClient::new(key).news("AAPL", 3).await.unwrap();
        assert!(news.len() <= 3);
    }
}
