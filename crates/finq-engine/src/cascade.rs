//! Data enrichment cascade
//!
//! An intent is turned into a plan of independent `(kind, subject)` jobs.
//! Jobs run concurrently on a bounded pool; each job walks its provider chain
//! in priority order and keeps the first validated success. Rate-limited
//! providers are retried with backoff before the chain moves on.

use crate::backoff::Backoff;
use crate::enrichment::{DataKind, DataPoint, EnrichmentResult, Fact, FactKey};
use crate::error::{EngineError, ProviderError, Result};
use crate::fallback::first_success;
use crate::gateway::ProviderGateway;
use crate::intent::{Intent, QueryCategory};
use crate::providers::{Operation, Provider};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Economic series fetched for portfolio queries
pub const PORTFOLIO_INDICATORS: &[&str] = &["FEDFUNDS", "CPIAUCSL", "DGS10"];

/// Days of history fetched for price queries
pub const HISTORY_DAYS: u32 = 30;

/// Observations fetched per indicator
pub const INDICATOR_OBSERVATIONS: usize = 10;

const MAX_PLAUSIBLE_PRICE: f64 = 1_000_000.0;

/// One planned fetch
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Where the result is stored
    pub key: FactKey,
    /// What to ask the providers
    pub operation: Operation,
    /// Whether the answer cannot do without it
    pub required: bool,
}

impl Job {
    fn new(operation: Operation, required: bool) -> Self {
        Self {
            key: FactKey::new(operation.kind(), operation.subject()),
            operation,
            required,
        }
    }
}

/// Fan-out fetcher over prioritized provider chains
pub struct Cascade {
    gateway: ProviderGateway,
    chains: HashMap<DataKind, Vec<Arc<dyn Provider>>>,
    backoff: Backoff,
    timeout: Duration,
    pool_size: usize,
    news_max_results: usize,
}

impl std::fmt::Debug for Cascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chains: HashMap<DataKind, Vec<&str>> = self
            .chains
            .iter()
            .map(|(kind, chain)| (*kind, chain.iter().map(|p| p.name()).collect()))
            .collect();
        f.debug_struct("Cascade")
            .field("chains", &chains)
            .field("timeout", &self.timeout)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

impl Cascade {
    /// Create a cascade with empty chains
    pub fn new(gateway: ProviderGateway, backoff: Backoff, timeout: Duration, pool_size: usize) -> Self {
        Self {
            gateway,
            chains: HashMap::new(),
            backoff,
            timeout,
            pool_size: pool_size.max(1),
            news_max_results: 5,
        }
    }

    /// Set the provider priority order for a data kind
    ///
    /// Providers that do not support `kind` are left out.
    pub fn with_chain(mut self, kind: DataKind, providers: Vec<Arc<dyn Provider>>) -> Self {
        let chain: Vec<_> = providers
            .into_iter()
            .filter(|p| {
                let ok = p.supports(kind);
                if !ok {
                    warn!(provider = p.name(), kind = %kind, "Provider does not support kind, skipped");
                }
                ok
            })
            .collect();
        self.chains.insert(kind, chain);
        self
    }

    /// Set the number of headlines requested per news job
    pub fn with_news_max_results(mut self, max: usize) -> Self {
        self.news_max_results = max.max(1);
        self
    }

    /// Provider names for a kind, in priority order
    pub fn chain(&self, kind: DataKind) -> Vec<&str> {
        self.chains
            .get(&kind)
            .map(|c| c.iter().map(|p| p.name()).collect())
            .unwrap_or_default()
    }

    /// Gateway used for every call
    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Jobs needed to answer `intent`
    pub fn plan(&self, intent: &Intent, text: &str) -> Vec<Job> {
        let quotes = |required| {
            intent
                .tickers
                .iter()
                .map(move |symbol| Job::new(Operation::Quote { symbol: symbol.clone() }, required))
        };
        let news = |query: &str| {
            Job::new(
                Operation::News {
                    query: query.to_string(),
                    max_results: self.news_max_results,
                },
                false,
            )
        };
        let first = intent.tickers.first();

        let mut jobs: Vec<Job> = Vec::new();
        match intent.category {
            QueryCategory::Price => {
                jobs.extend(quotes(true));
                if let Some(symbol) = first {
                    jobs.push(Job::new(
                        Operation::Historical {
                            symbol: symbol.clone(),
                            days: HISTORY_DAYS,
                        },
                        false,
                    ));
                    jobs.push(news(symbol.as_str()));
                }
            }
            QueryCategory::Comparison => jobs.extend(quotes(false)),
            QueryCategory::Portfolio => {
                jobs.extend(PORTFOLIO_INDICATORS.iter().map(|id| {
                    Job::new(
                        Operation::Indicator {
                            series_id: (*id).to_string(),
                            last_n: INDICATOR_OBSERVATIONS,
                        },
                        false,
                    )
                }));
                jobs.extend(quotes(false));
            }
            QueryCategory::General => {
                jobs.extend(quotes(false));
                let query = first.map_or_else(|| text.trim(), String::as_str);
                if !query.is_empty() {
                    jobs.push(news(query));
                }
            }
        }
        jobs
    }

    /// Fetch everything `intent` needs
    ///
    /// Never fails: exhausted jobs are recorded as missing. When `deadline`
    /// passes, in-flight fetches are cancelled and the facts gathered so far
    /// are returned.
    pub async fn enrich(&self, intent: &Intent, text: &str, deadline: Option<Instant>) -> EnrichmentResult {
        let jobs = self.plan(intent, text);
        let planned: Vec<FactKey> = jobs.iter().map(|j| j.key.clone()).collect();
        let mut result = EnrichmentResult::new();

        let mut fetches = futures::stream::iter(jobs.into_iter().map(|job| async move {
            let outcome = self.fetch(&job.operation).await;
            (job, outcome)
        }))
        .buffer_unordered(self.pool_size);

        loop {
            let next = match deadline {
                Some(at) => {
                    if let Ok(next) = tokio::time::timeout_at(at, fetches.next()).await {
                        next
                    } else {
                        warn!(completed = result.len(), "Deadline reached, returning partial data");
                        result.mark_timed_out();
                        break;
                    }
                }
                None => fetches.next().await,
            };
            let Some((job, outcome)) = next else { break };

            match outcome {
                Ok(fact) => result.insert(job.key, fact),
                Err(e) if job.required => {
                    warn!(key = %job.key, error = %e, "Required data unavailable");
                }
                Err(e) => debug!(key = %job.key, error = %e, "Optional data unavailable"),
            }
        }
        drop(fetches);

        // plan order keeps `missing` deterministic
        for key in planned {
            if result.get(&key).is_none() {
                result.mark_missing(key);
            }
        }

        info!(
            facts = result.len(),
            missing = result.missing().len(),
            timed_out = result.timed_out(),
            "Enrichment finished"
        );
        result
    }

    /// Fetch one operation through its provider chain
    pub async fn fetch(&self, operation: &Operation) -> Result<Fact> {
        let chain = self
            .chains
            .get(&operation.kind())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let eligible = chain.iter().filter(|p| p.accepts(operation));

        match first_success(eligible, |provider| self.fetch_from(provider.as_ref(), operation)).await {
            Ok((_, fact)) => Ok(fact),
            Err(failures) => Err(EngineError::AllProvidersExhausted {
                attempts: failures.len(),
                failures,
            }),
        }
    }

    async fn fetch_from(&self, provider: &dyn Provider, operation: &Operation) -> std::result::Result<Fact, ProviderError> {
        let name = provider.name();
        let value = self
            .backoff
            .retry_rate_limited(name, || {
                self.gateway.call_validated(name, self.timeout, provider.invoke(operation), |value| {
                    validate(operation, value)
                })
            })
            .await;

        match value {
            Ok(value) => {
                debug!(provider = name, key = %FactKey::new(operation.kind(), operation.subject()), "Fetched");
                Ok(Fact::new(value, name))
            }
            Err(e) => {
                debug!(provider = name, error = %e, "Falling through to next provider");
                Err(e)
            }
        }
    }
}

/// Plausibility checks applied to every provider result
pub fn validate(operation: &Operation, value: &DataPoint) -> std::result::Result<(), String> {
    if value.kind() != operation.kind() {
        return Err(format!("expected {} but got {}", operation.kind(), value.kind()));
    }

    match value {
        DataPoint::Quote(q) => {
            if !q.symbol.eq_ignore_ascii_case(operation.subject()) {
                return Err(format!("asked for {} but got {}", operation.subject(), q.symbol));
            }
            if !q.price.is_finite() || q.price <= 0.0 || q.price >= MAX_PLAUSIBLE_PRICE {
                return Err(format!("implausible price {}", q.price));
            }
            if q.change_percent.is_some_and(|p| !p.is_finite()) {
                return Err("non-finite change percent".to_string());
            }
        }
        DataPoint::Historical(h) => {
            if !h.symbol.eq_ignore_ascii_case(operation.subject()) {
                return Err(format!("asked for {} but got {}", operation.subject(), h.symbol));
            }
            if h.bars.is_empty() {
                return Err("empty price history".to_string());
            }
            if h.bars.iter().any(|b| !b.close.is_finite() || b.close <= 0.0) {
                return Err("implausible close in history".to_string());
            }
        }
        DataPoint::Indicator(i) => {
            if i.observations.is_empty() {
                return Err(format!("no observations for {}", i.series_id));
            }
            if i.observations.iter().any(|o| !o.value.is_finite()) {
                return Err(format!("non-finite observation in {}", i.series_id));
            }
        }
        DataPoint::Allocation(_) => {}
        DataPoint::News(items) => {
            if items.is_empty() {
                return Err("no headlines".to_string());
            }
            if items.iter().any(|n| n.title.trim().is_empty()) {
                return Err("headline without title".to_string());
            }
        }
    }
    Ok(())
}
