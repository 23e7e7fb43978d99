//! Tools the agent loop can call
//!
//! Data tools fetch through the [`Cascade`], so they share its provider
//! chains, circuit breakers and validation with the direct query path.

pub mod comparator;
pub mod news_retrieval;
pub mod portfolio_builder;
pub mod price_lookup;

pub use comparator::ComparatorTool;
pub use news_retrieval::NewsRetrievalTool;
pub use portfolio_builder::PortfolioBuilderTool;
pub use price_lookup::PriceLookupTool;

use crate::cascade::Cascade;
use crate::error::EngineError;
use crate::intent::is_valid_symbol;
use finq_tools::{ToolError, ToolRegistry};
use std::sync::Arc;

/// Registry holding every agent tool
pub fn registry(cascade: Arc<Cascade>) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(PriceLookupTool::new(Arc::clone(&cascade))));
    registry.register(Arc::new(NewsRetrievalTool::new(Arc::clone(&cascade))));
    registry.register(Arc::new(ComparatorTool::new(cascade)));
    registry.register(Arc::new(PortfolioBuilderTool::new()));
    registry
}

/// Uppercase a user-supplied ticker, stripping a leading `$`
pub(crate) fn normalize_symbol(tool: &str, raw: &str) -> finq_tools::Result<String> {
    let symbol = raw.trim().trim_start_matches('$').to_ascii_uppercase();
    if is_valid_symbol(&symbol) {
        Ok(symbol)
    } else {
        Err(ToolError::invalid(tool, format!("'{raw}' is not a ticker symbol")))
    }
}

/// Engine failures reach the model as execution failures
pub(crate) fn fetch_failed(tool: &str, err: &EngineError) -> ToolError {
    let reason = match err {
        EngineError::AllProvidersExhausted { failures, .. } if failures.is_empty() => {
            "no data provider is configured for this request".to_string()
        }
        EngineError::AllProvidersExhausted { failures, .. } => failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    };
    ToolError::failed(tool, reason)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::backoff::Backoff;
    use crate::cascade::Cascade;
    use crate::config::BreakerConfig;
    use crate::enrichment::DataKind;
    use crate::gateway::ProviderGateway;
    use crate::health::HealthRegistry;
    use crate::providers::Provider;
    use crate::providers::testing::StaticProvider;
    use std::sync::Arc;
    use std::time::Duration;

    /// Cascade with `provider` at the head of every chain
    pub(crate) fn cascade_over(provider: StaticProvider) -> Arc<Cascade> {
        let provider: Arc<dyn Provider> = Arc::new(provider);
        let gateway = ProviderGateway::new(HealthRegistry::new(BreakerConfig::default()));
        let mut cascade = Cascade::new(gateway, Backoff::no_retry(), Duration::from_secs(2), 4);
        for kind in [DataKind::Quote, DataKind::Historical, DataKind::Indicator, DataKind::News] {
            cascade = cascade.with_chain(kind, vec![Arc::clone(&provider)]);
        }
        Arc::new(cascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::StaticProvider;

    #[test]
    fn test_registry_names() {
        let registry = registry(testing::cascade_over(StaticProvider::new("static")));
        assert_eq!(
            registry.names(),
            vec!["comparator", "news_retrieval", "portfolio_builder", "price_lookup"]
        );
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("t", " $aapl ").unwrap(), "AAPL");
        assert!(normalize_symbol("t", "apple inc").is_err());
        assert!(normalize_symbol("t", "").is_err());
    }

    #[test]
    fn test_exhausted_without_providers() {
        let err = EngineError::AllProvidersExhausted {
            attempts: 0,
            failures: vec![],
        };
        assert_eq!(
            fetch_failed("price_lookup", &err),
            ToolError::failed("price_lookup", "no data provider is configured for this request")
        );
    }
}
