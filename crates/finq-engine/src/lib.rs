//! Financial query orchestration engine
//!
//! Turns a free-text market question into an answer grounded in live data:
//!
//! - An intent classifier extracts the category, tickers, risk profile and
//!   amount
//! - A data cascade fetches quotes, history, economic indicators and news
//!   through prioritized provider chains
//! - Every external call goes through a circuit-breaking gateway with
//!   per-call timeouts and result validation
//! - A prompt assembler builds a bounded prompt from facts and memory
//! - A model orchestrator walks a fallback ladder of models and ends in a
//!   facts-only template
//! - An optional agent loop lets the model call tools
//!
//! # Example
//!
//! ```rust,ignore
//! use finq_engine::QueryEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = QueryEngine::from_env()?;
//!     let conversation = finq_engine::new_conversation_id();
//!
//!     let answer = engine
//!         .handle_query("compare AAPL vs MSFT", &conversation, None)
//!         .await;
//!     println!("[{}] {}", answer.source, answer.answer);
//!     Ok(())
//! }
//! ```

pub mod agent_loop;
pub mod backoff;
pub mod cascade;
pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod health;
pub mod intent;
pub mod memory;
pub mod notify;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod template;
pub mod tools;
pub mod validator;

pub use config::{BackoffConfig, BreakerConfig, EngineConfig};
pub use engine::{QueryAnswer, QueryEngine, QueryEngineBuilder, UsedFact, new_conversation_id};
pub use enrichment::{DataKind, DataPoint, EnrichmentResult, Fact, FactKey};
pub use error::{EngineError, ProviderError, Result};
pub use health::{CircuitState, HealthRegistry, HealthSnapshot};
pub use intent::{Intent, IntentClassifier, QueryCategory, RiskProfile};
pub use notify::{Alert, LogSink, NotificationSink};
pub use orchestrator::{ModelCandidate, SourceTag};
pub use providers::{Operation, Provider};
