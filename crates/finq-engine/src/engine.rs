//! Query engine facade
//!
//! [`QueryEngine::handle_query`] runs one conversational turn end to end:
//! classify, enrich, assemble, ask the model ladder (or the agent loop) and
//! record the turn. Callers always get a [`QueryAnswer`]; failures surface as
//! an apology plus an `error_tag`, never as a raw error.

use crate::agent_loop::{AgentLoop, Termination, ToolInvocation};
use crate::backoff::Backoff;
use crate::cascade::Cascade;
use crate::config::{EngineConfig, split_model_id};
use crate::enrichment::{DataKind, EnrichmentResult};
use crate::error::{EngineError, Result};
use crate::gateway::ProviderGateway;
use crate::health::{HealthRegistry, HealthSnapshot};
use crate::intent::{Intent, IntentClassifier, Query};
use crate::memory::{ConversationMemory, ConversationStore, TurnRole};
use crate::notify::{LogSink, NotificationSink, alerts_for, dispatch};
use crate::orchestrator::{ModelCandidate, Orchestrator, SourceTag};
use crate::prompt::{DEFAULT_PREAMBLE, PromptAssembler};
use crate::providers::{BraveSearchClient, FinnhubClient, FredClient, Provider, YahooFinanceClient};
use crate::template::{APOLOGY, TemplateResponder};
use crate::validator::ResponseValidator;
use finq_llm::LLMProvider;
use finq_llm::providers::{AnthropicConfig, AnthropicProvider, OpenAIConfig, OpenAIProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Base URL for `local/<model>` candidates when `FINQ_LOCAL_API_BASE` is unset
const DEFAULT_LOCAL_API_BASE: &str = "http://localhost:1234/v1";

/// A fact that informed the answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsedFact {
    /// `kind:subject`
    pub key: String,
    /// Rendered value
    pub value: String,
    /// Provider that supplied it
    pub provider: String,
}

/// Answer to one query
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    /// Text shown to the user
    pub answer: String,
    /// Provenance of the text
    pub source: SourceTag,
    /// Facts available to the answer, most relevant first
    pub used_facts: Vec<UsedFact>,
    /// Tool calls made in agent mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_trace: Option<Vec<ToolInvocation>>,
    /// Model that produced the text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Internal error tag for degraded answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_tag: Option<&'static str>,
}

impl QueryAnswer {
    fn apology(err: &EngineError) -> Self {
        Self {
            answer: APOLOGY.to_string(),
            source: SourceTag::Error,
            used_facts: Vec::new(),
            tool_trace: None,
            model: None,
            error_tag: Some(err.tag()),
        }
    }
}

fn used_facts(intent: &Intent, facts: &EnrichmentResult) -> Vec<UsedFact> {
    facts
        .ranked(intent)
        .into_iter()
        .map(|(key, fact)| UsedFact {
            key: key.to_string(),
            value: fact.value.render(),
            provider: fact.provider.clone(),
        })
        .collect()
}

/// Fresh conversation id
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Financial query engine
pub struct QueryEngine {
    config: EngineConfig,
    classifier: IntentClassifier,
    cascade: Arc<Cascade>,
    orchestrator: Arc<Orchestrator>,
    assembler: PromptAssembler,
    agent: AgentLoop,
    conversations: ConversationStore,
    sink: Arc<dyn NotificationSink>,
    health: HealthRegistry,
    template: TemplateResponder,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("cascade", &self.cascade)
            .field("orchestrator", &self.orchestrator)
            .field("conversations", &self.conversations.len())
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    /// Start building an engine
    pub fn builder(config: EngineConfig) -> QueryEngineBuilder {
        QueryEngineBuilder::new(config)
    }

    /// Engine configured from the environment with the default providers
    pub fn from_env() -> Result<Self> {
        Self::builder(EngineConfig::from_env()?).build()
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Circuit state of every provider and model seen so far
    pub fn health_snapshots(&self) -> Vec<HealthSnapshot> {
        self.health.snapshots()
    }

    /// Model candidate ids, best first
    pub fn models(&self) -> Vec<String> {
        self.orchestrator.candidates()
    }

    /// Provider names serving a data kind, in priority order
    pub fn chain(&self, kind: DataKind) -> Vec<&str> {
        self.cascade.chain(kind)
    }

    /// Forget a conversation; returns whether it existed
    pub fn end_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.end(conversation_id)
    }

    /// Answer one query within an optional deadline
    ///
    /// Turns of the same conversation are serialized: the conversation's
    /// memory stays locked until this turn has been recorded.
    #[instrument(skip(self, text, deadline))]
    pub async fn handle_query(&self, text: &str, conversation_id: &str, deadline: Option<Instant>) -> QueryAnswer {
        let memory = self.conversations.conversation(conversation_id);
        let mut memory = memory.lock().await;

        let query = match Query::new(text, conversation_id, &self.classifier) {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "Rejected query");
                return QueryAnswer::apology(&e);
            }
        };
        let intent = query.intent();
        info!(category = %intent.category, tickers = ?intent.tickers, "Classified query");

        let mut facts = self.cascade.enrich(intent, query.text(), deadline).await;
        dispatch(&self.sink, alerts_for(&facts, self.config.alert_threshold_pct));
        facts.add_allocation(intent);

        let answer = if facts.timed_out() {
            self.degraded_answer(intent, &facts, &EngineError::DeadlineExceeded)
        } else if let Err(e) = facts.check_required(intent) {
            info!(error = %e, "Answering from template");
            self.degraded_answer(intent, &facts, &e)
        } else {
            let compose = self.compose(&query, &facts, &memory);
            match deadline {
                Some(at) => match tokio::time::timeout_at(at, compose).await {
                    Ok(answer) => answer,
                    Err(_) => {
                        warn!("Deadline passed while composing, answering from template");
                        self.degraded_answer(intent, &facts, &EngineError::DeadlineExceeded)
                    }
                },
                None => compose.await,
            }
        };

        memory.record(TurnRole::User, query.text());
        memory.record(TurnRole::Assistant, answer.answer.clone());
        info!(source = %answer.source, facts = answer.used_facts.len(), "Query answered");
        answer
    }

    /// Model (or agent) answer over enriched facts
    async fn compose(&self, query: &Query, facts: &EnrichmentResult, memory: &ConversationMemory) -> QueryAnswer {
        let intent = query.intent();
        let primary = self.orchestrator.candidates().into_iter().next().unwrap_or_default();
        let request = match self.assembler.assemble(
            query.text(),
            intent,
            facts,
            memory,
            split_model_id(&primary).map_or("", |(_, model)| model),
            self.config.temperature,
            self.config.max_tokens,
        ) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Prompt assembly failed");
                return self.template_answer(intent, facts);
            }
        };

        if !self.config.agent_mode {
            let response = self.orchestrator.answer(&request, intent, facts).await;
            return QueryAnswer {
                source: if response.text == APOLOGY { SourceTag::Error } else { response.source },
                answer: response.text,
                used_facts: used_facts(intent, facts),
                tool_trace: None,
                model: response.model,
                error_tag: None,
            };
        }

        let outcome = self.agent.run(&request).await;
        info!(termination = ?outcome.termination, steps = outcome.trace.len(), "Agent loop ended");
        let mut answer = match (outcome.answer, outcome.termination) {
            (Some(text), Termination::FinalAnswer) => QueryAnswer {
                answer: text,
                source: SourceTag::Model,
                used_facts: used_facts(intent, facts),
                tool_trace: None,
                model: outcome.model,
                error_tag: None,
            },
            (Some(text), _) => QueryAnswer {
                answer: text,
                source: SourceTag::Template,
                used_facts: used_facts(intent, facts),
                tool_trace: None,
                model: outcome.model,
                error_tag: None,
            },
            (None, _) => self.template_answer(intent, facts),
        };
        if outcome.termination == Termination::StepLimit {
            answer.error_tag = Some(EngineError::StepLimitExceeded(self.agent.max_steps()).tag());
        }
        answer.tool_trace = Some(outcome.trace);
        answer
    }

    /// Template answer tagged with the error that forced it
    fn degraded_answer(&self, intent: &Intent, facts: &EnrichmentResult, err: &EngineError) -> QueryAnswer {
        let mut answer = self.template_answer(intent, facts);
        answer.error_tag = Some(err.tag());
        answer
    }

    /// Facts-only answer; the apology when there are no facts
    fn template_answer(&self, intent: &Intent, facts: &EnrichmentResult) -> QueryAnswer {
        QueryAnswer {
            answer: self.template.respond(intent, facts),
            source: if facts.is_empty() { SourceTag::Error } else { SourceTag::Template },
            used_facts: used_facts(intent, facts),
            tool_trace: None,
            model: None,
            error_tag: None,
        }
    }
}

/// Builder for [`QueryEngine`]
pub struct QueryEngineBuilder {
    config: EngineConfig,
    chains: HashMap<DataKind, Vec<Arc<dyn Provider>>>,
    candidates: Option<Vec<ModelCandidate>>,
    sink: Option<Arc<dyn NotificationSink>>,
    preamble: Option<String>,
}

impl QueryEngineBuilder {
    /// Builder over a configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            chains: HashMap::new(),
            candidates: None,
            sink: None,
            preamble: None,
        }
    }

    /// Use this provider chain for a data kind instead of the default
    pub fn chain(mut self, kind: DataKind, providers: Vec<Arc<dyn Provider>>) -> Self {
        self.chains.insert(kind, providers);
        self
    }

    /// Use these model candidates instead of the configured models
    pub fn candidates(mut self, candidates: Vec<ModelCandidate>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Deliver alerts to `sink` instead of the log
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the role preamble of the system prompt
    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Validate the configuration and wire the engine
    pub fn build(self) -> Result<QueryEngine> {
        let config = self.config;
        config.validate()?;

        let health = HealthRegistry::new(config.breaker);
        let gateway = ProviderGateway::new(health.clone());

        let mut chains = default_chains(&config);
        chains.extend(self.chains);
        let mut cascade = Cascade::new(
            gateway.clone(),
            Backoff::new(config.backoff),
            config.provider_timeout,
            config.cascade_pool_size,
        )
        .with_news_max_results(config.news_max_results);
        for (kind, providers) in chains {
            cascade = cascade.with_chain(kind, providers);
        }
        let cascade = Arc::new(cascade);

        let candidates = match self.candidates {
            Some(candidates) => candidates,
            None => candidates_from_config(&config),
        };
        if candidates.is_empty() {
            warn!("No model candidate available, answers will come from templates");
        }
        let orchestrator = Arc::new(Orchestrator::new(
            gateway,
            candidates,
            ResponseValidator::new(config.max_response_chars),
            config.llm_timeout,
        ));

        let registry = Arc::new(crate::tools::registry(Arc::clone(&cascade)));
        let agent = AgentLoop::new(Arc::clone(&orchestrator), registry, config.agent_max_steps);

        let assembler = PromptAssembler::new(
            self.preamble.as_deref().unwrap_or(DEFAULT_PREAMBLE),
            config.prompt_max_chars,
            config.memory_turns_in_prompt,
        )?;

        info!(
            models = ?orchestrator.candidates(),
            quote_chain = ?cascade.chain(DataKind::Quote),
            news_chain = ?cascade.chain(DataKind::News),
            agent_mode = config.agent_mode,
            "Query engine ready"
        );

        Ok(QueryEngine {
            classifier: IntentClassifier::new(config.max_tickers),
            conversations: ConversationStore::with_limit(config.memory_capacity, config.max_conversations),
            sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
            template: TemplateResponder::new(),
            cascade,
            orchestrator,
            assembler,
            agent,
            health,
            config,
        })
    }
}

/// Provider chains for the keys present in `config`
///
/// Quotes: Finnhub then Yahoo. History: Yahoo. Indicators: FRED.
/// News: Finnhub company news then Brave search.
fn default_chains(config: &EngineConfig) -> HashMap<DataKind, Vec<Arc<dyn Provider>>> {
    let finnhub: Option<Arc<dyn Provider>> = config
        .finnhub_api_key
        .as_deref()
        .map(|key| Arc::new(FinnhubClient::new(key)) as Arc<dyn Provider>);
    let yahoo: Option<Arc<dyn Provider>> = match YahooFinanceClient::new() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(error = %e, "Yahoo Finance client unavailable");
            None
        }
    };
    let fred: Option<Arc<dyn Provider>> = config
        .fred_api_key
        .as_deref()
        .map(|key| Arc::new(FredClient::new(key)) as Arc<dyn Provider>);
    let brave: Option<Arc<dyn Provider>> = config
        .brave_api_key
        .as_deref()
        .map(|key| Arc::new(BraveSearchClient::new(key)) as Arc<dyn Provider>);

    let chain = |providers: &[&Option<Arc<dyn Provider>>]| -> Vec<Arc<dyn Provider>> {
        providers.iter().filter_map(|p| (*p).clone()).collect()
    };

    HashMap::from([
        (DataKind::Quote, chain(&[&finnhub, &yahoo])),
        (DataKind::Historical, chain(&[&yahoo])),
        (DataKind::Indicator, chain(&[&fred])),
        (DataKind::News, chain(&[&finnhub, &brave])),
    ])
}

/// One client per provider name, shared by that provider's models
fn llm_provider(name: &str, config: &EngineConfig) -> finq_llm::Result<Arc<dyn LLMProvider>> {
    let timeout_secs = config.llm_timeout.as_secs().max(1);
    Ok(match name {
        "openai" => Arc::new(OpenAIProvider::with_config(
            OpenAIConfig::from_env()?.with_timeout(timeout_secs),
        )?),
        "anthropic" => {
            let key = finq_utils::env_var("ANTHROPIC_API_KEY").ok_or_else(|| {
                finq_llm::LLMError::Configuration("ANTHROPIC_API_KEY environment variable not set".into())
            })?;
            Arc::new(AnthropicProvider::with_config(
                AnthropicConfig::new(key).with_timeout(timeout_secs),
            )?)
        }
        "local" => {
            let base = finq_utils::env_var("FINQ_LOCAL_API_BASE")
                .unwrap_or_else(|| DEFAULT_LOCAL_API_BASE.to_string());
            Arc::new(LocalProvider(OpenAIProvider::with_config(
                OpenAIConfig::new("local")
                    .with_api_base(base)
                    .with_timeout(timeout_secs)
                    .with_native_tools(false),
            )?))
        }
        other => {
            return Err(finq_llm::LLMError::Configuration(format!(
                "unknown model provider '{other}'"
            )));
        }
    })
}

/// OpenAI-compatible local server, named `local` so its circuits stay apart
struct LocalProvider(OpenAIProvider);

#[async_trait::async_trait]
impl LLMProvider for LocalProvider {
    async fn complete(&self, request: finq_llm::CompletionRequest) -> finq_llm::Result<finq_llm::CompletionResponse> {
        self.0.complete(request).await
    }

    fn name(&self) -> &str {
        "local"
    }

    fn supports_tools(&self) -> bool {
        self.0.supports_tools()
    }
}

/// Candidates for the configured `provider/model` ids; unusable ones are skipped
fn candidates_from_config(config: &EngineConfig) -> Vec<ModelCandidate> {
    let mut providers: HashMap<String, Option<Arc<dyn LLMProvider>>> = HashMap::new();
    let mut candidates = Vec::new();
    for id in &config.models {
        let Some((provider, model)) = split_model_id(id) else {
            continue;
        };
        let client = providers
            .entry(provider.to_string())
            .or_insert_with(|| match llm_provider(provider, config) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(provider, error = %e, "Model provider unavailable, skipping its models");
                    None
                }
            });
        if let Some(client) = client {
            candidates.push(ModelCandidate::new(Arc::clone(client), model));
        }
    }
    candidates
}
