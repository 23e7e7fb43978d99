//! Configuration for the query engine

use crate::error::{EngineError, Result};
use crate::memory::{DEFAULT_CAPACITY, DEFAULT_MAX_CONVERSATIONS};
use finq_utils::{env_list, env_parse, env_var};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker thresholds, applied to every provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before letting trial calls through
    pub cooldown: Duration,
    /// Trial calls allowed while half-open
    pub half_open_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            half_open_trials: 1,
        }
    }
}

/// Exponential backoff for rate-limited providers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Retries of the same provider before falling through
    pub max_retries: u32,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            max_retries: 2,
            jitter: 0.2,
        }
    }
}

/// Default model candidates, best first
pub const DEFAULT_MODELS: &[&str] = &[
    "openai/gpt-4o-mini",
    "openai/gpt-4o",
    "openai/gpt-3.5-turbo",
];

/// Configuration for the query engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Circuit breaker thresholds
    pub breaker: BreakerConfig,

    /// Backoff for rate-limited data providers
    pub backoff: BackoffConfig,

    /// Per-call timeout for data providers
    pub provider_timeout: Duration,

    /// Per-call timeout for model completions
    pub llm_timeout: Duration,

    /// Concurrent enrichment jobs
    pub cascade_pool_size: usize,

    /// Tickers kept per query
    pub max_tickers: usize,

    /// Turns kept in conversation memory, at most five
    pub memory_capacity: usize,

    /// Conversations kept before the least recently used is evicted
    pub max_conversations: usize,

    /// Memory turns included in a prompt
    pub memory_turns_in_prompt: usize,

    /// Upper bound of system + user prompt, in characters
    pub prompt_max_chars: usize,

    /// Model candidates as `provider/model`, best first
    pub models: Vec<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Completion token budget
    pub max_tokens: usize,

    /// Longest acceptable answer, in characters
    pub max_response_chars: usize,

    /// Agent loop step limit
    pub agent_max_steps: usize,

    /// Route queries through the agent loop
    pub agent_mode: bool,

    /// Daily move (percent) that triggers an alert
    pub alert_threshold_pct: f64,

    /// Headlines fetched per news job
    pub news_max_results: usize,

    /// Finnhub API key
    pub finnhub_api_key: Option<String>,

    /// FRED API key
    pub fred_api_key: Option<String>,

    /// Brave Search API key
    pub brave_api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            backoff: BackoffConfig::default(),
            provider_timeout: Duration::from_secs(8),
            llm_timeout: Duration::from_secs(45),
            cascade_pool_size: 4,
            max_tickers: 5,
            memory_capacity: DEFAULT_CAPACITY,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            memory_turns_in_prompt: 4,
            prompt_max_chars: 12_000,
            models: DEFAULT_MODELS.iter().map(ToString::to_string).collect(),
            temperature: 0.1,
            max_tokens: 4000,
            max_response_chars: 8000,
            agent_max_steps: 6,
            agent_mode: false,
            alert_threshold_pct: 5.0,
            news_max_results: 5,
            finnhub_api_key: None,
            fred_api_key: None,
            brave_api_key: None,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Defaults overlaid with environment variables
    ///
    /// Reads `FINNHUB_API_KEY`, `FRED_API_KEY`, `BRAVE_API_KEY`, the
    /// comma-separated `FINQ_MODELS` and the numeric `FINQ_AGENT_MAX_STEPS`
    /// and `FINQ_PROMPT_MAX_CHARS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default().with_env_api_keys();

        let models = env_list("FINQ_MODELS");
        if !models.is_empty() {
            config.models = models;
        }
        if let Some(steps) = env_parse::<usize>("FINQ_AGENT_MAX_STEPS")? {
            config.agent_max_steps = steps;
        }
        if let Some(chars) = env_parse::<usize>("FINQ_PROMPT_MAX_CHARS")? {
            config.prompt_max_chars = chars;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load data provider API keys from the environment
    pub fn with_env_api_keys(mut self) -> Self {
        self.finnhub_api_key = env_var("FINNHUB_API_KEY").or(self.finnhub_api_key);
        self.fred_api_key = env_var("FRED_API_KEY").or(self.fred_api_key);
        self.brave_api_key = env_var("BRAVE_API_KEY").or(self.brave_api_key);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(config_err("breaker.failure_threshold must be greater than 0"));
        }
        if self.breaker.half_open_trials == 0 {
            return Err(config_err("breaker.half_open_trials must be greater than 0"));
        }
        if self.backoff.multiplier < 1.0 || !self.backoff.multiplier.is_finite() {
            return Err(config_err("backoff.multiplier must be at least 1.0"));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(config_err("backoff.jitter must be in [0, 1)"));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(config_err("backoff.base_delay must not exceed backoff.max_delay"));
        }
        if self.cascade_pool_size == 0 {
            return Err(config_err("cascade_pool_size must be greater than 0"));
        }
        if self.max_tickers == 0 {
            return Err(config_err("max_tickers must be greater than 0"));
        }
        if self.memory_capacity == 0 || self.memory_capacity > DEFAULT_CAPACITY {
            return Err(config_err(&format!(
                "memory_capacity must be between 1 and {DEFAULT_CAPACITY}"
            )));
        }
        if self.max_conversations == 0 {
            return Err(config_err("max_conversations must be greater than 0"));
        }
        if self.memory_turns_in_prompt > self.memory_capacity {
            return Err(config_err("memory_turns_in_prompt must not exceed memory_capacity"));
        }
        if self.agent_max_steps == 0 {
            return Err(config_err("agent_max_steps must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(config_err("temperature must be between 0.0 and 2.0"));
        }
        if self.max_response_chars == 0 {
            return Err(config_err("max_response_chars must be greater than 0"));
        }
        if let Some(bad) = self.models.iter().find(|m| split_model_id(m).is_none()) {
            return Err(config_err(&format!(
                "model '{bad}' must be written as provider/model"
            )));
        }

        Ok(())
    }

    /// Backoff delay before retry `attempt` (1-based), without jitter
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        crate::backoff::Backoff::new(self.backoff).base_delay_for(attempt)
    }
}

/// Split `provider/model` into its two halves
pub fn split_model_id(id: &str) -> Option<(&str, &str)> {
    let (provider, model) = id.split_once('/')?;
    (!provider.is_empty() && !model.is_empty()).then_some((provider, model))
}

fn config_err(msg: &str) -> EngineError {
    EngineError::Config(msg.to_string())
}

/// Builder for [`EngineConfig`]
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    breaker: Option<BreakerConfig>,
    backoff: Option<BackoffConfig>,
    provider_timeout: Option<Duration>,
    llm_timeout: Option<Duration>,
    cascade_pool_size: Option<usize>,
    max_tickers: Option<usize>,
    memory_capacity: Option<usize>,
    max_conversations: Option<usize>,
    memory_turns_in_prompt: Option<usize>,
    prompt_max_chars: Option<usize>,
    models: Option<Vec<String>>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    max_response_chars: Option<usize>,
    agent_max_steps: Option<usize>,
    agent_mode: Option<bool>,
    alert_threshold_pct: Option<f64>,
    news_max_results: Option<usize>,
    finnhub_api_key: Option<String>,
    fred_api_key: Option<String>,
    brave_api_key: Option<String>,
}

impl EngineConfigBuilder {
    /// Set circuit breaker thresholds
    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Set backoff parameters
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set per-call data provider timeout
    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    /// Set per-call model timeout
    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = Some(timeout);
        self
    }

    /// Set the enrichment pool size
    pub fn cascade_pool_size(mut self, size: usize) -> Self {
        self.cascade_pool_size = Some(size);
        self
    }

    /// Set the ticker cap
    pub fn max_tickers(mut self, max: usize) -> Self {
        self.max_tickers = Some(max);
        self
    }

    /// Set conversation memory capacity
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = Some(capacity);
        self
    }

    /// Set how many conversations are kept
    pub fn max_conversations(mut self, max: usize) -> Self {
        self.max_conversations = Some(max);
        self
    }

    /// Set memory turns included in prompts
    pub fn memory_turns_in_prompt(mut self, turns: usize) -> Self {
        self.memory_turns_in_prompt = Some(turns);
        self
    }

    /// Set the prompt size bound
    pub fn prompt_max_chars(mut self, chars: usize) -> Self {
        self.prompt_max_chars = Some(chars);
        self
    }

    /// Set model candidates (`provider/model`, best first)
    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Set sampling temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set completion token budget
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the longest acceptable answer
    pub fn max_response_chars(mut self, chars: usize) -> Self {
        self.max_response_chars = Some(chars);
        self
    }

    /// Set the agent step limit
    pub fn agent_max_steps(mut self, steps: usize) -> Self {
        self.agent_max_steps = Some(steps);
        self
    }

    /// Route queries through the agent loop
    pub fn agent_mode(mut self, enabled: bool) -> Self {
        self.agent_mode = Some(enabled);
        self
    }

    /// Set the alert threshold in percent
    pub fn alert_threshold_pct(mut self, pct: f64) -> Self {
        self.alert_threshold_pct = Some(pct);
        self
    }

    /// Set headlines per news job
    pub fn news_max_results(mut self, max: usize) -> Self {
        self.news_max_results = Some(max);
        self
    }

    /// Set Finnhub API key
    pub fn finnhub_api_key(mut self, key: impl Into<String>) -> Self {
        self.finnhub_api_key = Some(key.into());
        self
    }

    /// Set FRED API key
    pub fn fred_api_key(mut self, key: impl Into<String>) -> Self {
        self.fred_api_key = Some(key.into());
        self
    }

    /// Set Brave Search API key
    pub fn brave_api_key(mut self, key: impl Into<String>) -> Self {
        self.brave_api_key = Some(key.into());
        self
    }

    /// Fill unset API keys from the environment
    pub fn with_env_api_keys(mut self) -> Self {
        self.finnhub_api_key = self.finnhub_api_key.or_else(|| env_var("FINNHUB_API_KEY"));
        self.fred_api_key = self.fred_api_key.or_else(|| env_var("FRED_API_KEY"));
        self.brave_api_key = self.brave_api_key.or_else(|| env_var("BRAVE_API_KEY"));
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            breaker: self.breaker.unwrap_or(defaults.breaker),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            provider_timeout: self.provider_timeout.unwrap_or(defaults.provider_timeout),
            llm_timeout: self.llm_timeout.unwrap_or(defaults.llm_timeout),
            cascade_pool_size: self.cascade_pool_size.unwrap_or(defaults.cascade_pool_size),
            max_tickers: self.max_tickers.unwrap_or(defaults.max_tickers),
            memory_capacity: self.memory_capacity.unwrap_or(defaults.memory_capacity),
            max_conversations: self.max_conversations.unwrap_or(defaults.max_conversations),
            memory_turns_in_prompt: self
                .memory_turns_in_prompt
                .unwrap_or(defaults.memory_turns_in_prompt),
            prompt_max_chars: self.prompt_max_chars.unwrap_or(defaults.prompt_max_chars),
            models: self.models.unwrap_or(defaults.models),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            max_response_chars: self.max_response_chars.unwrap_or(defaults.max_response_chars),
            agent_max_steps: self.agent_max_steps.unwrap_or(defaults.agent_max_steps),
            agent_mode: self.agent_mode.unwrap_or(defaults.agent_mode),
            alert_threshold_pct: self.alert_threshold_pct.unwrap_or(defaults.alert_threshold_pct),
            news_max_results: self.news_max_results.unwrap_or(defaults.news_max_results),
            finnhub_api_key: self.finnhub_api_key,
            fred_api_key: self.fred_api_key,
            brave_api_key: self.brave_api_key,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.breaker.half_open_trials, 1);
        assert_eq!(config.memory_capacity, 5);
        assert_eq!(config.agent_max_steps, 6);
        assert_eq!(config.models[0], "openai/gpt-4o-mini");
        assert_ok!(config.validate());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .breaker(BreakerConfig {
                failure_threshold: 5,
                cooldown: Duration::from_secs(10),
                half_open_trials: 2,
            })
            .models(["anthropic/claude-3-5-haiku-latest", "openai/gpt-4o-mini"])
            .agent_mode(true)
            .build()
            .unwrap();

        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.models.len(), 2);
        assert!(config.agent_mode);
        assert_eq!(config.max_tickers, 5);
    }

    #[test]
    fn test_validation() {
        let result = EngineConfig::builder()
            .breaker(BreakerConfig {
                failure_threshold: 0,
                ..BreakerConfig::default()
            })
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));

        let result = EngineConfig::builder().models(["gpt-4o"]).build();
        assert!(matches!(result, Err(EngineError::Config(msg)) if msg.contains("provider/model")));

        let result = EngineConfig::builder()
            .memory_capacity(2)
            .memory_turns_in_prompt(3)
            .build();
        assert_err!(result);

        let result = EngineConfig::builder().memory_capacity(6).build();
        assert!(matches!(result, Err(EngineError::Config(msg)) if msg.contains("between 1 and 5")));

        assert_err!(EngineConfig::builder().max_conversations(0).build());
    }

    #[test]
    fn test_retry_backoff() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_backoff(1), Duration::from_millis(250));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(500));
        assert_eq!(config.retry_backoff(3), Duration::from_secs(1));
        assert_eq!(config.retry_backoff(10), Duration::from_secs(4));
    }

    #[test]
    fn test_split_model_id() {
        assert_eq!(split_model_id("openai/gpt-4o"), Some(("openai", "gpt-4o")));
        assert_eq!(
            split_model_id("openai/meta-llama/Llama-3-8B"),
            Some(("openai", "meta-llama/Llama-3-8B"))
        );
        assert_eq!(split_model_id("gpt-4o"), None);
        assert_eq!(split_model_id("/gpt-4o"), None);
    }
}
