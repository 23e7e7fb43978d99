//! Anthropic messages API provider
//!
//! See: https://docs.anthropic.com/en/api/messages

use crate::{
    CompletionRequest, CompletionResponse, ContentBlock, LLMError, LLMProvider, Message,
    MessageContent, Result, Role, StopReason, TokenUsage, ToolDefinition,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic provider
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,
    /// Base URL of the API
    pub api_base: String,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    /// Create a config with default endpoint and timeout
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: ANTHROPIC_API_BASE.to_string(),
            timeout_secs: 60,
        }
    }

    /// Set the HTTP timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    /// Create a provider from a configuration
    pub fn with_config(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Create a provider with an API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(AnthropicConfig::new(api_key))
    }

    /// Read the API key from `ANTHROPIC_API_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = finq_utils::env_var("ANTHROPIC_API_KEY").ok_or_else(|| {
            LLMError::Configuration("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Self::new(api_key)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = AnthropicRequest {
            model: &request.model,
            messages: &request.messages,
            system: request.system.as_deref(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request.tools.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/messages", self.config.api_base))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            // 529 is Anthropic's "overloaded"
            if status.as_u16() == 529 {
                return Err(LLMError::RateLimited(error_text));
            }
            return Err(LLMError::from_status(status.as_u16(), error_text, &request.model));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LLMError::UnexpectedResponse(format!("Failed to parse response: {e}")))?;

        debug!(
            stop_reason = %parsed.stop_reason,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Anthropic completion received"
        );

        Ok(CompletionResponse {
            message: Message {
                role: Role::Assistant,
                content: Some(MessageContent::Blocks(parsed.content)),
            },
            stop_reason: map_stop_reason(&parsed.stop_reason),
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

// The generic message and tool types already match the Anthropic wire format.

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: String,
    usage: UsageResponse,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    input_tokens: usize,
    output_tokens: usize,
}
