//! OpenAI-compatible chat completions provider
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` endpoint (LM Studio, vLLM, llama.cpp, Azure).
//!
//! ```no_run
//! use finq_llm::{CompletionRequest, LLMProvider, Message};
//! use finq_llm::providers::{OpenAIConfig, OpenAIProvider};
//!
//! # async fn run() -> finq_llm::Result<()> {
//! let provider = OpenAIProvider::with_config(
//!     OpenAIConfig::new("sk-...").with_api_base("http://localhost:1234/v1"),
//! )?;
//! let request = CompletionRequest::builder("gpt-4o-mini")
//!     .add_message(Message::user("What is the Fed funds rate?"))
//!     .build();
//! let response = provider.complete(request).await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

use crate::{
    CompletionRequest, CompletionResponse, ContentBlock, LLMError, LLMProvider, Message,
    MessageContent, Result, Role, StopReason, TokenUsage, ToolDefinition,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration for the OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// Base URL of the API (default: "https://api.openai.com/v1")
    pub api_base: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,

    /// Whether the server accepts the `tools` parameter
    ///
    /// Many local servers ignore or reject it; set to `false` for those.
    pub native_tools: bool,
}

impl OpenAIConfig {
    /// Create a config with the given API key and default settings
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            native_tools: true,
        }
    }

    /// Read `OPENAI_API_KEY` and the optional `OPENAI_API_BASE`
    pub fn from_env() -> Result<Self> {
        let api_key = finq_utils::env_var("OPENAI_API_KEY").ok_or_else(|| {
            LLMError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let mut config = Self::new(api_key);
        if let Some(api_base) = finq_utils::env_var("OPENAI_API_BASE") {
            config.api_base = api_base;
        }
        Ok(config)
    }

    /// Set a custom API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Enable or disable native tool definitions
    pub fn with_native_tools(mut self, enabled: bool) -> Self {
        self.native_tools = enabled;
        self
    }
}

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIProvider {
    /// Create a provider with a custom configuration
    pub fn with_config(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a provider with an API key and default settings
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(OpenAIConfig::new(api_key))
    }

    /// Create a provider from the environment
    pub fn from_env() -> Result<Self> {
        Self::with_config(OpenAIConfig::from_env()?)
    }

    /// Current configuration
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    #[instrument(skip(self, request), fields(model = %request.model, api_base = %self.config.api_base))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let tools = if self.config.native_tools {
            request.tools.as_deref().map(convert_tools)
        } else {
            None
        };

        let body = OpenAIRequest {
            model: request.model.clone(),
            messages: build_openai_messages(request.system, request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status.as_u16(), error_text, &request.model));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LLMError::UnexpectedResponse(format!("Failed to parse response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::UnexpectedResponse("No choices in response".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("none"),
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "OpenAI completion received"
        );

        Ok(CompletionResponse {
            message: parse_openai_message(choice.message)?,
            stop_reason: map_stop_reason(choice.finish_reason.as_deref()),
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn supports_tools(&self) -> bool {
        self.config.native_tools
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

// Conversions

/// System prompt goes first in the messages array
fn build_openai_messages(system: Option<String>, messages: Vec<Message>) -> Vec<OpenAIMessage> {
    let mut result = Vec::with_capacity(messages.len() + 1);
    if let Some(sys) = system {
        result.push(OpenAIMessage::text("system", sys));
    }
    for msg in messages {
        result.extend(convert_message(msg));
    }
    result
}

/// One of our messages may expand to several: tool results become `tool` messages
fn convert_message(msg: Message) -> Vec<OpenAIMessage> {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };

    let blocks = match msg.content {
        Some(MessageContent::Text(text)) => return vec![OpenAIMessage::text(role, text)],
        Some(MessageContent::Blocks(blocks)) => blocks,
        None => return vec![OpenAIMessage::text(role, String::new())],
    };

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAIToolCall {
                id,
                tool_type: function_type(),
                function: OpenAIFunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => tool_results.push(OpenAIMessage {
                role: "tool",
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(tool_use_id),
            }),
        }
    }

    let mut out = Vec::new();
    if !texts.is_empty() || !tool_calls.is_empty() {
        out.push(OpenAIMessage {
            role,
            content: (!texts.is_empty()).then(|| texts.join("\n")),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
        });
    }
    out.extend(tool_results);
    out
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAITool> {
    tools
        .iter()
        .map(|tool| OpenAITool {
            tool_type: "function",
            function: OpenAIFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

fn parse_openai_message(msg: OpenAIResponseMessage) -> Result<Message> {
    let mut blocks = Vec::new();

    if let Some(content) = msg.content.filter(|c| !c.is_empty()) {
        blocks.push(ContentBlock::Text { text: content });
    }

    for call in msg.tool_calls.unwrap_or_default() {
        let input: serde_json::Value = serde_json::from_str(&call.function.arguments)
            .map_err(|e| LLMError::UnexpectedResponse(format!("Failed to parse tool arguments: {e}")))?;
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    Ok(Message {
        role: Role::Assistant,
        content: Some(MessageContent::Blocks(blocks)),
    })
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls" | "function_call") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_creation() {
        let provider = OpenAIProvider::new("test-key").unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.config().api_base, "https://api.openai.com/v1");
        assert!(provider.supports_tools());
    }

    #[test]
    fn test_custom_config() {
        let config = OpenAIConfig::new("test-key")
            .with_api_base("http://localhost:1234/v1/")
            .with_timeout(30)
            .with_native_tools(false);

        let provider = OpenAIProvider::with_config(config).unwrap();
        assert_eq!(provider.config().api_base, "http://localhost:1234/v1");
        assert_eq!(provider.config().timeout_secs, 30);
        assert!(!provider.supports_tools());
    }

    #[test]
    fn test_system_message_first() {
        let messages = build_openai_messages(
            Some("You are a financial assistant".to_string()),
            vec![Message::user("Hi")],
        );

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_tool_round_trip_messages() {
        let assistant = Message {
            role: Role::Assistant,
            content: Some(MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "price_lookup".to_string(),
                input: json!({"symbol": "MSFT"}),
            }])),
        };
        let converted = convert_message(assistant);
        assert_eq!(converted.len(), 1);
        assert!(converted[0].content.is_none());
        let calls = converted[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "price_lookup");
        assert_eq!(calls[0].function.arguments, r#"{"symbol":"MSFT"}"#);

        let result = convert_message(Message::tool_result("call_1", "{\"price\":410.2}", false));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].role, "tool");
        assert_eq!(result[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_parse_response_with_tool_call() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "comparator", "arguments": "{\"symbols\":[\"AAPL\",\"MSFT\"]}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });

        let parsed: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let choice = parsed.choices.into_iter().next().unwrap();
        assert_eq!(map_stop_reason(choice.finish_reason.as_deref()), StopReason::ToolUse);

        let message = parse_openai_message(choice.message).unwrap();
        let uses = message.tool_uses();
        assert_eq!(uses.len(), 1);
        match uses[0] {
            ContentBlock::ToolUse { name, input, .. } => {
                assert_eq!(name, "comparator");
                assert_eq!(input["symbols"][1], "MSFT");
            }
            _ => panic!("Expected tool use"),
        }
    }

    #[test]
    fn test_bad_tool_arguments_are_rejected() {
        let msg = OpenAIResponseMessage {
            content: None,
            tool_calls: Some(vec![OpenAIToolCall {
                id: "c".to_string(),
                tool_type: function_type(),
                function: OpenAIFunctionCall {
                    name: "price_lookup".to_string(),
                    arguments: "{not json".to_string(),
                },
            }]),
        };
        assert!(matches!(
            parse_openai_message(msg),
            Err(LLMError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_tool_conversion() {
        let tools = convert_tools(&[ToolDefinition::new(
            "news_retrieval",
            "Search news",
            json!({"type": "object"}),
        )]);
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].function.name, "news_retrieval");
    }

    #[tokio::test]
    #[ignore = "requires OPENAI_API_KEY"]
    async fn test_live_completion() {
        let provider = OpenAIProvider::from_env().unwrap();
        let request = CompletionRequest::builder("gpt-4o-mini")
            .add_message(Message::user("Reply with the single word: ok"))
            .max_tokens(5)
            .build();
        let response = provider.complete(request).await.unwrap();
        assert!(!response.text().is_empty());
    }
}
