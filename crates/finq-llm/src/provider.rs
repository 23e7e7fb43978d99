//! LLM provider trait definition

use crate::{CompletionRequest, CompletionResponse, Result};
use async_trait::async_trait;

/// A chat-completion backend
///
/// One provider may serve several models; the model is chosen per request
/// through [`CompletionRequest::model`].
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Provider name (e.g. "openai", "anthropic")
    fn name(&self) -> &str;

    /// Whether the backend understands native tool definitions
    ///
    /// When `false`, callers describe tools in the prompt and parse the
    /// selection from the response text instead.
    fn supports_tools(&self) -> bool {
        true
    }
}
