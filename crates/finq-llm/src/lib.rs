//! LLM completion layer for finq
//!
//! This crate provides a provider-agnostic view of chat-completion models:
//!
//! - Message and content-block types (text, tool use, tool results)
//! - Completion request/response types with a builder
//! - Tool definitions for function calling
//! - The [`LLMProvider`] trait and an error taxonomy that the engine's
//!   circuit breaker can classify
//! - OpenAI-compatible and Anthropic adapters (behind default features)

pub mod completion;
pub mod error;
pub mod messages;
pub mod provider;
pub mod tools;

pub use completion::{CompletionRequest, CompletionResponse, StopReason, TokenUsage};
pub use error::{LLMError, Result};
pub use messages::{ContentBlock, Message, MessageContent, Role};
pub use provider::LLMProvider;
pub use tools::ToolDefinition;

#[cfg(any(feature = "openai", feature = "anthropic"))]
pub mod providers;
