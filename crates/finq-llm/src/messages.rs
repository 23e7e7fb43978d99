//! Message types for chat completions

use serde::{Deserialize, Serialize};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant message
    Assistant,
}

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content
    Text {
        /// Text content
        text: String,
    },

    /// Tool use request from the assistant
    ToolUse {
        /// Unique ID for this tool use
        id: String,
        /// Tool name
        name: String,
        /// Tool input (JSON)
        input: serde_json::Value,
    },

    /// Tool result sent back by the caller
    ToolResult {
        /// ID of the tool use this responds to
        tool_use_id: String,
        /// Result content
        content: String,
        /// Whether this is an error result
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Message content: plain text or structured blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Structured content blocks
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Message content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

impl Message {
    /// Create a user message with text
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(MessageContent::Text(text.into())),
        }
    }

    /// Create an assistant message with text
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(MessageContent::Text(text.into())),
        }
    }

    /// Create a user message carrying a tool result
    pub fn tool_result(tool_use_id: impl Into<String>, result: impl Into<String>, is_error: bool) -> Self {
        Self {
            role: Role::User,
            content: Some(MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: result.into(),
                is_error: is_error.then_some(true),
            }])),
        }
    }

    /// First text block of the message
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(s)) => Some(s),
            Some(MessageContent::Blocks(blocks)) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
            None => None,
        }
    }

    /// All text blocks joined with newlines
    pub fn joined_text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(s)) => s.clone(),
            Some(MessageContent::Blocks(blocks)) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            None => String::new(),
        }
    }

    /// Tool use blocks of an assistant message
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        match &self.content {
            Some(MessageContent::Blocks(blocks)) => blocks
                .iter()
                .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
                .collect(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), Some("Hello"));
    }

    #[test]
    fn test_tool_result_flags_errors() {
        let ok = Message::tool_result("call_1", "{}", false);
        let err = Message::tool_result("call_2", "unknown tool", true);

        match (&ok.content, &err.content) {
            (Some(MessageContent::Blocks(a)), Some(MessageContent::Blocks(b))) => {
                assert!(matches!(a[0], ContentBlock::ToolResult { is_error: None, .. }));
                assert!(matches!(
                    b[0],
                    ContentBlock::ToolResult {
                        is_error: Some(true),
                        ..
                    }
                ));
            }
            _ => panic!("Expected block content"),
        }
        assert!(ok.tool_uses().is_empty());
    }

    #[test]
    fn test_joined_text() {
        let msg = Message {
            role: Role::Assistant,
            content: Some(MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "first".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "x".to_string(),
                    name: "price_lookup".to_string(),
                    input: serde_json::json!({}),
                },
                ContentBlock::Text {
                    text: "second".to_string(),
                },
            ])),
        };
        assert_eq!(msg.joined_text(), "first\nsecond");
        assert_eq!(msg.tool_uses().len(), 1);
    }
}
