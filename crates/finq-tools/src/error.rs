//! Tool error types

use thiserror::Error;

/// Result type for tool execution
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors a tool can report back to the caller
///
/// All of these are recoverable from the agent's point of view: they are
/// turned into an observation the model can react to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No tool registered under this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments did not match the tool's input schema
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments {
        /// Tool name
        tool: String,
        /// What was wrong
        reason: String,
    },

    /// The tool ran but could not produce a result
    #[error("Tool {tool} failed: {reason}")]
    ExecutionFailed {
        /// Tool name
        tool: String,
        /// What went wrong
        reason: String,
    },
}

impl ToolError {
    /// Shorthand for [`ToolError::InvalidArguments`]
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ToolError::ExecutionFailed`]
    pub fn failed(tool: &str, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}
