//! Tool trait definition

use crate::{Result, ToolError};
use async_trait::async_trait;
use finq_llm::ToolDefinition;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A function the agent can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with JSON parameters matching [`Tool::input_schema`]
    async fn execute(&self, params: Value) -> Result<Value>;

    /// Unique name within a registry
    fn name(&self) -> &str;

    /// What the tool does, shown to the model
    fn description(&self) -> &str;

    /// JSON schema of the parameters
    fn input_schema(&self) -> Value;

    /// Definition handed to the model
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
    }
}

/// Deserialize tool parameters, mapping failures to [`ToolError::InvalidArguments`]
pub fn parse_params<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| ToolError::invalid(tool, e.to_string()))
}
