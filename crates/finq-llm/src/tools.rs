//! Tool definition types for function calling

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the registered tool)
    pub name: String,

    /// What the tool does
    pub description: String,

    /// JSON schema of the tool input
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// One-line description used when tools are listed in a prompt
    pub fn summary_line(&self) -> String {
        format!("- {}: {} (input schema: {})", self.name, self.description, self.input_schema)
    }
}

/// Helpers to build JSON schemas for tool inputs
pub mod schema {
    use serde_json::{Value, json};

    /// Object schema with properties
    ///
    /// ```
    /// use finq_llm::tools::schema;
    /// use serde_json::json;
    ///
    /// let schema = schema::object(
    ///     json!({ "symbol": schema::string("Ticker symbol") }),
    ///     &["symbol"],
    /// );
    /// assert_eq!(schema["required"][0], "symbol");
    /// ```
    pub fn object(properties: Value, required: &[&str]) -> Value {
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// String property schema
    pub fn string(description: &str) -> Value {
        json!({ "type": "string", "description": description })
    }

    /// String property restricted to a set of values
    pub fn string_enum(description: &str, values: &[&str]) -> Value {
        json!({ "type": "string", "description": description, "enum": values })
    }

    /// Number property schema
    pub fn number(description: &str) -> Value {
        json!({ "type": "number", "description": description })
    }

    /// Integer property schema
    pub fn integer(description: &str) -> Value {
        json!({ "type": "integer", "description": description })
    }

    /// Array property schema
    pub fn array(description: &str, items: Value) -> Value {
        json!({ "type": "array", "description": description, "items": items })
    }
}
