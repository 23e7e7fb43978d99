//! Error types for LLM operations

use thiserror::Error;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur while talking to a completion model
#[derive(Error, Debug)]
pub enum LLMError {
    /// The request did not finish in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Provider refused the call because of quota or rate limits
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Connection could not be established or the server errored
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    /// Invalid API key or authentication failed
    #[error("Invalid API key or authentication failed")]
    AuthenticationFailed,

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Response body did not match the expected format
    #[error("Unexpected response format: {0}")]
    UnexpectedResponse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LLMError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: u16, body: String, model: &str) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed,
            404 => Self::ModelNotFound(model.to_string()),
            408 | 504 => Self::Timeout(format!("HTTP {status}")),
            429 => Self::RateLimited(body),
            400 | 422 => Self::InvalidRequest(body),
            _ => Self::Unreachable(format!("HTTP {status}: {body}")),
        }
    }

    /// Whether retrying the same model later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Unreachable(_)
        )
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::UnexpectedResponse(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            LLMError::from_status(429, "slow down".into(), "gpt-4o"),
            LLMError::RateLimited(_)
        ));
        assert!(matches!(
            LLMError::from_status(404, String::new(), "gpt-4o"),
            LLMError::ModelNotFound(m) if m == "gpt-4o"
        ));
        assert!(matches!(
            LLMError::from_status(503, String::new(), "gpt-4o"),
            LLMError::Unreachable(_)
        ));
        assert!(matches!(
            LLMError::from_status(401, String::new(), "gpt-4o"),
            LLMError::AuthenticationFailed
        ));
    }

    #[test]
    fn test_is_transient() {
        assert!(LLMError::Timeout("t".into()).is_transient());
        assert!(LLMError::RateLimited("r".into()).is_transient());
        assert!(!LLMError::AuthenticationFailed.is_transient());
        assert!(!LLMError::UnexpectedResponse("x".into()).is_transient());
    }
}
