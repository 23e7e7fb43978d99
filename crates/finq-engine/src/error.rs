//! Error types for the query engine

use finq_llm::LLMError;
use thiserror::Error;

/// Failure of a single provider call, as seen by the gateway
///
/// Every variant except [`ProviderError::CircuitOpen`] counts against the
/// provider's health.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Call exceeded its per-call deadline
    #[error("{0} timed out")]
    Timeout(String),

    /// Provider asked us to slow down
    #[error("{provider} rate limited: {detail}")]
    RateLimited {
        /// Provider name
        provider: String,
        /// Upstream message
        detail: String,
    },

    /// Connection failed or the provider answered with a server error
    #[error("{provider} unreachable: {detail}")]
    Unreachable {
        /// Provider name
        provider: String,
        /// Upstream message
        detail: String,
    },

    /// Response could not be decoded
    #[error("{provider} returned a malformed response: {detail}")]
    MalformedResponse {
        /// Provider name
        provider: String,
        /// What was wrong
        detail: String,
    },

    /// Circuit is open; no call was made
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// Response decoded but failed plausibility checks
    #[error("{provider} failed validation: {detail}")]
    ValidationFailure {
        /// Provider name
        provider: String,
        /// Which check failed
        detail: String,
    },
}

impl ProviderError {
    /// Rate limited shorthand
    pub fn rate_limited(provider: &str, detail: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    /// Unreachable shorthand
    pub fn unreachable(provider: &str, detail: impl Into<String>) -> Self {
        Self::Unreachable {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    /// Malformed response shorthand
    pub fn malformed(provider: &str, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.to_string(),
            detail: detail.into(),
        }
    }

    /// Classify a reqwest transport error
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(provider.to_string())
        } else if err.is_decode() {
            Self::malformed(provider, err.to_string())
        } else if err.status().is_some_and(|s| s.as_u16() == 429) {
            Self::rate_limited(provider, err.to_string())
        } else {
            Self::unreachable(provider, err.to_string())
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            429 => Self::rate_limited(provider, body.to_string()),
            408 | 504 => Self::Timeout(provider.to_string()),
            _ => Self::unreachable(provider, format!("HTTP {status}: {body}")),
        }
    }

    /// Classify an LLM provider error for the candidate `label`
    pub fn from_llm(label: &str, err: LLMError) -> Self {
        match err {
            LLMError::Timeout(_) => Self::Timeout(label.to_string()),
            LLMError::RateLimited(detail) => Self::rate_limited(label, detail),
            LLMError::UnexpectedResponse(detail) => Self::malformed(label, detail),
            LLMError::Serialization(e) => Self::malformed(label, e.to_string()),
            other => Self::unreachable(label, other.to_string()),
        }
    }

    /// Short machine-readable tag
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unreachable { .. } => "unreachable",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::CircuitOpen(_) => "circuit_open",
            Self::ValidationFailure { .. } => "validation_failure",
        }
    }
}

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// A provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The data the intent cannot do without is unavailable
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Every candidate in a fallback chain failed
    #[error("all providers exhausted after {attempts} attempts")]
    AllProvidersExhausted {
        /// Number of candidates tried
        attempts: usize,
        /// Failure of each candidate, in order
        failures: Vec<ProviderError>,
    },

    /// The model selected a tool that does not exist or passed bad arguments
    #[error("invalid tool selection: {0}")]
    ToolSelectionInvalid(String),

    /// Agent loop ran out of steps
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(usize),

    /// Caller deadline expired before an answer was ready
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Query violated the intent contract (e.g. empty text)
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Short machine-readable tag, surfaced as `error_tag` on answers
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.tag(),
            Self::InsufficientData(_) => "insufficient_data",
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Self::ToolSelectionInvalid(_) => "tool_selection_invalid",
            Self::StepLimitExceeded(_) => "step_limit_exceeded",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::InvalidIntent(_) => "invalid_intent",
            Self::Config(_) => "config",
        }
    }
}

impl From<finq_utils::ConfigError> for EngineError {
    fn from(err: finq_utils::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::rate_limited("finnhub", "API limit reached");
        assert_eq!(err.to_string(), "finnhub rate limited: API limit reached");

        let err = EngineError::AllProvidersExhausted {
            attempts: 3,
            failures: vec![],
        };
        assert_eq!(err.to_string(), "all providers exhausted after 3 attempts");
    }

    #[test]
    fn test_llm_error_classification() {
        let label = "openai/gpt-4o-mini";
        assert_eq!(
            ProviderError::from_llm(label, LLMError::Timeout("x".into())),
            ProviderError::Timeout(label.to_string())
        );
        assert!(matches!(
            ProviderError::from_llm(label, LLMError::RateLimited("quota".into())),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_llm(label, LLMError::UnexpectedResponse("no choices".into())),
            ProviderError::MalformedResponse { .. }
        ));
        assert!(matches!(
            ProviderError::from_llm(label, LLMError::AuthenticationFailed),
            ProviderError::Unreachable { .. }
        ));
    }

    #[test]
    fn test_tags() {
        assert_eq!(EngineError::DeadlineExceeded.tag(), "deadline_exceeded");
        assert_eq!(
            EngineError::from(ProviderError::CircuitOpen("yahoo".into())).tag(),
            "circuit_open"
        );
    }
}
