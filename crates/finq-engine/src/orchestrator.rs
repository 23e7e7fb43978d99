//! Model fallback ladder
//!
//! Candidates are tried best first through the gateway, so each
//! `provider/model` pair has its own circuit. The first response that passes
//! the [`ResponseValidator`] wins; an invalid response counts as a failure of
//! that candidate. When no model answers, [`Orchestrator::answer`] falls back
//! to the facts-only template.

use crate::enrichment::EnrichmentResult;
use crate::error::{EngineError, ProviderError, Result};
use crate::fallback::first_success;
use crate::gateway::ProviderGateway;
use crate::intent::Intent;
use crate::prompt::ModelRequest;
use crate::template::TemplateResponder;
use crate::validator::ResponseValidator;
use finq_llm::{CompletionResponse, LLMProvider};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One model on one provider
#[derive(Clone)]
pub struct ModelCandidate {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl fmt::Debug for ModelCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl ModelCandidate {
    /// Pair a provider with a model it serves
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// `provider/model`, also the circuit breaker key
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider.name(), self.model)
    }

    /// Model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the provider takes native tool definitions
    pub fn supports_tools(&self) -> bool {
        self.provider.supports_tools()
    }
}

/// Where an answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// A language model
    Model,
    /// The facts-only template
    Template,
    /// A user-visible failure (apology)
    Error,
}

impl SourceTag {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Template => "template",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated completion and the candidate that produced it
#[derive(Debug, Clone)]
pub struct ModelReply {
    /// `provider/model` of the winner
    pub candidate: String,
    /// Raw completion
    pub response: CompletionResponse,
}

/// Final text of the fallback ladder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResponse {
    /// Answer text
    pub text: String,
    /// Winning candidate, if a model answered
    pub model: Option<String>,
    /// Provenance
    pub source: SourceTag,
}

/// Tries model candidates in order
pub struct Orchestrator {
    gateway: ProviderGateway,
    candidates: Vec<ModelCandidate>,
    validator: ResponseValidator,
    template: TemplateResponder,
    timeout: Duration,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("candidates", &self.candidates)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator; `candidates` are ordered best first
    pub fn new(
        gateway: ProviderGateway,
        candidates: Vec<ModelCandidate>,
        validator: ResponseValidator,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            candidates,
            validator,
            template: TemplateResponder::new(),
            timeout,
        }
    }

    /// Candidate ids, best first
    pub fn candidates(&self) -> Vec<String> {
        self.candidates.iter().map(ModelCandidate::id).collect()
    }

    /// Template used when every model fails
    pub fn template(&self) -> &TemplateResponder {
        &self.template
    }

    /// Validator applied to model text
    pub fn validator(&self) -> &ResponseValidator {
        &self.validator
    }

    /// First validated completion from the candidate list
    ///
    /// A response carrying a tool call is valid regardless of its text.
    pub async fn complete(&self, request: &ModelRequest) -> Result<ModelReply> {
        match first_success(&self.candidates, |c| self.try_candidate(c, request)).await {
            Ok((index, reply)) => {
                info!(model = %reply.candidate, fallbacks = index, "Model answered");
                Ok(reply)
            }
            Err(failures) => {
                warn!(attempts = failures.len(), "Every model candidate failed");
                Err(EngineError::AllProvidersExhausted {
                    attempts: failures.len(),
                    failures,
                })
            }
        }
    }

    async fn try_candidate(
        &self,
        candidate: &ModelCandidate,
        request: &ModelRequest,
    ) -> std::result::Result<ModelReply, ProviderError> {
        let label = candidate.id();
        let mut request = request.retarget(candidate.model());
        if !candidate.supports_tools() && !request.tools().is_empty() {
            request = request.with_tools(Vec::new());
        }
        let completion = request.to_completion();

        let call = async {
            candidate
                .provider
                .complete(completion)
                .await
                .map_err(|e| ProviderError::from_llm(&label, e))
        };
        let outcome = self
            .gateway
            .call_validated(&label, self.timeout, call, |response: &CompletionResponse| {
                if response.tool_call().is_some() {
                    return Ok(());
                }
                self.validator.validate(&response.text()).map_err(|r| r.to_string())
            })
            .await;

        match outcome {
            Ok(response) => Ok(ModelReply {
                candidate: label,
                response,
            }),
            Err(e) => {
                warn!(model = %label, error = %e, "Model candidate failed");
                Err(e)
            }
        }
    }

    /// Model answer, or the facts-only template when no model answers
    pub async fn answer(&self, request: &ModelRequest, intent: &Intent, facts: &EnrichmentResult) -> ModelResponse {
        match self.complete(request).await {
            Ok(reply) => ModelResponse {
                text: reply.response.text().trim().to_string(),
                model: Some(reply.candidate),
                source: SourceTag::Model,
            },
            Err(e) => {
                info!(error = %e, facts = facts.len(), "Falling back to template answer");
                ModelResponse {
                    text: self.template.respond(intent, facts),
                    model: None,
                    source: SourceTag::Template,
                }
            }
        }
    }
}
