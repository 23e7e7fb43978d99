//! Deterministic answers used when no model can respond

use crate::enrichment::EnrichmentResult;
use crate::intent::Intent;

/// Disclaimer carried by every answer
pub const DISCLAIMER: &str =
    "This is not financial advice. Do your own research or consult a licensed financial advisor.";

/// Answer when nothing at all could be produced
pub const APOLOGY: &str = "Sorry, I couldn't answer that right now. Market data and language \
models are temporarily unavailable. Please try again in a moment.";

/// Builds facts-only answers
#[derive(Debug, Clone, Default)]
pub struct TemplateResponder;

impl TemplateResponder {
    /// Create a responder
    pub fn new() -> Self {
        Self
    }

    /// Facts-only answer, or the apology when there are no facts
    ///
    /// The output mentions only values present in `facts`.
    pub fn respond(&self, intent: &Intent, facts: &EnrichmentResult) -> String {
        if facts.is_empty() {
            return APOLOGY.to_string();
        }

        let mut out = String::from(
            "I couldn't reach a language model, so here is the latest data I could fetch:\n\n",
        );
        for (key, fact) in facts.ranked(intent) {
            out.push_str(&format!(
                "- {key}: {} (source: {})\n",
                fact.value.render(),
                fact.provider
            ));
        }
        if !facts.missing().is_empty() {
            let missing: Vec<String> = facts.missing().iter().map(ToString::to_string).collect();
            out.push_str(&format!("\nUnavailable: {}\n", missing.join(", ")));
        }
        out.push('\n');
        out.push_str(DISCLAIMER);
        out
    }

    /// Apology text for user-visible failures
    pub fn apology(&self) -> &'static str {
        APOLOGY
    }
}
