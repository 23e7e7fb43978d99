//! Bounded tool-using agent loop
//!
//! Each step asks the model ladder for either a tool call or a final answer.
//! Tool output is fed back as an observation and the loop goes round again.
//! The loop ends on a final answer, at the step limit, when the model repeats
//! an identical tool call, or when no model is available.

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;
use crate::prompt::ModelRequest;
use crate::template::DISCLAIMER;
use finq_llm::{CompletionResponse, ContentBlock, Message};
use finq_tools::{ToolError, ToolRegistry};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default step limit
pub const DEFAULT_MAX_STEPS: usize = 6;

/// Longest observation fed back to the model, in characters
const MAX_OBSERVATION_CHARS: usize = 4000;

/// One executed tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    /// 1-based step number
    pub step: usize,
    /// Tool name as selected by the model
    pub tool: String,
    /// Arguments as selected by the model
    pub arguments: Value,
    /// Tool output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error observation on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    /// Whether the tool produced output
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model gave a final answer
    FinalAnswer,
    /// The step limit was reached
    StepLimit,
    /// The model repeated an identical tool call
    CycleDetected,
    /// No model candidate could answer
    ModelUnavailable,
}

/// Result of one agent run
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    /// Answer text; `None` when neither the model nor any tool produced anything
    pub answer: Option<String>,
    /// Candidate that produced the last model turn
    pub model: Option<String>,
    /// Why the loop stopped
    pub termination: Termination,
    /// Every tool call, in order
    pub trace: Vec<ToolInvocation>,
}

/// What the model asked for in one step
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Call {
        /// Native tool-use id, if the provider produced one
        id: Option<String>,
        tool: String,
        arguments: Value,
    },
    Final(String),
}

/// Tool-using loop over the model ladder
pub struct AgentLoop {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ToolRegistry>,
    max_steps: usize,
}

impl AgentLoop {
    /// Create a loop allowing at most `max_steps` model turns
    pub fn new(orchestrator: Arc<Orchestrator>, registry: Arc<ToolRegistry>, max_steps: usize) -> Self {
        Self {
            orchestrator,
            registry,
            max_steps: max_steps.max(1),
        }
    }

    /// Step limit
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Tool registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// System prompt addition describing the tools and the reply protocol
    fn protocol(&self) -> String {
        let tools: Vec<String> = self
            .registry
            .definitions()
            .iter()
            .map(finq_llm::ToolDefinition::summary_line)
            .collect();
        format!(
            "You can use these tools to look up live data:\n{}\n\n\
             If you cannot call tools natively, reply with exactly one JSON object: \
             {{\"tool\": \"<name>\", \"arguments\": {{...}}}} to call a tool, or \
             {{\"final_answer\": \"<answer>\"}} when you are done. \
             Never repeat a tool call with the same arguments.",
            tools.join("\n")
        )
    }

    /// Run the loop from an assembled request
    pub async fn run(&self, request: &ModelRequest) -> AgentOutcome {
        let base = request
            .with_system_appendix(&self.protocol())
            .with_tools(self.registry.definitions());

        let mut followups: Vec<Message> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut trace: Vec<ToolInvocation> = Vec::new();
        let mut model = None;
        let mut termination = Termination::StepLimit;

        for step in 1..=self.max_steps {
            let reply = match self.orchestrator.complete(&base.with_followups(followups.clone())).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(step, error = %e, "No model available, ending agent loop");
                    termination = Termination::ModelUnavailable;
                    break;
                }
            };
            model = Some(reply.candidate.clone());

            let (id, tool, arguments) = match parse_action(&reply.response) {
                Action::Final(text) => match self.orchestrator.validator().validate(&text) {
                    Ok(()) => {
                        info!(step, tools_used = trace.len(), "Agent finished");
                        return AgentOutcome {
                            answer: Some(text),
                            model,
                            termination: Termination::FinalAnswer,
                            trace,
                        };
                    }
                    Err(reason) => {
                        // the raw reply passed validation only as JSON; the answer inside must too
                        warn!(step, %reason, "Rejected final answer");
                        followups.push(Message::assistant(reply.response.text()));
                        followups.push(Message::user(format!(
                            "Your final answer was rejected ({reason}). \
                             Answer the question using the observations so far."
                        )));
                        continue;
                    }
                },
                Action::Call { id, tool, arguments } => (id, tool, arguments),
            };

            if !seen.insert((tool.clone(), arguments.to_string())) {
                warn!(step, tool = %tool, "Repeated tool call, stopping");
                termination = Termination::CycleDetected;
                break;
            }

            info!(step, tool = %tool, "Agent selected tool");
            let invocation = self.invoke(step, tool, arguments).await;
            let observation = observation_text(&invocation);

            match id {
                Some(id) => {
                    followups.push(reply.response.message.clone());
                    followups.push(Message::tool_result(id, observation, !invocation.succeeded()));
                }
                None => {
                    followups.push(Message::assistant(reply.response.text()));
                    followups.push(Message::user(format!(
                        "Observation from {}: {observation}",
                        invocation.tool
                    )));
                }
            }
            trace.push(invocation);
        }

        if termination == Termination::StepLimit {
            warn!(error = %EngineError::StepLimitExceeded(self.max_steps), "Agent loop cut short");
        }
        AgentOutcome {
            answer: best_effort(&trace),
            model,
            termination,
            trace,
        }
    }

    async fn invoke(&self, step: usize, tool: String, arguments: Value) -> ToolInvocation {
        match self.registry.execute(&tool, arguments.clone()).await {
            Ok(output) => ToolInvocation {
                step,
                tool,
                arguments,
                output: Some(output),
                error: None,
            },
            Err(e) => {
                let error = match e {
                    ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. } => {
                        EngineError::ToolSelectionInvalid(e.to_string()).to_string()
                    }
                    ToolError::ExecutionFailed { .. } => e.to_string(),
                };
                debug!(step, tool = %tool, error = %error, "Tool call failed");
                ToolInvocation {
                    step,
                    tool,
                    arguments,
                    output: None,
                    error: Some(error),
                }
            }
        }
    }
}

fn observation_text(invocation: &ToolInvocation) -> String {
    let text = match (&invocation.output, &invocation.error) {
        (Some(output), _) => output.to_string(),
        (None, Some(error)) => format!("error: {error}"),
        (None, None) => "no output".to_string(),
    };
    clip(&text, MAX_OBSERVATION_CHARS)
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Read the model's choice from a native tool call or JSON in the text
fn parse_action(response: &CompletionResponse) -> Action {
    if let Some(ContentBlock::ToolUse { id, name, input }) = response.message.tool_uses().first() {
        return Action::Call {
            id: Some(id.clone()),
            tool: name.clone(),
            arguments: input.clone(),
        };
    }

    let text = response.text();
    let Some(Value::Object(object)) = embedded_json(&text) else {
        return Action::Final(text.trim().to_string());
    };
    if let Some(answer) = object.get("final_answer") {
        let answer = answer.as_str().map_or_else(|| answer.to_string(), ToString::to_string);
        return Action::Final(answer);
    }
    match object.get("tool").and_then(Value::as_str) {
        Some(tool) => Action::Call {
            id: None,
            tool: tool.to_string(),
            arguments: object
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        },
        None => Action::Final(text.trim().to_string()),
    }
}

/// First JSON object in `text`, allowing code fences and surrounding prose
fn embedded_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Answer stitched together from successful tool output
fn best_effort(trace: &[ToolInvocation]) -> Option<String> {
    let lines: Vec<String> = trace
        .iter()
        .filter_map(|inv| {
            inv.output
                .as_ref()
                .map(|out| format!("- {} {}: {}", inv.tool, inv.arguments, clip(&out.to_string(), 600)))
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "I couldn't finish the analysis, but here is what I found:\n\n{}\n\n{DISCLAIMER}",
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::enrichment::EnrichmentResult;
    use crate::gateway::ProviderGateway;
    use crate::health::HealthRegistry;
    use crate::intent::{Intent, QueryCategory};
    use crate::memory::ConversationMemory;
    use crate::orchestrator::ModelCandidate;
    use crate::orchestrator::tests::{scripted, tool_use};
    use crate::prompt::PromptAssembler;
    use crate::providers::testing::StaticProvider;
    use crate::tools::testing::cascade_over;
    use crate::validator::ResponseValidator;
    use finq_llm::LLMError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn request() -> ModelRequest {
        let intent = Intent {
            category: QueryCategory::General,
            tickers: vec![],
            risk_profile: None,
            amount: None,
        };
        PromptAssembler::with_default_preamble(8000, 2)
            .unwrap()
            .assemble(
                "How is NVDA doing?",
                &intent,
                &EnrichmentResult::new(),
                &ConversationMemory::new(5),
                "primary",
                0.1,
                500,
            )
            .unwrap()
    }

    fn agent(llm: crate::orchestrator::tests::MockLlm, max_steps: usize) -> AgentLoop {
        let gateway = ProviderGateway::new(HealthRegistry::new(BreakerConfig::default()));
        let orchestrator = Orchestrator::new(
            gateway,
            vec![ModelCandidate::new(Arc::new(llm), "primary")],
            ResponseValidator::new(4000),
            Duration::from_secs(5),
        );
        let registry = crate::tools::registry(cascade_over(
            StaticProvider::new("static")
                .with_quote("NVDA", 120.0, 3.0)
                .with_headline("Nvidia unveils new chips"),
        ));
        AgentLoop::new(Arc::new(orchestrator), Arc::new(registry), max_steps)
    }

    #[test]
    fn test_parse_action() {
        let native = tool_use("price_lookup", json!({"symbol": "AAPL"}));
        assert!(matches!(
            parse_action(&native),
            Action::Call { id: Some(_), ref tool, .. } if tool == "price_lookup"
        ));

        let json_call = CompletionResponse::text_only(
            "```json\n{\"tool\": \"news_retrieval\", \"arguments\": {\"query\": \"TSLA\"}}\n```",
        );
        assert_eq!(
            parse_action(&json_call),
            Action::Call {
                id: None,
                tool: "news_retrieval".into(),
                arguments: json!({"query": "TSLA"}),
            }
        );

        let final_json = CompletionResponse::text_only(r#"{"final_answer": "Buy low."}"#);
        assert_eq!(parse_action(&final_json), Action::Final("Buy low.".into()));

        let plain = CompletionResponse::text_only("  NVDA is up 3% today.  ");
        assert_eq!(parse_action(&plain), Action::Final("NVDA is up 3% today.".into()));
    }

    #[tokio::test]
    async fn test_tool_then_final_answer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let llm = scripted("openai", move |req| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(tool_use("price_lookup", json!({"symbol": "NVDA"}))),
                _ => {
                    let last = req.messages.last().unwrap();
                    assert!(matches!(
                        &last.content,
                        Some(finq_llm::MessageContent::Blocks(b))
                            if matches!(&b[0], ContentBlock::ToolResult { content, .. } if content.contains("120"))
                    ));
                    Ok(CompletionResponse::text_only("NVDA trades at $120.00, up 3%."))
                }
            }
        });

        let outcome = agent(llm, 6).run(&request()).await;
        assert_eq!(outcome.termination, Termination::FinalAnswer);
        assert_eq!(outcome.answer.as_deref(), Some("NVDA trades at $120.00, up 3%."));
        assert_eq!(outcome.model.as_deref(), Some("openai/primary"));
        assert_eq!(outcome.trace.len(), 1);
        assert!(outcome.trace[0].succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_call_is_a_cycle() {
        let llm = scripted("openai", |_| {
            Ok(CompletionResponse::text_only(
                r#"{"tool": "price_lookup", "arguments": {"symbol": "NVDA"}}"#,
            ))
        });

        let outcome = agent(llm, 6).run(&request()).await;
        assert_eq!(outcome.termination, Termination::CycleDetected);
        assert_eq!(outcome.trace.len(), 1);
        let answer = outcome.answer.unwrap();
        assert!(answer.contains("price_lookup"));
        assert!(answer.ends_with(DISCLAIMER));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let llm = scripted("openai", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(tool_use("news_retrieval", json!({"query": format!("topic {n}")})))
        });

        let outcome = agent(llm, 3).run(&request()).await;
        assert_eq!(outcome.termination, Termination::StepLimit);
        assert_eq!(outcome.trace.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let llm = scripted("openai", move |_| match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(tool_use("stock_screener", json!({}))),
            _ => Ok(CompletionResponse::text_only("I could not screen stocks, sorry for that.")),
        });

        let outcome = agent(llm, 6).run(&request()).await;
        assert_eq!(outcome.termination, Termination::FinalAnswer);
        assert!(!outcome.trace[0].succeeded());
        assert!(outcome.trace[0].error.as_deref().unwrap().starts_with("invalid tool selection"));
    }

    #[tokio::test]
    async fn test_empty_final_answer_is_not_surfaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let llm = scripted("openai", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse::text_only(r#"{"final_answer": ""}"#))
        });

        let outcome = agent(llm, 3).run(&request()).await;
        assert_eq!(outcome.termination, Termination::StepLimit);
        assert_eq!(outcome.answer, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refusal_inside_final_answer_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let llm = scripted("openai", move |req| match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(CompletionResponse::text_only(
                r#"{"final_answer": "I'm sorry, I can't help with that."}"#,
            )),
            _ => {
                let last = req.messages.last().unwrap().joined_text();
                assert!(last.contains("model refused"));
                Ok(CompletionResponse::text_only(r#"{"final_answer": "NVDA trades at $120.00."}"#))
            }
        });

        let outcome = agent(llm, 6).run(&request()).await;
        assert_eq!(outcome.termination, Termination::FinalAnswer);
        assert_eq!(outcome.answer.as_deref(), Some("NVDA trades at $120.00."));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_model_unavailable() {
        let llm = scripted("openai", |_| Err(LLMError::Unreachable("down".into())));
        let outcome = agent(llm, 6).run(&request()).await;
        assert_eq!(outcome.termination, Termination::ModelUnavailable);
        assert_eq!(outcome.answer, None);
        assert!(outcome.trace.is_empty());
    }
}
