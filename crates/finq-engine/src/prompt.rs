//! Prompt assembly under a character budget
//!
//! The system text (preamble plus disclaimer instruction) is fixed. The user
//! prompt carries facts, recent memory turns, few-shot examples and the
//! question. When the total exceeds the budget, content is dropped in this
//! order until it fits:
//!
//! 1. oldest memory turn
//! 2. least relevant fact
//! 3. few-shot examples
//! 4. trailing characters of the question

use crate::enrichment::EnrichmentResult;
use crate::error::{EngineError, Result};
use crate::intent::{Intent, QueryCategory};
use crate::memory::ConversationMemory;
use crate::template::DISCLAIMER;
use finq_llm::{CompletionRequest, Message, ToolDefinition};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

/// Default role and capabilities preamble
pub const DEFAULT_PREAMBLE: &str = "You are an expert AI stock market assistant.

Your capabilities:
- Provide live stock prices and market data
- Compare multiple stocks side-by-side
- Build personalized investment portfolios based on risk profiles
- Explain market trends and economic concepts

Guidelines:
- Be concise and informative
- Use only the market data provided below for numbers; say so when data is missing
- Format responses with markdown for readability
- When comparing stocks, provide detailed metrics
- When building portfolios, consider the user's risk tolerance";

const SYSTEM_TEMPLATE: &str = "{{ preamble }}

Always end your answer with this disclaimer: {{ disclaimer }}";

const USER_TEMPLATE: &str = "{% if facts %}Market data:
{% for f in facts %}- {{ f.key }}: {{ f.value }} (source: {{ f.provider }})
{% endfor %}
{% endif %}{% if memory %}Recent conversation:
{% for t in memory %}{{ t.role }}: {{ t.text }}
{% endfor %}
{% endif %}{% if examples %}Examples:
{% for e in examples %}Q: {{ e.question }}
A: {{ e.answer }}
{% endfor %}
{% endif %}Question: {{ question }}";

#[derive(Debug, Clone, Serialize)]
struct FactLine {
    key: String,
    value: String,
    provider: String,
}

#[derive(Debug, Clone, Serialize)]
struct TurnLine {
    role: &'static str,
    text: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Example {
    question: &'static str,
    answer: &'static str,
}

fn examples_for(category: QueryCategory) -> Vec<Example> {
    let example = |question, answer| Example { question, answer };
    match category {
        QueryCategory::Price => vec![example(
            "What is MSFT trading at?",
            "Microsoft (MSFT) is at $415.20, up 0.8% on the day.",
        )],
        QueryCategory::Comparison => vec![example(
            "Compare KO vs PEP",
            "| Metric | KO | PEP |\n|---|---|---|\n| Price | $62.10 | $168.40 |\nKO gained more today.",
        )],
        QueryCategory::Portfolio => vec![example(
            "Build a conservative portfolio with $20,000",
            "A conservative mix is about 40% stocks, 50% bonds and 10% cash.",
        )],
        QueryCategory::General => vec![example(
            "What does a rising 10-year yield mean for stocks?",
            "Higher yields raise discount rates, which tends to weigh on growth stocks.",
        )],
    }
}

/// Immutable request for one model call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    system: String,
    messages: Vec<Message>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    /// System text
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Messages; the first is the assembled user prompt
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Assembled user prompt
    pub fn prompt(&self) -> &str {
        self.messages.first().and_then(Message::text).unwrap_or_default()
    }

    /// Target model
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sampling temperature
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Token budget
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Tools offered to the model
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Same request aimed at another model
    pub fn retarget(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    /// Same request offering `tools`
    pub fn with_tools(&self, tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools,
            ..self.clone()
        }
    }

    /// Same request with extra text appended to the system prompt
    pub fn with_system_appendix(&self, appendix: &str) -> Self {
        Self {
            system: format!("{}\n\n{appendix}", self.system),
            ..self.clone()
        }
    }

    /// Same request followed by more conversation messages
    pub fn with_followups(&self, followups: Vec<Message>) -> Self {
        let mut messages = self.messages.clone();
        messages.extend(followups);
        Self {
            messages,
            ..self.clone()
        }
    }

    /// Characters in the system text and the user prompt
    pub fn total_chars(&self) -> usize {
        self.system.chars().count() + self.prompt().chars().count()
    }

    /// Provider-level completion request
    pub fn to_completion(&self) -> CompletionRequest {
        CompletionRequest::builder(self.model.clone())
            .system(self.system.clone())
            .messages(self.messages.clone())
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .tools(self.tools.clone())
            .build()
    }
}

/// Builds [`ModelRequest`]s within a character budget
#[derive(Debug)]
pub struct PromptAssembler {
    env: Environment<'static>,
    system: String,
    max_chars: usize,
    memory_turns: usize,
}

impl PromptAssembler {
    /// Create an assembler
    ///
    /// Fails when the preamble and disclaimer alone exceed `max_chars`.
    pub fn new(preamble: impl Into<String>, max_chars: usize, memory_turns: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("system", SYSTEM_TEMPLATE).map_err(render_error)?;
        env.add_template("user", USER_TEMPLATE).map_err(render_error)?;

        let preamble: String = preamble.into();
        let system = env
            .get_template("system")
            .and_then(|t| t.render(context! { preamble => preamble, disclaimer => DISCLAIMER }))
            .map_err(render_error)?;

        let assembler = Self {
            env,
            system,
            max_chars,
            memory_turns,
        };

        let fixed = assembler.system.chars().count()
            + assembler.render_user(&[], &[], &[], "")?.chars().count();
        if fixed > max_chars {
            return Err(EngineError::Config(format!(
                "prompt template needs {fixed} chars but the limit is {max_chars}"
            )));
        }
        Ok(assembler)
    }

    /// Assembler with the built-in preamble
    pub fn with_default_preamble(max_chars: usize, memory_turns: usize) -> Result<Self> {
        Self::new(DEFAULT_PREAMBLE, max_chars, memory_turns)
    }

    /// Rendered system text
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Character budget
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn render_user(
        &self,
        facts: &[FactLine],
        memory: &[TurnLine],
        examples: &[Example],
        question: &str,
    ) -> Result<String> {
        self.env
            .get_template("user")
            .and_then(|t| {
                t.render(context! {
                    facts => facts,
                    memory => memory,
                    examples => examples,
                    question => question,
                })
            })
            .map_err(render_error)
    }

    /// Build a request for `question`
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        &self,
        question: &str,
        intent: &Intent,
        facts: &EnrichmentResult,
        memory: &ConversationMemory,
        model: &str,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<ModelRequest> {
        let mut fact_lines: Vec<FactLine> = facts
            .ranked(intent)
            .into_iter()
            .map(|(key, fact)| FactLine {
                key: key.to_string(),
                value: fact.value.render(),
                provider: fact.provider.clone(),
            })
            .collect();
        let mut turn_lines: Vec<TurnLine> = memory
            .last(self.memory_turns)
            .into_iter()
            .map(|t| TurnLine {
                role: t.role.label(),
                text: t.text.clone(),
            })
            .collect();
        let mut examples = examples_for(intent.category);
        let mut question = question.to_string();

        let system_chars = self.system.chars().count();
        let mut prompt = self.render_user(&fact_lines, &turn_lines, &examples, &question)?;

        loop {
            let total = system_chars + prompt.chars().count();
            if total <= self.max_chars {
                break;
            }

            if !turn_lines.is_empty() {
                turn_lines.remove(0);
            } else if !fact_lines.is_empty() {
                fact_lines.pop();
            } else if !examples.is_empty() {
                examples.clear();
            } else {
                let keep = question.chars().count().saturating_sub(total - self.max_chars);
                question = question.chars().take(keep).collect();
                debug!(kept_chars = keep, "Clipped question to fit the prompt budget");
            }
            prompt = self.render_user(&fact_lines, &turn_lines, &examples, &question)?;
        }

        Ok(ModelRequest {
            system: self.system.clone(),
            messages: vec![Message::user(prompt)],
            model: model.to_string(),
            temperature,
            max_tokens,
            tools: Vec::new(),
        })
    }
}

fn render_error(err: minijinja::Error) -> EngineError {
    EngineError::Config(format!("prompt template: {err}"))
}
