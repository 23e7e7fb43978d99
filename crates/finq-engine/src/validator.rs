//! Model response validation

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static REFUSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:i'?m sorry|i am sorry|sorry,|i apologi[sz]e|i cannot|i can'?t|i'?m unable|i am unable|as an ai(?: language model)?)\b",
    )
    .expect("valid regex")
});

static ERROR_ECHO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(?:error:|\{\s*"error"|internal server error|rate limit exceeded|bad gateway|service unavailable)|traceback \(most recent call last\)"#,
    )
    .expect("valid regex")
});

/// Why a response was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No visible text
    Empty,
    /// The model declined to answer
    Refusal,
    /// The text is an upstream error message
    ErrorEcho,
    /// Longer than the configured maximum
    TooLong {
        /// Characters in the response
        chars: usize,
        /// Configured limit
        max: usize,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty response"),
            Self::Refusal => f.write_str("model refused"),
            Self::ErrorEcho => f.write_str("response echoes an error"),
            Self::TooLong { chars, max } => write!(f, "response too long ({chars} > {max} chars)"),
        }
    }
}

/// Checks model text before it may be surfaced
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    max_chars: usize,
}

impl ResponseValidator {
    /// Validator accepting at most `max_chars` characters
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Accept or reject a response text
    pub fn validate(&self, text: &str) -> Result<(), Rejection> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Rejection::Empty);
        }
        if REFUSAL_RE.is_match(trimmed) {
            return Err(Rejection::Refusal);
        }
        if ERROR_ECHO_RE.is_match(trimmed) {
            return Err(Rejection::ErrorEcho);
        }
        let chars = trimmed.chars().count();
        if chars > self.max_chars {
            return Err(Rejection::TooLong {
                chars,
                max: self.max_chars,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_normal_answer() {
        let v = ResponseValidator::new(100);
        assert!(v.validate("AAPL trades at $190.12, up 1.2% today.").is_ok());
        // "sorry" mid-sentence is not a refusal
        assert!(v.validate("Tech had a sorry week, but AAPL held up.").is_ok());
    }

    #[test]
    fn test_rejections() {
        let v = ResponseValidator::new(20);
        assert_eq!(v.validate("   \n"), Err(Rejection::Empty));
        assert_eq!(v.validate("I'm sorry, I can't help"), Err(Rejection::Refusal));
        assert_eq!(v.validate("As an AI language model"), Err(Rejection::Refusal));
        assert_eq!(v.validate("Error: quota"), Err(Rejection::ErrorEcho));
        assert_eq!(v.validate(r#"{"error": "bad"}"#), Err(Rejection::ErrorEcho));
        assert_eq!(
            v.validate("a fairly long answer exceeding the limit"),
            Err(Rejection::TooLong { chars: 40, max: 20 })
        );
    }
}
