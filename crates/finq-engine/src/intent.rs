//! Deterministic query intent classification
//!
//! Tickers come from two sources merged in text order: explicit symbols
//! (`AAPL`, `$nvda`) and a company-name table (`apple` -> `AAPL`). The
//! category comes from keyword scoring with ties broken
//! portfolio > comparison > price > general.

use crate::error::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

/// Query category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// Price or quote lookup
    Price,
    /// Side-by-side comparison
    Comparison,
    /// Portfolio construction
    Portfolio,
    /// Anything else
    General,
}

impl QueryCategory {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Comparison => "comparison",
            Self::Portfolio => "portfolio",
            Self::General => "general",
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Investor risk profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    /// Low risk, steady returns
    Conservative,
    /// Balanced growth and stability
    Moderate,
    /// High growth potential, higher risk
    Aggressive,
    /// Maximum growth, maximum risk
    VeryAggressive,
}

impl RiskProfile {
    /// Display name
    pub fn label(self) -> &'static str {
        match self {
            Self::Conservative => "Conservative",
            Self::Moderate => "Moderate",
            Self::Aggressive => "Aggressive",
            Self::VeryAggressive => "Very Aggressive",
        }
    }

    /// Parse a profile name, accepting spaces, dashes or underscores
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(char::is_ascii_alphabetic)
            .collect();
        match normalized.as_str() {
            "conservative" => Some(Self::Conservative),
            "moderate" => Some(Self::Moderate),
            "aggressive" => Some(Self::Aggressive),
            "veryaggressive" => Some(Self::VeryAggressive),
            _ => None,
        }
    }
}

/// Investment amount assumed when a portfolio query names none
pub const DEFAULT_INVESTMENT: f64 = 10_000.0;

/// Derived intent of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Category
    pub category: QueryCategory,
    /// Ticker symbols in first-seen order
    pub tickers: Vec<String>,
    /// Risk profile (portfolio queries)
    pub risk_profile: Option<RiskProfile>,
    /// Amount to invest (portfolio queries)
    pub amount: Option<f64>,
}

impl Intent {
    /// Check the ticker invariant: uppercase, 1-5 alphanumeric, unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for t in &self.tickers {
            if !is_valid_symbol(t) {
                return Err(EngineError::InvalidIntent(format!("invalid ticker '{t}'")));
            }
            if !seen.insert(t) {
                return Err(EngineError::InvalidIntent(format!("duplicate ticker '{t}'")));
            }
        }
        Ok(())
    }
}

/// Whether `s` is an uppercase 1-5 character alphanumeric symbol
pub fn is_valid_symbol(s: &str) -> bool {
    (1..=5).contains(&s.len())
        && s.starts_with(|c: char| c.is_ascii_uppercase())
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// An immutable classified query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    text: String,
    intent: Intent,
    conversation_id: String,
}

impl Query {
    /// Build a query; empty text violates the contract
    pub fn new(
        text: impl Into<String>,
        conversation_id: impl Into<String>,
        classifier: &IntentClassifier,
    ) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(EngineError::InvalidIntent("empty query".to_string()));
        }
        let intent = classifier.classify(&text);
        intent.validate()?;
        Ok(Self {
            text,
            intent,
            conversation_id: conversation_id.into(),
        })
    }

    /// Raw text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Derived intent
    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    /// Conversation id
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

/// Company name to ticker table
const COMPANY_TICKERS: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("amazon", "AMZN"),
    ("tesla", "TSLA"),
    ("meta", "META"),
    ("facebook", "META"),
    ("nvidia", "NVDA"),
    ("netflix", "NFLX"),
    ("amd", "AMD"),
    ("intel", "INTC"),
    ("ibm", "IBM"),
    ("oracle", "ORCL"),
    ("salesforce", "CRM"),
    ("adobe", "ADBE"),
    ("paypal", "PYPL"),
    ("qualcomm", "QCOM"),
    ("cisco", "CSCO"),
    ("broadcom", "AVGO"),
    ("jpmorgan", "JPM"),
    ("jp morgan", "JPM"),
    ("bank of america", "BAC"),
    ("wells fargo", "WFC"),
    ("goldman sachs", "GS"),
    ("morgan stanley", "MS"),
    ("citigroup", "C"),
    ("berkshire", "BRK"),
    ("visa", "V"),
    ("mastercard", "MA"),
    ("walmart", "WMT"),
    ("costco", "COST"),
    ("home depot", "HD"),
    ("nike", "NKE"),
    ("starbucks", "SBUX"),
    ("mcdonalds", "MCD"),
    ("mcdonald's", "MCD"),
    ("coca cola", "KO"),
    ("coca-cola", "KO"),
    ("pepsi", "PEP"),
    ("pepsico", "PEP"),
    ("procter & gamble", "PG"),
    ("pfizer", "PFE"),
    ("johnson & johnson", "JNJ"),
    ("johnson", "JNJ"),
    ("merck", "MRK"),
    ("unitedhealth", "UNH"),
    ("abbvie", "ABBV"),
    ("exxon", "XOM"),
    ("chevron", "CVX"),
    ("boeing", "BA"),
    ("disney", "DIS"),
    ("comcast", "CMCSA"),
    ("verizon", "VZ"),
    ("at&t", "T"),
    ("ford", "F"),
    ("general motors", "GM"),
    ("uber", "UBER"),
    ("lyft", "LYFT"),
    ("airbnb", "ABNB"),
    ("spotify", "SPOT"),
    ("snapchat", "SNAP"),
    ("zoom", "ZM"),
    ("shopify", "SHOP"),
    ("robinhood", "HOOD"),
    ("palantir", "PLTR"),
    ("coinbase", "COIN"),
];

/// Uppercase words that look like symbols but are not
const STOP_WORDS: &[&str] = &[
    "A", "I", "AI", "AM", "AN", "AND", "ANY", "API", "ARE", "AS", "AT", "ATH", "BE", "BUY",
    "BY", "CEO", "CFO", "CPI", "DO", "EPS", "ETF", "EU", "FAQ", "FED", "FOR", "GDP", "GO",
    "HI", "HOW", "IF", "IN", "IPO", "IS", "IT", "ME", "MY", "NO", "NOT", "NYSE", "OF", "OK",
    "ON", "OR", "PE", "Q1", "Q2", "Q3", "Q4", "ROI", "SEC", "SELL", "SO", "THE", "TO", "UK",
    "UP", "US", "USA", "USD", "VS", "WE", "WHAT", "WHY", "WHO", "YOY",
];

// Whole words; a trailing `*` marks a stem, a space marks a phrase
const PORTFOLIO_KEYWORDS: &[&str] = &[
    "portfolio",
    "portfolios",
    "build",
    "invest",
    "investing",
    "investment",
    "investments",
    "allocation",
    "allocate",
    "diversif*",
    "risk profile",
    "rebalanc*",
];
const COMPARISON_KEYWORDS: &[&str] = &[
    "compare",
    "compared",
    "comparing",
    "comparison",
    "vs",
    "versus",
    "better",
    "difference between",
];
const PRICE_KEYWORDS: &[&str] = &[
    "price", "prices", "priced", "stock", "stocks", "quote", "trading at", "worth", "cost", "costs",
];

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z][A-Za-z0-9]{0,4})\b|\b([A-Z][A-Z0-9]{0,4})\b").expect("valid regex")
});

static COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    let mut names: Vec<&str> = COMPANY_TICKERS.iter().map(|(name, _)| *name).collect();
    // longest first so "bank of america" wins over shorter overlapping names
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    let alternation = names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).expect("valid regex")
});

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$\s?(\d[\d,]*(?:\.\d+)?)\s*(k|m|thousand|million)?\b|\b(\d[\d,]*(?:\.\d+)?)\s*(k|m|thousand|million)?\s*(?:dollars|usd|bucks)\b",
    )
    .expect("valid regex")
});

/// Stateless classifier
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    max_tickers: usize,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(5)
    }
}

impl IntentClassifier {
    /// Create a classifier keeping at most `max_tickers` symbols
    pub fn new(max_tickers: usize) -> Self {
        Self { max_tickers }
    }

    /// Classify a query
    pub fn classify(&self, text: &str) -> Intent {
        let tickers = self.extract_tickers(text);
        let category = categorize(text);

        let (risk_profile, amount) = if category == QueryCategory::Portfolio {
            (
                Some(parse_risk_profile(text)),
                Some(parse_amount(text).unwrap_or(DEFAULT_INVESTMENT)),
            )
        } else {
            (None, None)
        };

        Intent {
            category,
            tickers,
            risk_profile,
            amount,
        }
    }

    /// Extract tickers in first-seen order, deduplicated and capped
    pub fn extract_tickers(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();

        for caps in SYMBOL_RE.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                // "$tsla" is always a ticker
                found.push((m.start(), m.as_str().to_ascii_uppercase()));
            } else if let Some(m) = caps.get(2) {
                if !STOP_WORDS.contains(&m.as_str()) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }

        // ASCII lowercasing keeps byte offsets aligned with `text`
        let lowered = text.to_ascii_lowercase();
        for m in COMPANY_RE.find_iter(&lowered) {
            if let Some((_, ticker)) = COMPANY_TICKERS.iter().find(|(name, _)| *name == m.as_str()) {
                found.push((m.start(), (*ticker).to_string()));
            }
        }

        found.sort_by_key(|(pos, _)| *pos);

        let mut seen = HashSet::new();
        found
            .into_iter()
            .map(|(_, t)| t)
            .filter(|t| is_valid_symbol(t) && seen.insert(t.clone()))
            .take(self.max_tickers)
            .collect()
    }
}

fn tokens(lowered: &str) -> Vec<&str> {
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

fn keyword_score(normalized: &str, words: &[&str], keywords: &[&str]) -> usize {
    let padded = format!(" {normalized} ");
    keywords
        .iter()
        .filter(|&&kw| {
            if let Some(stem) = kw.strip_suffix('*') {
                words.iter().any(|w| w.starts_with(stem))
            } else if kw.contains(' ') {
                padded.contains(&format!(" {kw} "))
            } else {
                words.contains(&kw)
            }
        })
        .count()
}

/// Score categories by keyword hits
pub fn categorize(text: &str) -> QueryCategory {
    let lowered = text.to_ascii_lowercase();
    let normalized = tokens(&lowered).join(" ");
    let words: Vec<&str> = normalized.split(' ').collect();

    // tie-break order: first entry wins on equal scores
    let scored = [
        (QueryCategory::Portfolio, keyword_score(&normalized, &words, PORTFOLIO_KEYWORDS)),
        (QueryCategory::Comparison, keyword_score(&normalized, &words, COMPARISON_KEYWORDS)),
        (QueryCategory::Price, keyword_score(&normalized, &words, PRICE_KEYWORDS)),
    ];

    let mut best = (QueryCategory::General, 0);
    for (category, score) in scored {
        if score > best.1 {
            best = (category, score);
        }
    }
    best.0
}

/// Risk profile named in the text, `Moderate` when none is
pub fn parse_risk_profile(text: &str) -> RiskProfile {
    let q = text.to_ascii_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| q.contains(w));

    if any(&["very aggressive", "maximum growth", "max growth"]) {
        RiskProfile::VeryAggressive
    } else if any(&["conservative", "safe", "low risk", "low-risk"]) {
        RiskProfile::Conservative
    } else if any(&["aggressive", "high risk", "high-risk", "growth"]) {
        RiskProfile::Aggressive
    } else {
        RiskProfile::Moderate
    }
}

/// Dollar amount named in the text
pub fn parse_amount(text: &str) -> Option<f64> {
    let caps = AMOUNT_RE.captures(text)?;
    let (number, unit) = match (caps.get(1), caps.get(3)) {
        (Some(n), _) => (n, caps.get(2)),
        (None, Some(n)) => (n, caps.get(4)),
        _ => return None,
    };
    let value: f64 = number.as_str().replace(',', "").parse().ok()?;
    let multiplier = match unit.map(|u| u.as_str().to_ascii_lowercase()).as_deref() {
        Some("k" | "thousand") => 1_000.0,
        Some("m" | "million") => 1_000_000.0,
        _ => 1.0,
    };
    let amount = value * multiplier;
    (amount.is_finite() && amount > 0.0).then_some(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Intent {
        IntentClassifier::default().classify(text)
    }

    #[test]
    fn test_compare_two_tickers() {
        let intent = classify("compare AAPL vs MSFT");
        assert_eq!(intent.category, QueryCategory::Comparison);
        assert_eq!(intent.tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_company_names_merge_in_text_order() {
        let intent = classify("Is Tesla stock better than NVDA or apple?");
        assert_eq!(intent.tickers, vec!["TSLA", "NVDA", "AAPL"]);
        // "better" (comparison) ties "stock" (price); comparison wins
        assert_eq!(intent.category, QueryCategory::Comparison);
    }

    #[test]
    fn test_multi_word_company_and_dedup() {
        let intent = classify("bank of america price, and BAC news");
        assert_eq!(intent.tickers, vec!["BAC"]);
        assert_eq!(intent.category, QueryCategory::Price);
    }

    #[test]
    fn test_stop_words_and_dollar_prefix() {
        let intent = classify("What is the CEO of $amd saying about AI and the ETF market?");
        assert_eq!(intent.tickers, vec!["AMD"]);
        assert_eq!(intent.category, QueryCategory::General);
    }

    #[test]
    fn test_ticker_cap() {
        let classifier = IntentClassifier::new(2);
        let tickers = classifier.extract_tickers("AAPL MSFT GOOGL AMZN");
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_no_tickers() {
        let intent = classify("how does inflation affect bonds?");
        assert!(intent.tickers.is_empty());
        assert_eq!(intent.category, QueryCategory::General);
    }

    #[test]
    fn test_portfolio_defaults() {
        let intent = classify("help me build a diversified portfolio");
        assert_eq!(intent.category, QueryCategory::Portfolio);
        assert_eq!(intent.risk_profile, Some(RiskProfile::Moderate));
        assert_eq!(intent.amount, Some(DEFAULT_INVESTMENT));
    }

    #[test]
    fn test_portfolio_tie_beats_price() {
        // one portfolio hit ("invest") vs one price hit ("stock")
        assert_eq!(categorize("should I invest in this stock"), QueryCategory::Portfolio);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert_eq!(categorize("costco earnings call"), QueryCategory::General);
        assert_eq!(categorize("they are building a new fab"), QueryCategory::General);
        assert_eq!(categorize("how much does a share cost"), QueryCategory::Price);
        assert_eq!(categorize("diversification ideas"), QueryCategory::Portfolio);
        assert_eq!(categorize("rebalancing my investments"), QueryCategory::Portfolio);
    }

    #[test]
    fn test_risk_and_amount_parsing() {
        assert_eq!(parse_risk_profile("a very aggressive plan"), RiskProfile::VeryAggressive);
        assert_eq!(parse_risk_profile("something safe please"), RiskProfile::Conservative);
        assert_eq!(parse_risk_profile("aggressive growth"), RiskProfile::Aggressive);

        assert_eq!(parse_amount("invest $25,000 now"), Some(25_000.0));
        assert_eq!(parse_amount("I have $50k"), Some(50_000.0));
        assert_eq!(parse_amount("put 2 million dollars to work"), Some(2_000_000.0));
        assert_eq!(parse_amount("no amount here"), None);
    }

    #[test]
    fn test_risk_profile_parse() {
        assert_eq!(RiskProfile::parse("very_aggressive"), Some(RiskProfile::VeryAggressive));
        assert_eq!(RiskProfile::parse("Very Aggressive"), Some(RiskProfile::VeryAggressive));
        assert_eq!(RiskProfile::parse("moderate"), Some(RiskProfile::Moderate));
        assert_eq!(RiskProfile::parse("yolo"), None);
    }

    #[test]
    fn test_query_rejects_empty_text() {
        let classifier = IntentClassifier::default();
        assert!(matches!(
            Query::new("   ", "c1", &classifier),
            Err(EngineError::InvalidIntent(_))
        ));
        let q = Query::new("AAPL price", "c1", &classifier).unwrap();
        assert_eq!(q.intent().tickers, vec!["AAPL"]);
        assert_eq!(q.conversation_id(), "c1");
    }

    #[test]
    fn test_symbol_validation() {
        assert!(is_valid_symbol("GOOGL"));
        assert!(is_valid_symbol("C"));
        assert!(!is_valid_symbol("GOOGLE"));
        assert!(!is_valid_symbol("aapl"));
        assert!(!is_valid_symbol("1ABC"));
    }
}
