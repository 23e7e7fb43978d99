//! Tool for model-portfolio allocations by risk profile

use crate::intent::{DEFAULT_INVESTMENT, Intent, QueryCategory, RiskProfile};
use async_trait::async_trait;
use finq_llm::tools::schema;
use finq_tools::{Tool, ToolError, parse_params};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const NAME: &str = "portfolio_builder";

/// Drift (percentage points) above which rebalancing is suggested
const REBALANCE_DRIFT: f64 = 5.0;

const STOCK_POSITIONS: &[&str] = &["AAPL", "MSFT", "JPM", "JNJ", "T", "VZ"];
const BOND_POSITIONS: &[&str] = &["BND (Total Bond)", "AGG (Core Bond)", "TLT (Long-term Treasury)"];
const CASH_POSITIONS: &[&str] = &["High-yield savings", "Money market funds"];

/// Target mix and outlook for one risk profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileTemplate {
    /// Stocks, percent
    pub stocks: f64,
    /// Bonds, percent
    pub bonds: f64,
    /// Cash, percent
    pub cash: f64,
    /// One-line description
    pub description: &'static str,
    /// Expected annual return range
    pub expected_return: &'static str,
    /// Risk level
    pub risk_level: &'static str,
}

impl ProfileTemplate {
    /// Template for a profile
    pub fn for_profile(profile: RiskProfile) -> Self {
        match profile {
            RiskProfile::Conservative => Self {
                stocks: 40.0,
                bonds: 50.0,
                cash: 10.0,
                description: "Low risk, steady returns",
                expected_return: "4-6%",
                risk_level: "Low",
            },
            RiskProfile::Moderate => Self {
                stocks: 60.0,
                bonds: 30.0,
                cash: 10.0,
                description: "Balanced growth and stability",
                expected_return: "6-8%",
                risk_level: "Medium",
            },
            RiskProfile::Aggressive => Self {
                stocks: 80.0,
                bonds: 15.0,
                cash: 5.0,
                description: "High growth potential, higher risk",
                expected_return: "8-12%",
                risk_level: "High",
            },
            RiskProfile::VeryAggressive => Self {
                stocks: 95.0,
                bonds: 5.0,
                cash: 0.0,
                description: "Maximum growth, maximum risk",
                expected_return: "10-15%",
                risk_level: "Very High",
            },
        }
    }
}

/// A holding inside an asset class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Ticker or instrument name
    pub name: String,
    /// Dollar amount
    pub amount: f64,
}

/// One asset class of a portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    /// "stocks", "bonds" or "cash"
    pub asset_class: String,
    /// Target percent
    pub percent: f64,
    /// Dollar amount
    pub amount: f64,
    /// Example holdings, split equally
    pub positions: Vec<Position>,
}

/// A model portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Profile display name
    pub risk_profile: String,
    /// Profile description
    pub description: String,
    /// Expected annual return range
    pub expected_return: String,
    /// Risk level
    pub risk_level: String,
    /// Total amount invested
    pub amount: f64,
    /// Stocks, bonds, cash
    pub allocation: Vec<AllocationLine>,
    /// Moves needed to reach the target from the current mix
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rebalancing: Vec<String>,
}

/// Current mix in percent, as reported by the user
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CurrentAllocation {
    /// Percent in stocks
    #[serde(default)]
    pub stocks: f64,
    /// Percent in bonds
    #[serde(default)]
    pub bonds: f64,
    /// Percent in cash
    #[serde(default)]
    pub cash: f64,
}

fn cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn line(asset_class: &str, percent: f64, total: f64, holdings: &[&str]) -> AllocationLine {
    let amount = cents(total * percent / 100.0);
    let positions = if amount > 0.0 {
        let each = cents(amount / holdings.len() as f64);
        holdings
            .iter()
            .map(|name| Position {
                name: (*name).to_string(),
                amount: each,
            })
            .collect()
    } else {
        Vec::new()
    };
    AllocationLine {
        asset_class: asset_class.to_string(),
        percent,
        amount,
        positions,
    }
}

/// Build the model portfolio for a profile and amount
pub fn build(profile: RiskProfile, amount: f64) -> Portfolio {
    let t = ProfileTemplate::for_profile(profile);
    Portfolio {
        risk_profile: profile.label().to_string(),
        description: t.description.to_string(),
        expected_return: t.expected_return.to_string(),
        risk_level: t.risk_level.to_string(),
        amount: cents(amount),
        allocation: vec![
            line("stocks", t.stocks, amount, STOCK_POSITIONS),
            line("bonds", t.bonds, amount, BOND_POSITIONS),
            line("cash", t.cash, amount, CASH_POSITIONS),
        ],
        rebalancing: Vec::new(),
    }
}

/// Model portfolio for a portfolio query, from its parsed profile and amount
pub fn for_intent(intent: &Intent) -> Option<Portfolio> {
    if intent.category != QueryCategory::Portfolio {
        return None;
    }
    let profile = intent.risk_profile.unwrap_or(RiskProfile::Moderate);
    Some(build(profile, intent.amount.unwrap_or(DEFAULT_INVESTMENT)))
}

impl Portfolio {
    /// One-line summary used as a fact
    pub fn summary(&self) -> String {
        let lines: Vec<String> = self
            .allocation
            .iter()
            .map(|l| format!("{} {:.0}% (${:.2})", l.asset_class, l.percent, l.amount))
            .collect();
        format!(
            "{} portfolio of ${:.2}: {}; expected return {}, risk {}",
            self.risk_profile,
            self.amount,
            lines.join(", "),
            self.expected_return,
            self.risk_level
        )
    }
}

/// Advice for every asset class that drifted past the threshold
pub fn rebalancing_advice(profile: RiskProfile, current: CurrentAllocation) -> Vec<String> {
    let t = ProfileTemplate::for_profile(profile);
    [
        ("stocks", current.stocks, t.stocks),
        ("bonds", current.bonds, t.bonds),
        ("cash", current.cash, t.cash),
    ]
    .into_iter()
    .filter_map(|(class, now, target)| {
        let drift = now - target;
        if drift > REBALANCE_DRIFT {
            Some(format!("Reduce {class} from {now:.0}% to {target:.0}%"))
        } else if drift < -REBALANCE_DRIFT {
            Some(format!("Increase {class} from {now:.0}% to {target:.0}%"))
        } else {
            None
        }
    })
    .collect()
}

/// Allocation table for a risk profile, with optional rebalancing advice
#[derive(Debug, Default)]
pub struct PortfolioBuilderTool;

#[derive(Debug, Deserialize)]
struct PortfolioParams {
    risk_profile: String,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    current_allocation: Option<CurrentAllocation>,
}

impl PortfolioBuilderTool {
    /// Create the tool
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for PortfolioBuilderTool {
    async fn execute(&self, params: Value) -> finq_tools::Result<Value> {
        let params: PortfolioParams = parse_params(NAME, params)?;
        let profile = RiskProfile::parse(&params.risk_profile).ok_or_else(|| {
            ToolError::invalid(
                NAME,
                format!("unknown risk profile '{}'", params.risk_profile),
            )
        })?;
        let amount = params.amount.unwrap_or(DEFAULT_INVESTMENT);
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ToolError::invalid(NAME, "amount must be a positive number"));
        }

        let mut portfolio = build(profile, amount);
        if let Some(current) = params.current_allocation {
            portfolio.rebalancing = rebalancing_advice(profile, current);
        }
        serde_json::to_value(portfolio).map_err(|e| ToolError::failed(NAME, e.to_string()))
    }

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Suggest a stocks/bonds/cash allocation with example holdings for a risk profile and amount"
    }

    fn input_schema(&self) -> Value {
        schema::object(
            json!({
                "risk_profile": schema::string_enum(
                    "Investor risk profile",
                    &["conservative", "moderate", "aggressive", "very_aggressive"],
                ),
                "amount": schema::number("Dollar amount to invest (default 10000)"),
                "current_allocation": {
                    "type": "object",
                    "description": "Current mix in percent, for rebalancing advice",
                    "properties": {
                        "stocks": schema::number("Percent in stocks"),
                        "bonds": schema::number("Percent in bonds"),
                        "cash": schema::number("Percent in cash"),
                    },
                },
            }),
            &["risk_profile"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_sum_to_100() {
        for profile in [
            RiskProfile::Conservative,
            RiskProfile::Moderate,
            RiskProfile::Aggressive,
            RiskProfile::VeryAggressive,
        ] {
            let t = ProfileTemplate::for_profile(profile);
            assert!((t.stocks + t.bonds + t.cash - 100.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_moderate_portfolio() {
        let p = build(RiskProfile::Moderate, 10_000.0);
        assert_eq!(p.risk_profile, "Moderate");
        assert_eq!(p.allocation[0].amount, 6000.0);
        assert_eq!(p.allocation[0].positions.len(), 6);
        assert_eq!(p.allocation[0].positions[0].amount, 1000.0);
        assert_eq!(p.allocation[1].amount, 3000.0);
        assert_eq!(p.allocation[2].positions[1].name, "Money market funds");
    }

    #[test]
    fn test_very_aggressive_has_no_cash_positions() {
        let p = build(RiskProfile::VeryAggressive, 5_000.0);
        assert_eq!(p.allocation[2].amount, 0.0);
        assert!(p.allocation[2].positions.is_empty());
        assert_eq!(p.risk_level, "Very High");
    }

    #[test]
    fn test_rebalancing_advice() {
        let current = CurrentAllocation {
            stocks: 90.0,
            bonds: 8.0,
            cash: 2.0,
        };
        let advice = rebalancing_advice(RiskProfile::Moderate, current);
        assert_eq!(
            advice,
            vec![
                "Reduce stocks from 90% to 60%",
                "Increase bonds from 8% to 30%",
                "Increase cash from 2% to 10%",
            ]
        );
        assert!(rebalancing_advice(RiskProfile::Aggressive, CurrentAllocation {
            stocks: 82.0,
            bonds: 13.0,
            cash: 5.0,
        })
        .is_empty());
    }

    #[tokio::test]
    async fn test_execute() {
        let tool = PortfolioBuilderTool::new();
        let out = tool
            .execute(json!({"risk_profile": "very aggressive", "amount": 20000}))
            .await
            .unwrap();
        assert_eq!(out["risk_profile"], "Very Aggressive");
        assert_eq!(out["allocation"][0]["amount"], 19000.0);
        assert!(out.get("rebalancing").is_none());

        let default_amount = tool.execute(json!({"risk_profile": "conservative"})).await.unwrap();
        assert_eq!(default_amount["amount"], 10000.0);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let tool = PortfolioBuilderTool::new();
        let err = tool.execute(json!({"risk_profile": "yolo"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = tool
            .execute(json!({"risk_profile": "moderate", "amount": -5}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
