//! Tiered pricing rules and product master data consumed from the product
//! service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance-tiered pricing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub min_threshold: Option<Decimal>,
    pub max_threshold: Option<Decimal>,
    pub interest_rate: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    pub fee_amount: Option<Decimal>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl PricingRule {
    /// Inclusive threshold check; a missing bound is open.
    pub fn matches(&self, balance: Decimal) -> bool {
        let above_min = self.min_threshold.map_or(true, |min| balance >= min);
        let below_max = self.max_threshold.map_or(true, |max| balance <= max);
        above_min && below_max
    }
}

/// Outcome of a pricing evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEvaluation {
    pub rule: Option<PricingRule>,
    pub applied_rate: Decimal,
    /// Whole-unit fee the caller may book as a debit.
    pub penalty: Option<Decimal>,
}

impl PricingEvaluation {
    pub fn unpriced(base_rate: Decimal) -> Self {
        Self {
            rule: None,
            applied_rate: base_rate,
            penalty: None,
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        self.rule.as_ref().map(|r| r.id.as_str())
    }
}

/// Product terms returned by the product service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub product_code: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub min_term_months: i32,
    pub max_term_months: i32,
    pub min_rate: Decimal,
    pub max_rate: Decimal,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub penalty_rate: Option<Decimal>,
    #[serde(default)]
    pub penalty_grace_days: Option<i32>,
}

impl ProductDetails {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }

    pub fn penalty_rate_or_zero(&self) -> Decimal {
        self.penalty_rate.unwrap_or(Decimal::ZERO)
    }

    pub fn grace_days_or_zero(&self) -> i32 {
        self.penalty_grace_days.unwrap_or(0).max(0)
    }
}

/// Request payload for a product lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRequest {
    pub product_code: String,
}

/// Request payload for the active pricing rules of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRulesRequest {
    pub product_code: String,
    pub auth_token: Option<String>,
}
