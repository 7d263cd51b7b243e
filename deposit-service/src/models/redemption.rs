//! Redemption quotes, results, and the redemption domain event.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TransactionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionType {
    Maturity,
    Premature,
}

impl RedemptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maturity => "MATURITY",
            Self::Premature => "PREMATURE",
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Maturity => TransactionType::MaturityPayout,
            Self::Premature => TransactionType::PrematureClosure,
        }
    }
}

impl std::fmt::Display for RedemptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Premature-closure penalty with the explanation shown to the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyAssessment {
    pub amount: Decimal,
    pub reason: String,
}

/// Redemption quote for an active account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionEnquiry {
    pub account_no: String,
    pub customer_id: String,
    pub currency: String,
    pub redemption_type: RedemptionType,
    pub is_matured: bool,
    pub maturity_date: DateTime<Utc>,
    pub days_until_maturity: i64,
    pub days_overdue: i64,
    pub principal: Decimal,
    pub current_balance: Decimal,
    pub accrued_interest: Decimal,
    pub penalty_rate: Decimal,
    pub grace_days: i64,
    pub penalty_amount: Decimal,
    pub penalty_reason: Option<String>,
    pub net_payable: Decimal,
    pub wallet_balance: Option<Decimal>,
    pub wallet_currency: Option<String>,
    pub warnings: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

/// Who is asking for a redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub customer_id: String,
    pub admin: bool,
}

impl Requester {
    pub fn customer(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            customer_id: id.into(),
            admin: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub account_no: String,
    pub requester: Requester,
    pub reason: Option<String>,
    /// Transaction id to book the payout under; a replay with the same id is
    /// rejected instead of paying twice.
    pub idempotency_key: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionResult {
    pub transaction_id: Uuid,
    pub account_no: String,
    pub redemption_type: RedemptionType,
    pub principal: Decimal,
    pub interest: Decimal,
    pub penalty: Decimal,
    pub net_amount: Decimal,
    pub days_before_maturity: i64,
    pub processed_at: DateTime<Utc>,
    pub processed_by: String,
}

/// Published once per successful redemption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    pub event_id: Uuid,
    pub account_no: String,
    pub customer_id: String,
    pub redemption_type: RedemptionType,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub penalty_amount: Decimal,
    pub net_amount: Decimal,
    pub maturity_date: DateTime<Utc>,
    pub days_before_maturity: i64,
    pub reason: String,
    pub processed_by: String,
    pub occurred_at: DateTime<Utc>,
}
