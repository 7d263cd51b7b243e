//! Fixed-deposit account model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Closed,
    Suspended,
    Matured,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
            Self::Suspended => "SUSPENDED",
            Self::Matured => "MATURED",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed-deposit account.
///
/// Rates are percentages (`5.00` = 5% a year); the premature penalty rate
/// is a fraction (`0.06` = 6% of the balance).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_no: String,
    pub customer_id: String,
    pub product_code: String,
    pub currency: String,
    pub principal: Decimal,
    pub interest_rate: Decimal,
    pub base_interest_rate: Decimal,
    pub tenure_months: i32,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
    pub maturity_amount: Decimal,
    pub last_interest_accrual_at: Option<DateTime<Utc>>,
    pub next_interest_accrual_at: Option<DateTime<Utc>>,
    pub next_payout_at: Option<DateTime<Utc>>,
    pub accrued_interest: Decimal,
    pub premature_penalty_rate: Decimal,
    pub premature_penalty_grace_days: i32,
    pub pricing_rule_id: Option<String>,
    pub pricing_rule_name: Option<String>,
    pub pricing_rule_applied_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub closure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn tenure_months_u32(&self) -> u32 {
        u32::try_from(self.tenure_months).unwrap_or(0)
    }

    pub fn grace_days(&self) -> i64 {
        i64::from(self.premature_penalty_grace_days.max(0))
    }

    /// Rule identity used to detect pricing changes between evaluations.
    pub fn applied_rule_id(&self) -> Option<&str> {
        self.pricing_rule_id.as_deref()
    }
}

/// Input for opening a new fixed deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccount {
    pub customer_id: String,
    pub product_code: String,
    pub principal: Decimal,
    pub tenure_months: u32,
    /// Requested annual rate in percent; defaults to the product minimum.
    pub interest_rate: Option<Decimal>,
    pub auth_token: Option<String>,
}
