//! Account transaction ledger model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    InterestCredit,
    PrematureClosure,
    MaturityPayout,
    PenaltyDebit,
    Reversal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::InterestCredit => "INTEREST_CREDIT",
            Self::PrematureClosure => "PREMATURE_CLOSURE",
            Self::MaturityPayout => "MATURITY_PAYOUT",
            Self::PenaltyDebit => "PENALTY_DEBIT",
            Self::Reversal => "REVERSAL",
        }
    }

    /// Whether money leaves the account for this type.
    pub fn is_debit(&self) -> bool {
        matches!(
            self,
            Self::Withdrawal | Self::PrematureClosure | Self::MaturityPayout | Self::PenaltyDebit
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable, booked transaction.
///
/// `balance_after` is the running balance and the source of truth for the
/// account balance; `sequence` orders transactions booked at the same
/// instant.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub account_no: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub reference: Option<String>,
    pub sequence: i64,
}

/// Transaction to be booked; the store assigns the sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub transaction_id: Uuid,
    pub account_no: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub reference: Option<String>,
}

impl NewTransaction {
    /// Books `amount` (unsigned) against `balance_before`, signing it by type.
    pub fn against_balance(
        account_no: &str,
        transaction_type: TransactionType,
        amount: Decimal,
        balance_before: Decimal,
        occurred_at: DateTime<Utc>,
        actor: &str,
    ) -> Self {
        let signed = if transaction_type.is_debit() {
            -amount.abs()
        } else {
            amount.abs()
        };
        Self {
            transaction_id: Uuid::new_v4(),
            account_no: account_no.to_string(),
            transaction_type,
            amount: signed,
            balance_after: balance_before + signed,
            occurred_at,
            actor: actor.to_string(),
            reference: None,
        }
    }

    pub fn with_id(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn into_transaction(self, sequence: i64) -> Transaction {
        Transaction {
            transaction_id: self.transaction_id,
            account_no: self.account_no,
            transaction_type: self.transaction_type,
            amount: self.amount,
            balance_after: self.balance_after,
            occurred_at: self.occurred_at,
            actor: self.actor,
            reference: self.reference,
            sequence,
        }
    }
}
