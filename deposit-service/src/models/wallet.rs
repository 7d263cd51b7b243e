//! Token wallet and wallet ledger models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerOperation {
    Issue,
    TransferIn,
    TransferOut,
    Redeem,
    Contract,
}

impl LedgerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "ISSUE",
            Self::TransferIn => "TRANSFER_IN",
            Self::TransferOut => "TRANSFER_OUT",
            Self::Redeem => "REDEEM",
            Self::Contract => "CONTRACT",
        }
    }
}

impl std::fmt::Display for LedgerOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-customer balance projection.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub customer_id: String,
    pub balance: Decimal,
    pub base_currency: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of one wallet balance change.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub customer_id: String,
    pub change_amount: Decimal,
    pub balance_after: Decimal,
    pub operation: LedgerOperation,
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Compare-and-swap update of one wallet, paired with the entry recording it.
#[derive(Debug, Clone)]
pub struct WalletMutation {
    pub customer_id: String,
    pub expected_version: i64,
    pub change_amount: Decimal,
    pub operation: LedgerOperation,
    pub external_ref: Option<String>,
    pub at: DateTime<Utc>,
}

impl WalletMutation {
    pub fn new(
        wallet: &Wallet,
        change_amount: Decimal,
        operation: LedgerOperation,
        external_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id: wallet.customer_id.clone(),
            expected_version: wallet.version,
            change_amount,
            operation,
            external_ref: external_ref.map(str::to_string),
            at,
        }
    }
}

/// Reconciliation snapshot: ledger history against balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub ledger_total: Decimal,
    pub wallet_supply: Decimal,
    pub variance: Decimal,
    pub wallet_count: i64,
    pub entry_count: i64,
}

impl LedgerSummary {
    pub fn new(ledger_total: Decimal, wallet_supply: Decimal, wallet_count: i64, entry_count: i64) -> Self {
        Self {
            ledger_total,
            wallet_supply,
            variance: ledger_total - wallet_supply,
            wallet_count,
            entry_count,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.variance.is_zero()
    }
}
