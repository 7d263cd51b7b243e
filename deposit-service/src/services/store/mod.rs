//! Storage seam.
//!
//! The engines only see these traits. Implementations must uphold:
//! - `commit` is all-or-nothing and rejects a stale account version with
//!   `Conflict`;
//! - transaction ids are unique (`Conflict` on reuse);
//! - `apply` is all-or-nothing across every wallet in the batch, rejects a
//!   stale wallet version with `Conflict`, and never leaves a negative
//!   balance;
//! - every wallet balance change is paired with exactly one ledger entry.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::error::DepositResult;
use crate::models::{
    Account, AccountStatus, LedgerEntry, LedgerSummary, NewTransaction, Transaction, Wallet,
    WalletMutation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account together with its opening transactions.
    async fn insert_account(
        &self,
        account: &Account,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<(Account, Vec<Transaction>)>;

    async fn get_account(&self, account_no: &str) -> DepositResult<Option<Account>>;

    async fn list_accounts_by_status(&self, status: AccountStatus) -> DepositResult<Vec<Account>>;

    /// Persist `account` (whose `version` must match the stored one) and
    /// append `transactions` in one atomic step. Returns the stored account
    /// with its bumped version and the booked transactions.
    async fn commit(
        &self,
        account: &Account,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<(Account, Vec<Transaction>)>;

    /// Most recent transaction with `occurred_at <= as_of`, ordered by
    /// `(occurred_at, sequence)`.
    async fn latest_transaction(
        &self,
        account_no: &str,
        as_of: DateTime<Utc>,
    ) -> DepositResult<Option<Transaction>>;

    /// All transactions of an account in booking order.
    async fn list_transactions(&self, account_no: &str) -> DepositResult<Vec<Transaction>>;

    async fn find_transaction(&self, transaction_id: Uuid) -> DepositResult<Option<Transaction>>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn get_wallet(&self, customer_id: &str) -> DepositResult<Option<Wallet>>;

    /// Create the wallet if absent; returns the stored wallet either way.
    async fn create_wallet(
        &self,
        customer_id: &str,
        base_currency: &str,
        at: DateTime<Utc>,
    ) -> DepositResult<Wallet>;

    /// Apply every mutation or none.
    async fn apply(&self, mutations: Vec<WalletMutation>) -> DepositResult<Vec<LedgerEntry>>;

    async fn list_entries(&self, customer_id: &str) -> DepositResult<Vec<LedgerEntry>>;

    async fn summary(&self) -> DepositResult<LedgerSummary>;
}
