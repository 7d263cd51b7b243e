//! In-memory store.

use super::{AccountRepository, WalletRepository};
use crate::error::{DepositError, DepositResult};
use crate::models::{
    Account, AccountStatus, LedgerEntry, LedgerSummary, NewTransaction, Transaction, Wallet,
    WalletMutation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct AccountState {
    accounts: HashMap<String, Account>,
    transactions: HashMap<String, Vec<Transaction>>,
    transaction_ids: HashSet<Uuid>,
    next_sequence: i64,
}

impl AccountState {
    fn check_ids(&self, transactions: &[NewTransaction]) -> DepositResult<()> {
        let mut seen = HashSet::new();
        for txn in transactions {
            if self.transaction_ids.contains(&txn.transaction_id) || !seen.insert(txn.transaction_id)
            {
                return Err(DepositError::Conflict(format!(
                    "transaction {} already exists",
                    txn.transaction_id
                )));
            }
        }
        Ok(())
    }

    fn append(&mut self, transactions: Vec<NewTransaction>) -> Vec<Transaction> {
        let mut booked = Vec::with_capacity(transactions.len());
        for txn in transactions {
            self.next_sequence += 1;
            let txn = txn.into_transaction(self.next_sequence);
            self.transaction_ids.insert(txn.transaction_id);
            self.transactions
                .entry(txn.account_no.clone())
                .or_default()
                .push(txn.clone());
            booked.push(txn);
        }
        booked
    }
}

#[derive(Default)]
struct WalletState {
    wallets: HashMap<String, Wallet>,
    entries: Vec<LedgerEntry>,
}

/// Process-local store for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryStore {
    accounts: RwLock<AccountState>,
    wallets: RwLock<WalletState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn insert_account(
        &self,
        account: &Account,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<(Account, Vec<Transaction>)> {
        let mut state = self.accounts.write().await;
        if state.accounts.contains_key(&account.account_no) {
            return Err(DepositError::Conflict(format!(
                "account {} already exists",
                account.account_no
            )));
        }
        state.check_ids(&transactions)?;

        let stored = account.clone();
        state.accounts.insert(stored.account_no.clone(), stored.clone());
        let booked = state.append(transactions);
        Ok((stored, booked))
    }

    async fn get_account(&self, account_no: &str) -> DepositResult<Option<Account>> {
        Ok(self.accounts.read().await.accounts.get(account_no).cloned())
    }

    async fn list_accounts_by_status(&self, status: AccountStatus) -> DepositResult<Vec<Account>> {
        let state = self.accounts.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_no.cmp(&b.account_no));
        Ok(accounts)
    }

    async fn commit(
        &self,
        account: &Account,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<(Account, Vec<Transaction>)> {
        let mut state = self.accounts.write().await;
        let current = state
            .accounts
            .get(&account.account_no)
            .ok_or_else(|| DepositError::not_found("account", account.account_no.clone()))?;
        if current.version != account.version {
            return Err(DepositError::Conflict(format!(
                "account {} was modified concurrently (expected version {}, found {})",
                account.account_no, account.version, current.version
            )));
        }
        state.check_ids(&transactions)?;

        let mut stored = account.clone();
        stored.version += 1;
        state
            .accounts
            .insert(stored.account_no.clone(), stored.clone());
        let booked = state.append(transactions);
        Ok((stored, booked))
    }

    async fn latest_transaction(
        &self,
        account_no: &str,
        as_of: DateTime<Utc>,
    ) -> DepositResult<Option<Transaction>> {
        let state = self.accounts.read().await;
        Ok(state.transactions.get(account_no).and_then(|txns| {
            txns.iter()
                .filter(|t| t.occurred_at <= as_of)
                .max_by_key(|t| (t.occurred_at, t.sequence))
                .cloned()
        }))
    }

    async fn list_transactions(&self, account_no: &str) -> DepositResult<Vec<Transaction>> {
        let state = self.accounts.read().await;
        Ok(state.transactions.get(account_no).cloned().unwrap_or_default())
    }

    async fn find_transaction(&self, transaction_id: Uuid) -> DepositResult<Option<Transaction>> {
        let state = self.accounts.read().await;
        if !state.transaction_ids.contains(&transaction_id) {
            return Ok(None);
        }
        Ok(state
            .transactions
            .values()
            .flatten()
            .find(|t| t.transaction_id == transaction_id)
            .cloned())
    }
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn get_wallet(&self, customer_id: &str) -> DepositResult<Option<Wallet>> {
        Ok(self.wallets.read().await.wallets.get(customer_id).cloned())
    }

    async fn create_wallet(
        &self,
        customer_id: &str,
        base_currency: &str,
        at: DateTime<Utc>,
    ) -> DepositResult<Wallet> {
        let mut state = self.wallets.write().await;
        let wallet = state
            .wallets
            .entry(customer_id.to_string())
            .or_insert_with(|| Wallet {
                customer_id: customer_id.to_string(),
                balance: Decimal::ZERO,
                base_currency: base_currency.to_string(),
                version: 0,
                created_at: at,
                updated_at: at,
            });
        Ok(wallet.clone())
    }

    async fn apply(&self, mutations: Vec<WalletMutation>) -> DepositResult<Vec<LedgerEntry>> {
        let mut guard = self.wallets.write().await;
        let state = &mut *guard;

        // Validate the whole batch before touching anything.
        let mut seen: HashSet<&str> = HashSet::new();
        for m in &mutations {
            if !seen.insert(m.customer_id.as_str()) {
                return Err(DepositError::InvalidRequest(format!(
                    "wallet {} appears twice in one batch",
                    m.customer_id
                )));
            }
            let wallet = state
                .wallets
                .get(&m.customer_id)
                .ok_or_else(|| DepositError::not_found("wallet", m.customer_id.clone()))?;
            let (version, balance) = (wallet.version, wallet.balance);
            if version != m.expected_version {
                return Err(DepositError::Conflict(format!(
                    "wallet {} was modified concurrently (expected version {}, found {})",
                    m.customer_id, m.expected_version, version
                )));
            }
            if balance + m.change_amount < Decimal::ZERO {
                return Err(DepositError::InsufficientBalance {
                    available: balance,
                    requested: -m.change_amount,
                });
            }
        }

        let mut entries = Vec::with_capacity(mutations.len());
        for m in mutations {
            let Some(wallet) = state.wallets.get_mut(&m.customer_id) else {
                return Err(DepositError::not_found("wallet", m.customer_id));
            };
            wallet.balance += m.change_amount;
            wallet.version += 1;
            wallet.updated_at = m.at;
            let entry = LedgerEntry {
                entry_id: Uuid::new_v4(),
                customer_id: m.customer_id,
                change_amount: m.change_amount,
                balance_after: wallet.balance,
                operation: m.operation,
                external_ref: m.external_ref,
                created_at: m.at,
            };
            state.entries.push(entry.clone());
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn list_entries(&self, customer_id: &str) -> DepositResult<Vec<LedgerEntry>> {
        let state = self.wallets.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn summary(&self) -> DepositResult<LedgerSummary> {
        let state = self.wallets.read().await;
        let ledger_total: Decimal = state.entries.iter().map(|e| e.change_amount).sum();
        let wallet_supply: Decimal = state.wallets.values().map(|w| w.balance).sum();
        Ok(LedgerSummary::new(
            ledger_total,
            wallet_supply,
            state.wallets.len() as i64,
            state.entries.len() as i64,
        ))
    }
}
