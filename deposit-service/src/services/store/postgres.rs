//! PostgreSQL store.

use super::{AccountRepository, WalletRepository};
use crate::error::{DepositError, DepositResult};
use crate::models::{
    Account, AccountStatus, LedgerEntry, LedgerSummary, NewTransaction, Transaction, Wallet,
    WalletMutation,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction as SqlTransaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = r#"
    account_no, customer_id, product_code, currency, principal, interest_rate,
    base_interest_rate, tenure_months, status, created_at, maturity_date, maturity_amount,
    last_interest_accrual_at, next_interest_accrual_at, next_payout_at, accrued_interest,
    premature_penalty_rate, premature_penalty_grace_days, pricing_rule_id, pricing_rule_name,
    pricing_rule_applied_at, closed_at, closed_by, closure_reason, updated_at, version
"#;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, account_no, transaction_type, amount, balance_after, occurred_at, actor,
    reference, sequence
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "deposit-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> DepositResult<SqlTransaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| DepositError::Storage(format!("Failed to begin transaction: {}", e)))
    }

    async fn insert_transactions(
        tx: &mut SqlTransaction<'static, Postgres>,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<Vec<Transaction>> {
        let mut booked = Vec::with_capacity(transactions.len());
        for txn in transactions {
            let sequence: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO account_transactions
                    (transaction_id, account_no, transaction_type, amount, balance_after, occurred_at, actor, reference)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING sequence
                "#,
            )
            .bind(txn.transaction_id)
            .bind(&txn.account_no)
            .bind(txn.transaction_type)
            .bind(txn.amount)
            .bind(txn.balance_after)
            .bind(txn.occurred_at)
            .bind(&txn.actor)
            .bind(&txn.reference)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    DepositError::Conflict(format!(
                        "transaction {} already exists",
                        txn.transaction_id
                    ))
                }
                _ => DepositError::Storage(format!("Failed to insert transaction: {}", e)),
            })?;
            booked.push(txn.into_transaction(sequence));
        }
        Ok(booked)
    }

    async fn commit_tx(tx: SqlTransaction<'static, Postgres>) -> DepositResult<()> {
        tx.commit()
            .await
            .map_err(|e| DepositError::Storage(format!("Failed to commit transaction: {}", e)))
    }
}

#[async_trait]
impl AccountRepository for PgStore {
    #[instrument(skip(self, account, transactions), fields(account_no = %account.account_no))]
    async fn insert_account(
        &self,
        account: &Account,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<(Account, Vec<Transaction>)> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_account"])
            .start_timer();

        let mut tx = self.begin().await?;
        let stored = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts ({ACCOUNT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&account.account_no)
        .bind(&account.customer_id)
        .bind(&account.product_code)
        .bind(&account.currency)
        .bind(account.principal)
        .bind(account.interest_rate)
        .bind(account.base_interest_rate)
        .bind(account.tenure_months)
        .bind(account.status)
        .bind(account.created_at)
        .bind(account.maturity_date)
        .bind(account.maturity_amount)
        .bind(account.last_interest_accrual_at)
        .bind(account.next_interest_accrual_at)
        .bind(account.next_payout_at)
        .bind(account.accrued_interest)
        .bind(account.premature_penalty_rate)
        .bind(account.premature_penalty_grace_days)
        .bind(&account.pricing_rule_id)
        .bind(&account.pricing_rule_name)
        .bind(account.pricing_rule_applied_at)
        .bind(account.closed_at)
        .bind(&account.closed_by)
        .bind(&account.closure_reason)
        .bind(account.updated_at)
        .bind(account.version)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DepositError::Conflict(format!("account {} already exists", account.account_no))
            }
            _ => DepositError::Storage(format!("Failed to insert account: {}", e)),
        })?;

        let booked = Self::insert_transactions(&mut tx, transactions).await?;
        Self::commit_tx(tx).await?;

        timer.observe_duration();
        info!(account_no = %stored.account_no, "Account inserted");

        Ok((stored, booked))
    }

    #[instrument(skip(self))]
    async fn get_account(&self, account_no: &str) -> DepositResult<Option<Account>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_no = $1"
        ))
        .bind(account_no)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(account)
    }

    #[instrument(skip(self))]
    async fn list_accounts_by_status(&self, status: AccountStatus) -> DepositResult<Vec<Account>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts_by_status"])
            .start_timer();

        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE status = $1 ORDER BY account_no"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(accounts)
    }

    #[instrument(skip(self, account, transactions), fields(account_no = %account.account_no, version = account.version))]
    async fn commit(
        &self,
        account: &Account,
        transactions: Vec<NewTransaction>,
    ) -> DepositResult<(Account, Vec<Transaction>)> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_account"])
            .start_timer();

        let mut tx = self.begin().await?;
        let stored = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts SET
                principal = $3,
                interest_rate = $4,
                base_interest_rate = $5,
                status = $6,
                maturity_amount = $7,
                last_interest_accrual_at = $8,
                next_interest_accrual_at = $9,
                next_payout_at = $10,
                accrued_interest = $11,
                pricing_rule_id = $12,
                pricing_rule_name = $13,
                pricing_rule_applied_at = $14,
                closed_at = $15,
                closed_by = $16,
                closure_reason = $17,
                updated_at = $18,
                version = version + 1
            WHERE account_no = $1 AND version = $2
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&account.account_no)
        .bind(account.version)
        .bind(account.principal)
        .bind(account.interest_rate)
        .bind(account.base_interest_rate)
        .bind(account.status)
        .bind(account.maturity_amount)
        .bind(account.last_interest_accrual_at)
        .bind(account.next_interest_accrual_at)
        .bind(account.next_payout_at)
        .bind(account.accrued_interest)
        .bind(&account.pricing_rule_id)
        .bind(&account.pricing_rule_name)
        .bind(account.pricing_rule_applied_at)
        .bind(account.closed_at)
        .bind(&account.closed_by)
        .bind(&account.closure_reason)
        .bind(account.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = stored else {
            tx.rollback().await.ok();
            return Err(DepositError::Conflict(format!(
                "account {} was modified concurrently or does not exist (expected version {})",
                account.account_no, account.version
            )));
        };

        let booked = Self::insert_transactions(&mut tx, transactions).await?;
        Self::commit_tx(tx).await?;

        timer.observe_duration();
        Ok((stored, booked))
    }

    #[instrument(skip(self))]
    async fn latest_transaction(
        &self,
        account_no: &str,
        as_of: DateTime<Utc>,
    ) -> DepositResult<Option<Transaction>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_transaction"])
            .start_timer();

        let txn = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM account_transactions
            WHERE account_no = $1 AND occurred_at <= $2
            ORDER BY occurred_at DESC, sequence DESC
            LIMIT 1
            "#
        ))
        .bind(account_no)
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(txn)
    }

    #[instrument(skip(self))]
    async fn list_transactions(&self, account_no: &str) -> DepositResult<Vec<Transaction>> {
        let txns = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM account_transactions WHERE account_no = $1 ORDER BY sequence"
        ))
        .bind(account_no)
        .fetch_all(&self.pool)
        .await?;
        Ok(txns)
    }

    #[instrument(skip(self))]
    async fn find_transaction(&self, transaction_id: Uuid) -> DepositResult<Option<Transaction>> {
        let txn = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM account_transactions WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(txn)
    }
}

#[async_trait]
impl WalletRepository for PgStore {
    #[instrument(skip(self))]
    async fn get_wallet(&self, customer_id: &str) -> DepositResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT customer_id, balance, base_currency, version, created_at, updated_at
            FROM wallets
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(wallet)
    }

    #[instrument(skip(self))]
    async fn create_wallet(
        &self,
        customer_id: &str,
        base_currency: &str,
        at: DateTime<Utc>,
    ) -> DepositResult<Wallet> {
        sqlx::query(
            r#"
            INSERT INTO wallets (customer_id, balance, base_currency, version, created_at, updated_at)
            VALUES ($1, 0, $2, 0, $3, $3)
            ON CONFLICT (customer_id) DO NOTHING
            "#,
        )
        .bind(customer_id)
        .bind(base_currency)
        .bind(at)
        .execute(&self.pool)
        .await?;

        self.get_wallet(customer_id)
            .await?
            .ok_or_else(|| DepositError::not_found("wallet", customer_id))
    }

    #[instrument(skip(self, mutations), fields(mutation_count = mutations.len()))]
    async fn apply(&self, mutations: Vec<WalletMutation>) -> DepositResult<Vec<LedgerEntry>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_wallet_mutations"])
            .start_timer();

        let mut tx = self.begin().await?;
        let mut entries = Vec::with_capacity(mutations.len());

        // Row locks are always taken in customer id order so that opposite
        // transfers between the same two wallets cannot deadlock.
        let mut lock_order: Vec<&str> = mutations.iter().map(|m| m.customer_id.as_str()).collect();
        lock_order.sort_unstable();
        lock_order.dedup();
        for customer_id in lock_order {
            sqlx::query("SELECT 1 FROM wallets WHERE customer_id = $1 FOR UPDATE")
                .bind(customer_id)
                .execute(&mut *tx)
                .await?;
        }

        for m in mutations {
            let current = sqlx::query_as::<_, Wallet>(
                r#"
                SELECT customer_id, balance, base_currency, version, created_at, updated_at
                FROM wallets
                WHERE customer_id = $1
                FOR UPDATE
                "#,
            )
            .bind(&m.customer_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DepositError::not_found("wallet", m.customer_id.clone()))?;

            if current.version != m.expected_version {
                tx.rollback().await.ok();
                return Err(DepositError::Conflict(format!(
                    "wallet {} was modified concurrently (expected version {}, found {})",
                    m.customer_id, m.expected_version, current.version
                )));
            }
            let next_balance = current.balance + m.change_amount;
            if next_balance < Decimal::ZERO {
                tx.rollback().await.ok();
                return Err(DepositError::InsufficientBalance {
                    available: current.balance,
                    requested: -m.change_amount,
                });
            }

            sqlx::query(
                r#"
                UPDATE wallets
                SET balance = $2, version = version + 1, updated_at = $3
                WHERE customer_id = $1 AND version = $4
                "#,
            )
            .bind(&m.customer_id)
            .bind(next_balance)
            .bind(m.at)
            .bind(m.expected_version)
            .execute(&mut *tx)
            .await?;

            let entry = sqlx::query_as::<_, LedgerEntry>(
                r#"
                INSERT INTO wallet_ledger_entries
                    (entry_id, customer_id, change_amount, balance_after, operation, external_ref, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING entry_id, customer_id, change_amount, balance_after, operation, external_ref, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&m.customer_id)
            .bind(m.change_amount)
            .bind(next_balance)
            .bind(m.operation)
            .bind(&m.external_ref)
            .bind(m.at)
            .fetch_one(&mut *tx)
            .await?;

            entries.push(entry);
        }

        Self::commit_tx(tx).await?;
        timer.observe_duration();

        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn list_entries(&self, customer_id: &str) -> DepositResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT entry_id, customer_id, change_amount, balance_after, operation, external_ref, created_at
            FROM wallet_ledger_entries
            WHERE customer_id = $1
            ORDER BY created_at, entry_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn summary(&self) -> DepositResult<LedgerSummary> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ledger_summary"])
            .start_timer();

        // Single snapshot so concurrent mutations cannot skew the variance.
        let (ledger_total, entry_count, wallet_supply, wallet_count): (Decimal, i64, Decimal, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COALESCE(SUM(change_amount), 0) FROM wallet_ledger_entries),
                    (SELECT COUNT(*) FROM wallet_ledger_entries),
                    (SELECT COALESCE(SUM(balance), 0) FROM wallets),
                    (SELECT COUNT(*) FROM wallets)
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(LedgerSummary::new(
            ledger_total,
            wallet_supply,
            wallet_count,
            entry_count,
        ))
    }
}
