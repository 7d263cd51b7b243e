//! Token wallet ledger.
//!
//! Every balance change goes through [`WalletRepository::apply`], which
//! compares the wallet version and writes the ledger entry in the same
//! atomic step. Version conflicts are retried with exponential backoff.

use crate::clock::Clock;
use crate::error::{DepositError, DepositResult};
use crate::models::{LedgerEntry, LedgerOperation, LedgerSummary, Wallet, WalletMutation};
use crate::money::{normalize_amount, normalize_whole_units, round_half_up_2dp};
use crate::services::currency::{convert_currency, normalize_code, DEFAULT_CURRENCY};
use crate::services::lookups::CustomerDirectory;
use crate::services::metrics::{record_error, LEDGER_VARIANCE, WALLET_OPERATIONS_TOTAL};
use crate::services::store::WalletRepository;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct WalletLedger {
    store: Arc<dyn WalletRepository>,
    customers: Arc<dyn CustomerDirectory>,
    clock: Arc<dyn Clock>,
    treasury_id: String,
    treasury_currency: String,
    retry_budget: Duration,
}

impl WalletLedger {
    pub fn new(
        store: Arc<dyn WalletRepository>,
        customers: Arc<dyn CustomerDirectory>,
        clock: Arc<dyn Clock>,
        treasury_id: impl Into<String>,
        treasury_currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            customers,
            clock,
            treasury_id: treasury_id.into(),
            treasury_currency: normalize_code(&treasury_currency.into()),
            retry_budget: Duration::from_secs(2),
        }
    }

    pub async fn wallet(&self, customer_id: &str) -> DepositResult<Option<Wallet>> {
        self.store.get_wallet(customer_id).await
    }

    pub async fn entries(&self, customer_id: &str) -> DepositResult<Vec<LedgerEntry>> {
        self.store.list_entries(customer_id).await
    }

    /// Credits `amount` to the customer's wallet.
    #[instrument(skip(self), fields(operation = "issue"))]
    pub async fn issue(
        &self,
        customer_id: &str,
        amount: Decimal,
        reference: Option<&str>,
    ) -> DepositResult<LedgerEntry> {
        let result = match normalize_amount(amount) {
            Ok(amount) => {
                self.with_cas_retry(|| {
                    self.mutate_once(customer_id, amount, LedgerOperation::Issue, reference)
                })
                .await
            }
            Err(e) => Err(e),
        };
        self.record("issue", &result);
        result
    }

    /// Debits `amount` from the customer's wallet.
    #[instrument(skip(self), fields(operation = "redeem"))]
    pub async fn redeem(
        &self,
        customer_id: &str,
        amount: Decimal,
        reference: Option<&str>,
    ) -> DepositResult<LedgerEntry> {
        let result = match normalize_amount(amount) {
            Ok(amount) => {
                self.with_cas_retry(|| {
                    self.mutate_once(customer_id, -amount, LedgerOperation::Redeem, reference)
                })
                .await
            }
            Err(e) => Err(e),
        };
        self.record("redeem", &result);
        result
    }

    /// Moves `amount` between two wallets atomically. Returns the
    /// `(TRANSFER_OUT, TRANSFER_IN)` entries.
    #[instrument(skip(self), fields(operation = "transfer"))]
    pub async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: Decimal,
        reference: Option<&str>,
    ) -> DepositResult<(LedgerEntry, LedgerEntry)> {
        let result = self.transfer_inner(from_id, to_id, amount, reference).await;
        self.record("transfer", &result);
        result
    }

    async fn transfer_inner(
        &self,
        from_id: &str,
        to_id: &str,
        amount: Decimal,
        reference: Option<&str>,
    ) -> DepositResult<(LedgerEntry, LedgerEntry)> {
        if from_id == to_id {
            return Err(DepositError::InvalidRequest(
                "cannot transfer to the same wallet".to_string(),
            ));
        }
        let amount = normalize_amount(amount)?;

        self.with_cas_retry(|| async move {
            let from = self.ensure_wallet(from_id).await?;
            if from.balance < amount {
                return Err(DepositError::InsufficientBalance {
                    available: from.balance,
                    requested: amount,
                });
            }
            let to = self.ensure_wallet(to_id).await?;
            let at = self.clock.now();
            let mut entries = self
                .store
                .apply(vec![
                    WalletMutation::new(&from, -amount, LedgerOperation::TransferOut, reference, at),
                    WalletMutation::new(&to, amount, LedgerOperation::TransferIn, reference, at),
                ])
                .await?;
            let incoming = entries.pop();
            let outgoing = entries.pop();
            match (outgoing, incoming) {
                (Some(out), Some(inc)) => Ok((out, inc)),
                _ => Err(DepositError::Storage(
                    "transfer did not produce two ledger entries".to_string(),
                )),
            }
        })
        .await
    }

    /// Credits an amount given in `currency` (wallet base currency when
    /// `None`), converted and rounded HALF_UP to whole tokens.
    #[instrument(skip(self), fields(operation = "credit"))]
    pub async fn credit_wallet(
        &self,
        customer_id: &str,
        amount: Decimal,
        currency: Option<&str>,
        reference: Option<&str>,
    ) -> DepositResult<LedgerEntry> {
        let result = self
            .converted_mutation(customer_id, amount, currency, reference, LedgerOperation::Issue)
            .await;
        self.record("credit", &result);
        result
    }

    /// Debits an amount given in `currency`, converted and rounded HALF_UP to
    /// whole tokens.
    #[instrument(skip(self), fields(operation = "debit"))]
    pub async fn debit_wallet(
        &self,
        customer_id: &str,
        amount: Decimal,
        currency: Option<&str>,
        reference: Option<&str>,
    ) -> DepositResult<LedgerEntry> {
        let result = self
            .converted_mutation(customer_id, amount, currency, reference, LedgerOperation::Redeem)
            .await;
        self.record("debit", &result);
        result
    }

    async fn converted_mutation(
        &self,
        customer_id: &str,
        amount: Decimal,
        currency: Option<&str>,
        reference: Option<&str>,
        operation: LedgerOperation,
    ) -> DepositResult<LedgerEntry> {
        if amount <= Decimal::ZERO {
            return Err(DepositError::InvalidAmount(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        let amount = round_half_up_2dp(amount);
        let wallet = self.ensure_wallet(customer_id).await?;
        let source = currency.unwrap_or(&wallet.base_currency);
        let tokens = normalize_whole_units(convert_currency(amount, source, &wallet.base_currency))?;
        let change = if operation == LedgerOperation::Redeem {
            -tokens
        } else {
            tokens
        };
        self.with_cas_retry(|| self.mutate_once(customer_id, change, operation, reference))
            .await
    }

    /// Funds the treasury wallet with freshly issued tokens.
    pub async fn fund_treasury(
        &self,
        amount: Decimal,
        reference: Option<&str>,
    ) -> DepositResult<LedgerEntry> {
        self.issue(&self.treasury_id, amount, reference).await
    }

    /// Reconciliation snapshot; also updates the variance gauge.
    #[instrument(skip(self))]
    pub async fn summary(&self) -> DepositResult<LedgerSummary> {
        let summary = self.store.summary().await?;
        LEDGER_VARIANCE.set(summary.variance.to_f64().unwrap_or(f64::NAN));
        if !summary.is_balanced() {
            warn!(
                ledger_total = %summary.ledger_total,
                wallet_supply = %summary.wallet_supply,
                variance = %summary.variance,
                "Wallet ledger out of balance"
            );
        }
        Ok(summary)
    }

    /// Existing wallet, or a new empty one in the customer's preferred
    /// currency.
    async fn ensure_wallet(&self, customer_id: &str) -> DepositResult<Wallet> {
        if let Some(wallet) = self.store.get_wallet(customer_id).await? {
            return Ok(wallet);
        }

        let currency = if customer_id == self.treasury_id {
            self.treasury_currency.clone()
        } else {
            match self.customers.preferred_currency(customer_id).await {
                Ok(Some(code)) => normalize_code(&code),
                Ok(None) => DEFAULT_CURRENCY.to_string(),
                Err(e) => {
                    warn!(
                        customer_id = %customer_id,
                        error = %e,
                        "Preferred currency lookup failed, defaulting"
                    );
                    DEFAULT_CURRENCY.to_string()
                }
            }
        };

        let wallet = self
            .store
            .create_wallet(customer_id, &currency, self.clock.now())
            .await?;
        info!(customer_id = %customer_id, base_currency = %wallet.base_currency, "Wallet created");
        Ok(wallet)
    }

    async fn mutate_once(
        &self,
        customer_id: &str,
        change: Decimal,
        operation: LedgerOperation,
        reference: Option<&str>,
    ) -> DepositResult<LedgerEntry> {
        let wallet = self.ensure_wallet(customer_id).await?;
        if wallet.balance + change < Decimal::ZERO {
            return Err(DepositError::InsufficientBalance {
                available: wallet.balance,
                requested: -change,
            });
        }
        let mutation = WalletMutation::new(&wallet, change, operation, reference, self.clock.now());
        self.store
            .apply(vec![mutation])
            .await?
            .pop()
            .ok_or_else(|| DepositError::Storage("mutation produced no ledger entry".to_string()))
    }

    /// Retries `attempt` while it fails with a version conflict.
    async fn with_cas_retry<T, F, Fut>(&self, mut attempt: F) -> DepositResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DepositResult<T>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.retry_budget),
            ..Default::default()
        };

        retry(policy, || {
            let fut = attempt();
            async move {
                fut.await.map_err(|e| {
                    if e.is_conflict() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }

    fn record<T>(&self, operation: &str, result: &DepositResult<T>) {
        let status = match result {
            Ok(_) => "ok",
            Err(e) => {
                record_error(e.kind());
                "error"
            }
        };
        WALLET_OPERATIONS_TOTAL
            .with_label_values(&[operation, status])
            .inc();
    }
}
