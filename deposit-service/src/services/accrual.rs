//! Anniversary interest accrual and maturity finalization.
//!
//! For each active account the engine replays every anniversary that is
//! due at the business time, one atomic commit per anniversary, so a crash
//! between steps resumes at the first uncommitted anniversary. Once the
//! catch-up reaches the payout date the account is paid out and marked
//! MATURED.

use crate::clock::{add_months, anniversary, next_anniversary_after, Clock};
use crate::error::{DepositError, DepositResult};
use crate::models::{Account, AccountStatus, NewTransaction, TransactionType};
use crate::money::{floor_units, interest_for_period};
use crate::services::accounts::ledger_balance;
use crate::services::cache::EnquiryCache;
use crate::services::locks::AccountLocks;
use crate::services::lookups::ProductCatalog;
use crate::services::metrics::{
    record_error, ACCOUNTS_MATURED_TOTAL, ACCRUAL_ACCOUNTS_TOTAL, INTEREST_CREDITS_TOTAL,
};
use crate::services::pricing::{select, PricingRuleResolver};
use crate::services::store::AccountRepository;
use crate::services::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const SYSTEM_ACTOR: &str = "system";

/// Outcome of one accrual pass over all active accounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccrualReport {
    pub processed: usize,
    pub interest_credits: usize,
    pub total_interest: Decimal,
    pub matured: usize,
    pub failed: usize,
}

/// Outcome for a single account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountAccrual {
    pub interest_credits: usize,
    pub total_interest: Decimal,
    pub matured: bool,
}

pub struct AccrualEngine {
    store: Arc<dyn AccountRepository>,
    wallet: Arc<WalletLedger>,
    pricing: Arc<PricingRuleResolver>,
    catalog: Arc<dyn ProductCatalog>,
    locks: AccountLocks,
    cache: Arc<EnquiryCache>,
    clock: Arc<dyn Clock>,
    max_iterations: u32,
}

impl AccrualEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AccountRepository>,
        wallet: Arc<WalletLedger>,
        pricing: Arc<PricingRuleResolver>,
        catalog: Arc<dyn ProductCatalog>,
        locks: AccountLocks,
        cache: Arc<EnquiryCache>,
        clock: Arc<dyn Clock>,
        max_iterations: u32,
    ) -> Self {
        Self {
            store,
            wallet,
            pricing,
            catalog,
            locks,
            cache,
            clock,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Processes every active account. Per-account failures are logged and
    /// counted; they never abort the pass.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> DepositResult<AccrualReport> {
        let accounts = self
            .store
            .list_accounts_by_status(AccountStatus::Active)
            .await?;
        let mut report = AccrualReport::default();

        for account in accounts {
            report.processed += 1;
            match self.process_account(&account.account_no).await {
                Ok(outcome) => {
                    ACCRUAL_ACCOUNTS_TOTAL.with_label_values(&["ok"]).inc();
                    report.interest_credits += outcome.interest_credits;
                    report.total_interest += outcome.total_interest;
                    if outcome.matured {
                        report.matured += 1;
                    }
                }
                Err(e) => {
                    ACCRUAL_ACCOUNTS_TOTAL.with_label_values(&["error"]).inc();
                    record_error(e.kind());
                    report.failed += 1;
                    error!(
                        account_no = %account.account_no,
                        error = %e,
                        "Accrual failed for account"
                    );
                }
            }
        }

        info!(
            processed = report.processed,
            interest_credits = report.interest_credits,
            total_interest = %report.total_interest,
            matured = report.matured,
            failed = report.failed,
            "Accrual pass completed"
        );
        Ok(report)
    }

    /// Catches one account up to the current business time.
    ///
    /// Product terms and pricing rules are looked up before the account lock
    /// is taken; the commit version check catches anything that changed in
    /// between. Nothing remote is called while no anniversary or payout is
    /// due.
    #[instrument(skip(self))]
    pub async fn process_account(&self, account_no: &str) -> DepositResult<AccountAccrual> {
        let snapshot = self.load(account_no).await?;
        let mut outcome = AccountAccrual::default();
        if !snapshot.is_active() {
            return Ok(outcome);
        }

        let now = self.clock.now();
        if !work_due(&snapshot, now) {
            debug!(account_no = %account_no, "Nothing due");
            return Ok(outcome);
        }

        let payout_at = self.payout_date(&snapshot).await?;
        let rules = self.pricing.rules_or_empty(&snapshot, None).await?;

        let _guard = self.locks.lock(account_no).await;
        let mut account = self.load(account_no).await?;
        if !account.is_active() {
            return Ok(outcome);
        }
        let payout_at = match account.next_payout_at {
            Some(at) => at,
            None => {
                account.next_payout_at = Some(payout_at);
                account.updated_at = now;
                account = self.store.commit(&account, Vec::new()).await?.0;
                payout_at
            }
        };

        let mut next = first_due(&account);
        let mut iterations = 0u32;

        while let Some(due) = next {
            if due > now || due > payout_at || !account.is_active() {
                break;
            }
            if iterations >= self.max_iterations {
                warn!(
                    account_no = %account_no,
                    iterations,
                    next_accrual = %due,
                    "Catch-up iteration cap reached, resuming next pass"
                );
                break;
            }
            iterations += 1;

            let balance = ledger_balance(self.store.as_ref(), &account, now).await?;

            let pricing = select(&rules, account.base_interest_rate, balance);
            if pricing.applied_rate != account.interest_rate
                || pricing.rule_id() != account.applied_rule_id()
            {
                debug!(
                    account_no = %account_no,
                    from_rate = %account.interest_rate,
                    to_rate = %pricing.applied_rate,
                    rule_id = ?pricing.rule_id(),
                    "Pricing changed"
                );
                account.interest_rate = pricing.applied_rate;
                account.pricing_rule_id = pricing.rule.as_ref().map(|r| r.id.clone());
                account.pricing_rule_name = pricing.rule.as_ref().map(|r| r.name.clone());
                account.pricing_rule_applied_at = pricing.rule.as_ref().map(|_| now);
            }

            let interest = interest_for_period(balance, account.interest_rate);
            let reference = format!("interest:{}:{}", account_no, due.date_naive());
            let mut transactions = Vec::new();
            if interest >= Decimal::ONE {
                transactions.push(
                    NewTransaction::against_balance(
                        account_no,
                        TransactionType::InterestCredit,
                        interest,
                        balance,
                        now,
                        SYSTEM_ACTOR,
                    )
                    .with_reference(reference.clone()),
                );
                account.accrued_interest += interest;
            }

            account.last_interest_accrual_at = Some(due);
            next = next_anniversary_after(account.created_at, due);
            account.next_interest_accrual_at = next;
            account.updated_at = now;

            let (stored, booked) = self.store.commit(&account, transactions).await?;
            account = stored;
            self.cache.invalidate(account_no);

            if !booked.is_empty() {
                outcome.interest_credits += 1;
                outcome.total_interest += interest;
                INTEREST_CREDITS_TOTAL
                    .with_label_values(&[account.currency.as_str()])
                    .inc();
                info!(
                    account_no = %account_no,
                    anniversary = %due,
                    balance = %balance,
                    rate = %account.interest_rate,
                    interest = %interest,
                    "Interest credited"
                );
                // The account credit stands even if the treasury cannot be funded.
                if let Err(e) = self.wallet.fund_treasury(interest, Some(&reference)).await {
                    record_error("treasury_funding");
                    warn!(
                        account_no = %account_no,
                        interest = %interest,
                        error = %e,
                        "Treasury funding failed"
                    );
                }
            }
        }

        let caught_up = next.map_or(true, |due| due > payout_at);
        if account.is_active() && caught_up && now >= payout_at {
            self.finalize_maturity(account, now).await?;
            outcome.matured = true;
        }

        Ok(outcome)
    }

    /// Spawns the recurring accrual task. The interval is wall time and
    /// independent of the business clock.
    pub fn spawn(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "Accrual scheduler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Accrual scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            record_error(e.kind());
                            error!(error = %e, "Accrual pass failed");
                        }
                    }
                }
            }
        })
    }

    async fn load(&self, account_no: &str) -> DepositResult<Account> {
        self.store
            .get_account(account_no)
            .await?
            .ok_or_else(|| DepositError::not_found("account", account_no))
    }

    /// Stored `next_payout_at`, else `created_at + max(tenure, product max
    /// tenure)`. A failed product lookup fails the account for this pass;
    /// a guessed payout date could mature the account early.
    async fn payout_date(&self, account: &Account) -> DepositResult<DateTime<Utc>> {
        if let Some(at) = account.next_payout_at {
            return Ok(at);
        }

        let product = self.catalog.product_details(&account.product_code).await?;
        let product_max = u32::try_from(product.max_term_months).unwrap_or(0);
        let months = account.tenure_months_u32().max(product_max);
        add_months(account.created_at, months)
            .ok_or_else(|| DepositError::InvalidState("payout date out of range".to_string()))
    }

    async fn finalize_maturity(&self, mut account: Account, now: DateTime<Utc>) -> DepositResult<()> {
        let balance = ledger_balance(self.store.as_ref(), &account, now).await?;
        let payout = floor_units(balance);

        let mut transactions = Vec::new();
        if payout >= Decimal::ONE {
            transactions.push(
                NewTransaction::against_balance(
                    &account.account_no,
                    TransactionType::MaturityPayout,
                    payout,
                    balance,
                    now,
                    SYSTEM_ACTOR,
                )
                .with_reference(format!("maturity:{}", account.account_no)),
            );
        }

        account.status = AccountStatus::Matured;
        account.closed_at = Some(now);
        account.closed_by = Some(SYSTEM_ACTOR.to_string());
        account.closure_reason = Some("Matured".to_string());
        account.next_interest_accrual_at = None;
        account.next_payout_at = None;
        account.updated_at = now;

        let paid = !transactions.is_empty();
        self.store.commit(&account, transactions).await?;
        self.cache.invalidate(&account.account_no);

        ACCOUNTS_MATURED_TOTAL
            .with_label_values(&[if paid { "paid" } else { "empty" }])
            .inc();
        info!(
            account_no = %account.account_no,
            balance = %balance,
            payout = %payout,
            "Account matured"
        );
        Ok(())
    }
}

/// True when an anniversary is due or the account may have reached its
/// payout date. The earliest possible payout is `created_at + tenure`.
fn work_due(account: &Account, now: DateTime<Utc>) -> bool {
    if first_due(account).is_some_and(|due| due <= now) {
        return true;
    }
    let earliest_payout = account
        .next_payout_at
        .or_else(|| add_months(account.created_at, account.tenure_months_u32()));
    earliest_payout.map_or(true, |at| now >= at)
}

/// Persisted next accrual, else the anniversary after the last accrual, else
/// the first anniversary.
fn first_due(account: &Account) -> Option<DateTime<Utc>> {
    account
        .next_interest_accrual_at
        .or_else(|| {
            account
                .last_interest_accrual_at
                .and_then(|last| next_anniversary_after(account.created_at, last))
        })
        .or_else(|| anniversary(account.created_at, 1))
}
