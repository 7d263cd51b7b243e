//! Redemption quotes and execution.

use crate::clock::Clock;
use crate::error::{DepositError, DepositResult};
use crate::models::{
    Account, AccountStatus, NewTransaction, PenaltyAssessment, RedemptionEnquiry, RedemptionEvent,
    RedemptionRequest, RedemptionResult, RedemptionType, Requester, TransactionType,
};
use crate::money::round_half_up_units;
use crate::services::accounts::ledger_balance;
use crate::services::cache::EnquiryCache;
use crate::services::locks::AccountLocks;
use crate::services::lookups::EventPublisher;
use crate::services::metrics::{record_error, REDEMPTIONS_TOTAL};
use crate::services::store::AccountRepository;
use crate::services::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Penalty window used when the product has no grace period.
pub const DEFAULT_PENALTY_WINDOW_DAYS: i64 = 30;

/// Matured accounts left unredeemed longer than this get a warning.
pub const OVERDUE_WARNING_DAYS: i64 = 30;

/// Premature-closure penalty on `balance`.
///
/// No penalty at or after maturity, with a non-positive rate, or inside the
/// grace window. Otherwise the penalty ramps linearly over the first
/// `window` chargeable days (the grace period, or 30 days without one) and
/// is `balance * rate` beyond it. Rounded HALF_UP to whole units.
pub fn premature_penalty(
    balance: Decimal,
    penalty_rate: Decimal,
    grace_days: i64,
    days_until_maturity: i64,
) -> PenaltyAssessment {
    if days_until_maturity <= 0 {
        return PenaltyAssessment {
            amount: Decimal::ZERO,
            reason: "Account has matured; no premature penalty".to_string(),
        };
    }
    if penalty_rate <= Decimal::ZERO {
        return PenaltyAssessment {
            amount: Decimal::ZERO,
            reason: "Product carries no premature penalty".to_string(),
        };
    }
    if days_until_maturity <= grace_days {
        return PenaltyAssessment {
            amount: Decimal::ZERO,
            reason: format!(
                "Within the {}-day grace period before maturity; no penalty",
                grace_days
            ),
        };
    }

    let chargeable = days_until_maturity - grace_days;
    let window = if grace_days > 0 {
        grace_days
    } else {
        DEFAULT_PENALTY_WINDOW_DAYS
    }
    .max(1);

    let full = balance.max(Decimal::ZERO) * penalty_rate;
    let (amount, reason) = if chargeable < window {
        (
            full * Decimal::from(chargeable) / Decimal::from(window),
            format!(
                "Premature closure {} days before maturity: {}% of balance pro-rated over {}/{} days",
                days_until_maturity,
                penalty_rate * Decimal::ONE_HUNDRED,
                chargeable,
                window
            ),
        )
    } else {
        (
            full,
            format!(
                "Premature closure {} days before maturity: {}% of balance",
                days_until_maturity,
                penalty_rate * Decimal::ONE_HUNDRED
            ),
        )
    };

    PenaltyAssessment {
        amount: round_half_up_units(amount),
        reason,
    }
}

pub struct RedemptionEngine {
    store: Arc<dyn AccountRepository>,
    wallet: Arc<WalletLedger>,
    events: Arc<dyn EventPublisher>,
    locks: AccountLocks,
    cache: Arc<EnquiryCache>,
    clock: Arc<dyn Clock>,
}

impl RedemptionEngine {
    pub fn new(
        store: Arc<dyn AccountRepository>,
        wallet: Arc<WalletLedger>,
        events: Arc<dyn EventPublisher>,
        locks: AccountLocks,
        cache: Arc<EnquiryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            wallet,
            events,
            locks,
            cache,
            clock,
        }
    }

    /// Redemption quote at the current business time. Served from the cache
    /// while nothing has touched the account.
    #[instrument(skip(self))]
    pub async fn get_redemption_enquiry(&self, account_no: &str) -> DepositResult<RedemptionEnquiry> {
        let now = self.clock.now();
        let account = self.require_active(account_no).await?;
        if let Some(cached) = self.cache.get(account_no, now) {
            return Ok(cached);
        }

        let enquiry = self.compute_enquiry(&account, now).await?;
        self.cache.put(enquiry.clone());
        Ok(enquiry)
    }

    /// Closes the account and books the payout.
    ///
    /// Any penalty is booked as a PENALTY_DEBIT ahead of the closure
    /// transaction in the same commit, so the account balance ends at zero.
    /// The redemption event is published after the commit; a publish failure
    /// is logged and does not undo the redemption.
    #[instrument(skip(self, request), fields(account_no = %request.account_no, requester = %request.requester.customer_id))]
    pub async fn process_redemption(
        &self,
        request: RedemptionRequest,
    ) -> DepositResult<RedemptionResult> {
        let result = self.redeem(request).await;
        match &result {
            Ok(done) => REDEMPTIONS_TOTAL
                .with_label_values(&[done.redemption_type.as_str(), "ok"])
                .inc(),
            Err(e) => {
                record_error(e.kind());
                REDEMPTIONS_TOTAL
                    .with_label_values(&["unknown", "error"])
                    .inc();
            }
        }
        result
    }

    async fn redeem(&self, request: RedemptionRequest) -> DepositResult<RedemptionResult> {
        let _guard = self.locks.lock(&request.account_no).await;

        // A replay is reported as a duplicate even though the account is closed by now.
        let transaction_id = request.idempotency_key.unwrap_or_else(Uuid::new_v4);
        if self.store.find_transaction(transaction_id).await?.is_some() {
            return Err(DepositError::Conflict(format!(
                "redemption {} was already processed",
                transaction_id
            )));
        }

        let mut account = self.require_active(&request.account_no).await?;
        authorize(&request.requester, &account)?;

        let now = self.clock.now();
        let quote = self.compute_enquiry(&account, now).await?;
        let actor = request.requester.customer_id.clone();

        let mut transactions = Vec::with_capacity(2);
        let mut running = quote.current_balance;
        if quote.penalty_amount > Decimal::ZERO {
            let penalty = NewTransaction::against_balance(
                &account.account_no,
                TransactionType::PenaltyDebit,
                quote.penalty_amount,
                running,
                now,
                &actor,
            )
            .with_reference(format!("premature-penalty:{}", transaction_id));
            running = penalty.balance_after;
            transactions.push(penalty);
        }
        transactions.push(
            NewTransaction::against_balance(
                &account.account_no,
                quote.redemption_type.transaction_type(),
                quote.net_payable.max(Decimal::ZERO),
                running,
                now,
                &actor,
            )
            .with_id(transaction_id)
            .with_reference(format!("redemption:{}", account.account_no)),
        );

        let reason = request.reason.clone().unwrap_or_else(|| match quote.redemption_type {
            RedemptionType::Maturity => "Maturity redemption".to_string(),
            RedemptionType::Premature => "Premature redemption".to_string(),
        });
        let principal = account.principal;

        account.status = AccountStatus::Closed;
        account.closed_at = Some(now);
        account.closed_by = Some(actor.clone());
        account.closure_reason = Some(reason.clone());
        account.principal = Decimal::ZERO;
        account.maturity_amount = Decimal::ZERO;
        account.accrued_interest = Decimal::ZERO;
        account.next_interest_accrual_at = None;
        account.next_payout_at = None;
        account.updated_at = now;

        self.store.commit(&account, transactions).await?;
        self.cache.invalidate(&account.account_no);

        let days_before_maturity = quote.days_until_maturity.max(0);
        let result = RedemptionResult {
            transaction_id,
            account_no: account.account_no.clone(),
            redemption_type: quote.redemption_type,
            principal,
            interest: quote.accrued_interest,
            penalty: quote.penalty_amount,
            net_amount: quote.net_payable,
            days_before_maturity,
            processed_at: now,
            processed_by: actor.clone(),
        };

        info!(
            account_no = %account.account_no,
            transaction_id = %transaction_id,
            redemption_type = %quote.redemption_type,
            penalty = %quote.penalty_amount,
            net_amount = %quote.net_payable,
            "Redemption processed"
        );

        let event = RedemptionEvent {
            event_id: Uuid::new_v4(),
            account_no: account.account_no.clone(),
            customer_id: account.customer_id.clone(),
            redemption_type: quote.redemption_type,
            principal_amount: principal,
            interest_amount: quote.accrued_interest,
            penalty_amount: quote.penalty_amount,
            net_amount: quote.net_payable,
            maturity_date: account.maturity_date,
            days_before_maturity,
            reason,
            processed_by: actor,
            occurred_at: now,
        };
        if let Err(e) = self.events.publish_redemption(event).await {
            record_error("event_publish");
            warn!(
                account_no = %account.account_no,
                transaction_id = %transaction_id,
                error = %e,
                "Redemption committed but event publication failed"
            );
        }

        Ok(result)
    }

    async fn compute_enquiry(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> DepositResult<RedemptionEnquiry> {
        let is_matured = now >= account.maturity_date;
        let days_until_maturity = (account.maturity_date.date_naive() - now.date_naive()).num_days();
        let days_overdue = if is_matured {
            (-days_until_maturity).max(0)
        } else {
            0
        };

        let balance = ledger_balance(self.store.as_ref(), account, now).await?;
        let accrued_interest = (balance - account.principal).max(Decimal::ZERO);
        let grace_days = account.grace_days();

        let mut warnings = Vec::new();
        let (redemption_type, penalty) = if is_matured {
            if days_overdue > OVERDUE_WARNING_DAYS {
                warnings.push(format!(
                    "Account matured {} days ago and has not been redeemed",
                    days_overdue
                ));
            }
            (RedemptionType::Maturity, None)
        } else {
            let assessment = premature_penalty(
                balance,
                account.premature_penalty_rate,
                grace_days,
                days_until_maturity,
            );
            warnings.push(format!(
                "Redeeming {} days before maturity forfeits the remaining term",
                days_until_maturity
            ));
            if assessment.amount > Decimal::ZERO {
                warnings.push(format!(
                    "A premature closure penalty of {} {} applies",
                    assessment.amount, account.currency
                ));
            }
            (RedemptionType::Premature, Some(assessment))
        };

        let penalty_amount = penalty
            .as_ref()
            .map(|p| p.amount.min(balance.max(Decimal::ZERO)))
            .unwrap_or(Decimal::ZERO);

        let wallet = match self.wallet.wallet(&account.customer_id).await {
            Ok(wallet) => wallet,
            Err(e) => {
                warn!(customer_id = %account.customer_id, error = %e, "Wallet lookup failed");
                None
            }
        };

        Ok(RedemptionEnquiry {
            account_no: account.account_no.clone(),
            customer_id: account.customer_id.clone(),
            currency: account.currency.clone(),
            redemption_type,
            is_matured,
            maturity_date: account.maturity_date,
            days_until_maturity,
            days_overdue,
            principal: account.principal,
            current_balance: balance,
            accrued_interest,
            penalty_rate: account.premature_penalty_rate,
            grace_days,
            penalty_amount,
            penalty_reason: penalty.map(|p| p.reason),
            net_payable: balance - penalty_amount,
            wallet_balance: wallet.as_ref().map(|w| w.balance),
            wallet_currency: wallet.map(|w| w.base_currency),
            warnings,
            computed_at: now,
        })
    }

    async fn require_active(&self, account_no: &str) -> DepositResult<Account> {
        let account = self
            .store
            .get_account(account_no)
            .await?
            .ok_or_else(|| DepositError::not_found("account", account_no))?;
        if !account.is_active() {
            return Err(DepositError::InvalidState(format!(
                "account {} is {}",
                account_no, account.status
            )));
        }
        Ok(account)
    }
}

fn authorize(requester: &Requester, account: &Account) -> DepositResult<()> {
    if requester.admin || requester.customer_id == account.customer_id {
        Ok(())
    } else {
        Err(DepositError::Unauthorized(format!(
            "{} may not redeem account {}",
            requester.customer_id, account.account_no
        )))
    }
}
