//! Account opening and ad-hoc transaction recording.

use crate::clock::{add_months, anniversary, Clock};
use crate::error::{DepositError, DepositResult};
use crate::models::{
    Account, AccountStatus, MaturityRequest, NewTransaction, OpenAccount, Transaction,
    TransactionType,
};
use crate::money::normalize_amount;
use crate::services::cache::EnquiryCache;
use crate::services::currency::normalize_code;
use crate::services::locks::AccountLocks;
use crate::services::lookups::{
    maturity_with_fallback, CustomerDirectory, MaturityCalculator, ProductCatalog,
};
use crate::services::pricing::PricingRuleResolver;
use crate::services::store::AccountRepository;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Current ledger balance: `balance_after` of the latest transaction at or
/// before `as_of`, or the principal when nothing has been booked yet.
pub async fn ledger_balance(
    store: &dyn AccountRepository,
    account: &Account,
    as_of: DateTime<Utc>,
) -> DepositResult<Decimal> {
    Ok(store
        .latest_transaction(&account.account_no, as_of)
        .await?
        .map(|txn| txn.balance_after)
        .unwrap_or(account.principal))
}

pub struct AccountService {
    store: Arc<dyn AccountRepository>,
    catalog: Arc<dyn ProductCatalog>,
    customers: Arc<dyn CustomerDirectory>,
    calculator: Arc<dyn MaturityCalculator>,
    pricing: Arc<PricingRuleResolver>,
    locks: AccountLocks,
    cache: Arc<EnquiryCache>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AccountRepository>,
        catalog: Arc<dyn ProductCatalog>,
        customers: Arc<dyn CustomerDirectory>,
        calculator: Arc<dyn MaturityCalculator>,
        pricing: Arc<PricingRuleResolver>,
        locks: AccountLocks,
        cache: Arc<EnquiryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            customers,
            calculator,
            pricing,
            locks,
            cache,
            clock,
        }
    }

    /// Opens a fixed deposit.
    ///
    /// Customer and product validation failures are fatal, including an
    /// unreachable directory or catalog. The maturity amount falls back to
    /// the local formula, and initial pricing to the base rate. A fee on the
    /// initial pricing rule is booked as a PENALTY_DEBIT after the opening
    /// deposit.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, product_code = %request.product_code))]
    pub async fn open_account(&self, request: OpenAccount) -> DepositResult<Account> {
        let validation = self.customers.validate_customer(&request.customer_id).await?;
        if !validation.valid || !validation.active {
            return Err(DepositError::InvalidRequest(format!(
                "customer {} is not valid or not active",
                request.customer_id
            )));
        }

        let product = self.catalog.product_details(&request.product_code).await?;
        if !product.is_active() {
            return Err(DepositError::InvalidRequest(format!(
                "product {} is not active",
                request.product_code
            )));
        }

        let principal = normalize_amount(request.principal)?;
        if principal < product.min_amount || principal > product.max_amount {
            return Err(DepositError::InvalidAmount(format!(
                "principal {} outside product range {}..={}",
                principal, product.min_amount, product.max_amount
            )));
        }

        let tenure = i32::try_from(request.tenure_months).map_err(|_| {
            DepositError::InvalidRequest(format!("tenure {} is too large", request.tenure_months))
        })?;
        if tenure < product.min_term_months.max(1) || tenure > product.max_term_months {
            return Err(DepositError::InvalidRequest(format!(
                "tenure {} months outside product range {}..={}",
                tenure, product.min_term_months, product.max_term_months
            )));
        }

        let rate = request.interest_rate.unwrap_or(product.min_rate);
        if rate < product.min_rate || rate > product.max_rate {
            return Err(DepositError::InvalidRequest(format!(
                "rate {} outside product range {}..={}",
                rate, product.min_rate, product.max_rate
            )));
        }

        let now = self.clock.now();
        let maturity_date = add_months(now, request.tenure_months).ok_or_else(|| {
            DepositError::InvalidRequest("maturity date out of range".to_string())
        })?;

        let quote = maturity_with_fallback(
            self.calculator.as_ref(),
            &MaturityRequest {
                principal,
                rate,
                tenure_months: request.tenure_months,
            },
        )
        .await?;

        let mut account = Account {
            account_no: generate_account_no(),
            customer_id: request.customer_id.clone(),
            product_code: request.product_code.clone(),
            currency: normalize_code(&product.currency),
            principal,
            interest_rate: rate,
            base_interest_rate: rate,
            tenure_months: tenure,
            status: AccountStatus::Active,
            created_at: now,
            maturity_date,
            maturity_amount: quote.maturity_amount,
            last_interest_accrual_at: None,
            next_interest_accrual_at: anniversary(now, 1),
            next_payout_at: None,
            accrued_interest: Decimal::ZERO,
            premature_penalty_rate: product.penalty_rate_or_zero(),
            premature_penalty_grace_days: product.grace_days_or_zero(),
            pricing_rule_id: None,
            pricing_rule_name: None,
            pricing_rule_applied_at: None,
            closed_at: None,
            closed_by: None,
            closure_reason: None,
            updated_at: now,
            version: 0,
        };

        let pricing = self
            .pricing
            .evaluate_or_base(&account, principal, request.auth_token.as_deref())
            .await?;
        account.interest_rate = pricing.applied_rate;
        if let Some(rule) = &pricing.rule {
            account.pricing_rule_id = Some(rule.id.clone());
            account.pricing_rule_name = Some(rule.name.clone());
            account.pricing_rule_applied_at = Some(now);
        }

        let actor = request.customer_id.as_str();
        let deposit = NewTransaction::against_balance(
            &account.account_no,
            TransactionType::Deposit,
            principal,
            Decimal::ZERO,
            now,
            actor,
        )
        .with_reference("account-opening");
        let mut transactions = vec![deposit];
        if let Some(fee) = pricing.penalty {
            let fee = fee.min(principal);
            transactions.push(
                NewTransaction::against_balance(
                    &account.account_no,
                    TransactionType::PenaltyDebit,
                    fee,
                    principal,
                    now,
                    "system",
                )
                .with_reference(format!(
                    "pricing-fee:{}",
                    pricing.rule_id().unwrap_or_default()
                )),
            );
        }

        let (account, _) = self.store.insert_account(&account, transactions).await?;

        info!(
            account_no = %account.account_no,
            principal = %account.principal,
            interest_rate = %account.interest_rate,
            maturity_date = %account.maturity_date,
            maturity_source = ?quote.source,
            "Fixed deposit opened"
        );

        Ok(account)
    }

    /// Books a caller-driven transaction (deposit, withdrawal, penalty debit,
    /// or reversal credit) against an active account.
    #[instrument(skip(self))]
    pub async fn record_transaction(
        &self,
        account_no: &str,
        transaction_type: TransactionType,
        amount: Decimal,
        actor: &str,
        reference: Option<&str>,
    ) -> DepositResult<Transaction> {
        if !matches!(
            transaction_type,
            TransactionType::Deposit
                | TransactionType::Withdrawal
                | TransactionType::PenaltyDebit
                | TransactionType::Reversal
        ) {
            return Err(DepositError::InvalidRequest(format!(
                "{} transactions are booked by the accrual and redemption engines",
                transaction_type
            )));
        }
        let amount = normalize_amount(amount)?;

        let _guard = self.locks.lock(account_no).await;
        let mut account = self.require_account(account_no).await?;
        if !account.is_active() {
            return Err(DepositError::InvalidState(format!(
                "account {} is {}",
                account_no, account.status
            )));
        }

        let now = self.clock.now();
        let balance = ledger_balance(self.store.as_ref(), &account, now).await?;
        if transaction_type.is_debit() && amount > balance {
            return Err(DepositError::InsufficientBalance {
                available: balance,
                requested: amount,
            });
        }

        let mut txn =
            NewTransaction::against_balance(account_no, transaction_type, amount, balance, now, actor);
        if let Some(reference) = reference {
            txn = txn.with_reference(reference);
        }

        account.updated_at = now;
        let (_, mut booked) = self.store.commit(&account, vec![txn]).await?;
        self.cache.invalidate(account_no);

        let booked = booked
            .pop()
            .ok_or_else(|| DepositError::Storage("transaction was not booked".to_string()))?;
        info!(
            account_no = %account_no,
            transaction_type = %booked.transaction_type,
            amount = %booked.amount,
            balance_after = %booked.balance_after,
            "Transaction recorded"
        );
        Ok(booked)
    }

    pub async fn current_balance(&self, account_no: &str) -> DepositResult<Decimal> {
        let account = self.require_account(account_no).await?;
        ledger_balance(self.store.as_ref(), &account, self.clock.now()).await
    }

    async fn require_account(&self, account_no: &str) -> DepositResult<Account> {
        self.store
            .get_account(account_no)
            .await?
            .ok_or_else(|| DepositError::not_found("account", account_no))
    }
}

fn generate_account_no() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("FD{}", &id[..16])
}
