//! Common test utilities for deposit-service integration tests.
//!
//! Engines run over the in-memory store with a pinned business clock and
//! stubbed collaborators, so every test controls time and lookups.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use deposit_service::clock::{Clock, ControllableClock};
use deposit_service::error::{DepositError, DepositResult};
use deposit_service::models::{
    Account, CustomerValidation, MaturityQuote, MaturityRequest, NewTransaction, OpenAccount,
    PricingRule, ProductDetails, RedemptionEvent, Transaction, TransactionType,
};
use deposit_service::services::{
    AccountLocks, AccountRepository, AccountService, AccrualEngine, CustomerDirectory,
    EnquiryCache, EventPublisher, InMemoryStore, MaturityCalculator, PricingRuleResolver,
    ProductCatalog, RedemptionEngine, WalletLedger,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

pub const TREASURY_ID: &str = "TREASURY";
pub const CUSTOMER_ID: &str = "cust-001";
pub const OTHER_CUSTOMER_ID: &str = "cust-002";

/// One-year product: tenure 12 months only, 6% premature penalty, no grace.
pub const ONE_YEAR: &str = "FD-1Y";
/// Up to three years, 1% premature penalty with a 7-day grace period.
pub const THREE_YEAR: &str = "FD-3Y";
/// Pricing rules for this product fail with a non-integration error.
pub const BROKEN: &str = "FD-BROKEN";
pub const RETIRED: &str = "FD-OLD";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,deposit_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid test date")
}

fn product(code: &str, max_term: i32, penalty_rate: Decimal, grace_days: i32) -> ProductDetails {
    ProductDetails {
        product_code: code.to_string(),
        min_amount: dec!(1000),
        max_amount: dec!(1000000),
        min_term_months: 12,
        max_term_months: max_term,
        min_rate: dec!(1),
        max_rate: dec!(10),
        currency: "inr".to_string(),
        status: "ACTIVE".to_string(),
        penalty_rate: Some(penalty_rate),
        penalty_grace_days: Some(grace_days),
    }
}

pub fn pricing_rule(id: &str, min: Option<Decimal>, rate: Option<Decimal>) -> PricingRule {
    PricingRule {
        id: id.to_string(),
        product_id: THREE_YEAR.to_string(),
        name: format!("tier {}", id),
        min_threshold: min,
        max_threshold: None,
        interest_rate: rate,
        discount_percentage: None,
        fee_amount: None,
        priority: 1,
        active: true,
    }
}

/// Product catalog backed by fixed products and mutable rule lists.
pub struct StubCatalog {
    products: HashMap<String, ProductDetails>,
    rules: Mutex<HashMap<String, Vec<PricingRule>>>,
    rules_unavailable: AtomicBool,
    product_delay_ms: AtomicU64,
    failing_product_lookups: AtomicUsize,
    product_lookups: AtomicUsize,
}

impl StubCatalog {
    fn new() -> Self {
        let mut retired = product(RETIRED, 12, dec!(0.06), 0);
        retired.status = "RETIRED".to_string();
        let products = [
            product(ONE_YEAR, 12, dec!(0.06), 0),
            product(THREE_YEAR, 36, dec!(0.01), 7),
            product(BROKEN, 12, dec!(0.06), 0),
            retired,
        ]
        .into_iter()
        .map(|p| (p.product_code.clone(), p))
        .collect();
        Self {
            products,
            rules: Mutex::new(HashMap::new()),
            rules_unavailable: AtomicBool::new(false),
            product_delay_ms: AtomicU64::new(0),
            failing_product_lookups: AtomicUsize::new(0),
            product_lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_rules(&self, product_code: &str, rules: Vec<PricingRule>) {
        self.rules
            .lock()
            .expect("rules lock")
            .insert(product_code.to_string(), rules);
    }

    /// Makes the rule source time out like an unanswered correlated call.
    pub fn set_rules_unavailable(&self, unavailable: bool) {
        self.rules_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every product lookup like a slow product service.
    pub fn set_product_delay(&self, delay: std::time::Duration) {
        self.product_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The next `count` product lookups time out.
    pub fn fail_next_product_lookups(&self, count: usize) {
        self.failing_product_lookups.store(count, Ordering::SeqCst);
    }

    pub fn product_lookups(&self) -> usize {
        self.product_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductCatalog for StubCatalog {
    async fn product_details(&self, product_code: &str) -> DepositResult<ProductDetails> {
        self.product_lookups.fetch_add(1, Ordering::SeqCst);
        let delay = self.product_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let failing = self
            .failing_product_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DepositError::integration(
                "product-service",
                "no response within 5000ms",
            ));
        }
        self.products
            .get(product_code)
            .cloned()
            .ok_or_else(|| DepositError::not_found("product", product_code))
    }

    async fn active_pricing_rules(
        &self,
        product_code: &str,
        _auth_token: Option<&str>,
    ) -> DepositResult<Vec<PricingRule>> {
        if product_code == BROKEN {
            return Err(DepositError::Storage("rule table corrupted".to_string()));
        }
        if self.rules_unavailable.load(Ordering::SeqCst) {
            return Err(DepositError::integration(
                "product-service",
                "no response within 5000ms",
            ));
        }
        Ok(self
            .rules
            .lock()
            .expect("rules lock")
            .get(product_code)
            .cloned()
            .unwrap_or_default())
    }
}

/// Customers are valid unless their id starts with `blocked`; ids starting
/// with `usd-` prefer USD.
pub struct StubCustomers;

#[async_trait]
impl CustomerDirectory for StubCustomers {
    async fn validate_customer(&self, customer_id: &str) -> DepositResult<CustomerValidation> {
        let blocked = customer_id.starts_with("blocked");
        Ok(CustomerValidation {
            customer_id: customer_id.to_string(),
            valid: true,
            active: !blocked,
        })
    }

    async fn preferred_currency(&self, customer_id: &str) -> DepositResult<Option<String>> {
        Ok(customer_id.starts_with("usd-").then(|| "USD".to_string()))
    }
}

/// Remote calculator that never answers, forcing the local formula.
pub struct UnavailableCalculator;

#[async_trait]
impl MaturityCalculator for UnavailableCalculator {
    async fn calculate(&self, _request: &MaturityRequest) -> DepositResult<MaturityQuote> {
        Err(DepositError::integration(
            "maturity-calculator",
            "no response within 5000ms",
        ))
    }
}

/// Records published events; can be switched to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<RedemptionEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<RedemptionEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_redemption(&self, event: RedemptionEvent) -> DepositResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DepositError::integration("event-bus", "broker unavailable"));
        }
        self.events.lock().expect("events lock").push(event);
        Ok(())
    }
}

/// Every engine wired over one in-memory store.
pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ControllableClock>,
    pub catalog: Arc<StubCatalog>,
    pub events: Arc<RecordingPublisher>,
    pub cache: Arc<EnquiryCache>,
    pub wallet: Arc<WalletLedger>,
    pub accounts: AccountService,
    pub accrual: AccrualEngine,
    pub redemption: RedemptionEngine,
}

impl TestApp {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self::with_catch_up_cap(start, 120)
    }

    pub fn with_catch_up_cap(start: DateTime<Utc>, max_iterations: u32) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ControllableClock::fixed(start));
        let business_clock: Arc<dyn Clock> = clock.clone();
        let catalog = Arc::new(StubCatalog::new());
        let customers = Arc::new(StubCustomers);
        let events = Arc::new(RecordingPublisher::default());
        let cache = Arc::new(EnquiryCache::new());
        let locks = AccountLocks::new();
        let pricing = Arc::new(PricingRuleResolver::new(catalog.clone()));

        let wallet = Arc::new(WalletLedger::new(
            store.clone(),
            customers.clone(),
            business_clock.clone(),
            TREASURY_ID,
            "INR",
        ));
        let accounts = AccountService::new(
            store.clone(),
            catalog.clone(),
            customers,
            Arc::new(UnavailableCalculator),
            pricing.clone(),
            locks.clone(),
            cache.clone(),
            business_clock.clone(),
        );
        let accrual = AccrualEngine::new(
            store.clone(),
            wallet.clone(),
            pricing,
            catalog.clone(),
            locks.clone(),
            cache.clone(),
            business_clock.clone(),
            max_iterations,
        );
        let redemption = RedemptionEngine::new(
            store.clone(),
            wallet.clone(),
            events.clone(),
            locks,
            cache.clone(),
            business_clock,
        );

        Self {
            store,
            clock,
            catalog,
            events,
            cache,
            wallet,
            accounts,
            accrual,
            redemption,
        }
    }

    pub fn set_date(&self, at: DateTime<Utc>) {
        self.clock.set(at);
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    /// Opens a deposit for [`CUSTOMER_ID`].
    pub async fn open(
        &self,
        product_code: &str,
        principal: Decimal,
        tenure_months: u32,
        rate: Decimal,
    ) -> Account {
        self.accounts
            .open_account(OpenAccount {
                customer_id: CUSTOMER_ID.to_string(),
                product_code: product_code.to_string(),
                principal,
                tenure_months,
                interest_rate: Some(rate),
                auth_token: None,
            })
            .await
            .expect("Failed to open account")
    }

    /// Stores `account` directly with its opening deposit, bypassing the
    /// product and pricing checks of `open_account`.
    pub async fn store_insert(&self, account: Account) -> Account {
        let deposit = NewTransaction::against_balance(
            &account.account_no,
            TransactionType::Deposit,
            account.principal,
            Decimal::ZERO,
            account.created_at,
            &account.customer_id,
        );
        self.store
            .insert_account(&account, vec![deposit])
            .await
            .expect("Failed to insert account")
            .0
    }

    pub async fn account_deposit(&self, account_no: &str, amount: Decimal) -> Transaction {
        self.accounts
            .record_transaction(account_no, TransactionType::Deposit, amount, CUSTOMER_ID, None)
            .await
            .expect("Failed to record deposit")
    }

    pub async fn account(&self, account_no: &str) -> Account {
        self.store
            .get_account(account_no)
            .await
            .expect("Failed to load account")
            .expect("Account missing")
    }

    pub async fn transactions(&self, account_no: &str) -> Vec<Transaction> {
        self.store
            .list_transactions(account_no)
            .await
            .expect("Failed to list transactions")
    }

    pub async fn balance(&self, account_no: &str) -> Decimal {
        self.transactions(account_no)
            .await
            .last()
            .map(|txn| txn.balance_after)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn treasury_balance(&self) -> Decimal {
        self.wallet
            .wallet(TREASURY_ID)
            .await
            .expect("Failed to load treasury")
            .map(|w| w.balance)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Amounts of every transaction of `kind`, in booking order.
pub fn amounts_of(transactions: &[Transaction], kind: TransactionType) -> Vec<Decimal> {
    transactions
        .iter()
        .filter(|txn| txn.transaction_type == kind)
        .map(|txn| txn.amount)
        .collect()
}
