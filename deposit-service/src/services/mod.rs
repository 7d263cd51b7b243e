//! Services module for deposit-service.

pub mod accounts;
pub mod accrual;
pub mod cache;
pub mod correlator;
pub mod currency;
pub mod locks;
pub mod lookups;
pub mod metrics;
pub mod pricing;
pub mod redemption;
pub mod store;
pub mod wallet;

pub use accounts::{ledger_balance, AccountService};
pub use accrual::{AccountAccrual, AccrualEngine, AccrualReport};
pub use cache::EnquiryCache;
pub use correlator::{ChannelPublisher, CorrelatedRequest, RequestPublisher, RequestResponseCorrelator};
pub use currency::convert_currency;
pub use locks::AccountLocks;
pub use lookups::{
    BroadcastEventPublisher, CorrelatedLookups, CustomerDirectory, EventPublisher,
    MaturityCalculator, ProductCatalog,
};
pub use metrics::{get_metrics, init_metrics, record_error};
pub use pricing::PricingRuleResolver;
pub use redemption::{premature_penalty, RedemptionEngine};
pub use store::{AccountRepository, InMemoryStore, PgStore, WalletRepository};
pub use wallet::WalletLedger;
