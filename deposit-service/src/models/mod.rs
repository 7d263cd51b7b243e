//! Domain models for deposit-service.

mod account;
mod lookup;
mod pricing;
mod redemption;
mod transaction;
mod wallet;

pub use account::{Account, AccountStatus, OpenAccount};
pub use lookup::{
    CurrencyPreference, CurrencyPreferenceRequest, CustomerValidation, CustomerValidationRequest,
    MaturityQuote, MaturityRequest, QuoteSource,
};
pub use pricing::{
    PricingEvaluation, PricingRule, PricingRulesRequest, ProductDetails, ProductRequest,
};
pub use redemption::{
    PenaltyAssessment, RedemptionEnquiry, RedemptionEvent, RedemptionRequest, RedemptionResult,
    RedemptionType, Requester,
};
pub use transaction::{NewTransaction, Transaction, TransactionType};
pub use wallet::{LedgerEntry, LedgerOperation, LedgerSummary, Wallet, WalletMutation};
