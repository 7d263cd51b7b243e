//! Customer and maturity-calculation payloads exchanged with other services.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerValidationRequest {
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerValidation {
    pub customer_id: String,
    pub valid: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturityRequest {
    pub principal: Decimal,
    /// Annual rate in percent.
    pub rate: Decimal,
    pub tenure_months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Remote,
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturityQuote {
    pub maturity_amount: Decimal,
    pub interest_earned: Decimal,
    pub effective_rate: Decimal,
    #[serde(default = "remote_source")]
    pub source: QuoteSource,
}

fn remote_source() -> QuoteSource {
    QuoteSource::Remote
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPreferenceRequest {
    pub customer_id: String,
}

/// Customer profile currency; `None` when the profile has no preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPreference {
    pub customer_id: String,
    pub currency: Option<String>,
}
