//! External collaborators: product catalog, customer directory, maturity
//! calculator, and the redemption event sink.
//!
//! Production implementations go through a [`RequestResponseCorrelator`] per
//! topic; tests plug in stubs.

use crate::error::{DepositError, DepositResult};
use crate::models::{
    CurrencyPreference, CurrencyPreferenceRequest, CustomerValidation, CustomerValidationRequest,
    MaturityQuote, MaturityRequest, PricingRule, PricingRulesRequest, ProductDetails,
    ProductRequest, QuoteSource, RedemptionEvent,
};
use crate::money::round_half_up_2dp;
use crate::services::correlator::{
    ChannelPublisher, CorrelatedRequest, RequestResponseCorrelator,
};
use async_trait::async_trait;
use rust_decimal::{Decimal, MathematicalOps};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const PRODUCT_DETAILS_TOPIC: &str = "product.details";
pub const PRICING_RULES_TOPIC: &str = "product.pricing-rules";
pub const CUSTOMER_VALIDATION_TOPIC: &str = "customer.validation";
pub const CUSTOMER_CURRENCY_TOPIC: &str = "customer.currency";
pub const MATURITY_TOPIC: &str = "fd.maturity-calculation";

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product_details(&self, product_code: &str) -> DepositResult<ProductDetails>;

    /// Active rules for the product, pre-ordered by priority.
    async fn active_pricing_rules(
        &self,
        product_code: &str,
        auth_token: Option<&str>,
    ) -> DepositResult<Vec<PricingRule>>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn validate_customer(&self, customer_id: &str) -> DepositResult<CustomerValidation>;

    async fn preferred_currency(&self, customer_id: &str) -> DepositResult<Option<String>>;
}

#[async_trait]
pub trait MaturityCalculator: Send + Sync {
    async fn calculate(&self, request: &MaturityRequest) -> DepositResult<MaturityQuote>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_redemption(&self, event: RedemptionEvent) -> DepositResult<()>;
}

/// `P * (1 + r)^t` with `r = rate / 100` and `t` in years, HALF_UP to 2
/// decimals.
pub fn local_maturity(request: &MaturityRequest) -> DepositResult<MaturityQuote> {
    let base = Decimal::ONE + request.rate / Decimal::ONE_HUNDRED;
    let years = request.tenure_months / 12;
    let remainder = request.tenure_months % 12;

    let overflow = || DepositError::InvalidRequest("maturity calculation overflowed".to_string());
    let mut factor = base.checked_powu(u64::from(years)).ok_or_else(overflow)?;
    if remainder > 0 {
        let fraction = Decimal::from(remainder) / Decimal::from(12);
        factor = factor
            .checked_mul(base.checked_powd(fraction).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
    }

    let maturity_amount = round_half_up_2dp(
        request
            .principal
            .checked_mul(factor)
            .ok_or_else(overflow)?,
    );
    Ok(MaturityQuote {
        maturity_amount,
        interest_earned: maturity_amount - request.principal,
        effective_rate: round_half_up_2dp(request.rate),
        source: QuoteSource::LocalFallback,
    })
}

/// Asks the remote calculator and falls back to [`local_maturity`] when it
/// fails or times out.
pub async fn maturity_with_fallback(
    calculator: &dyn MaturityCalculator,
    request: &MaturityRequest,
) -> DepositResult<MaturityQuote> {
    match calculator.calculate(request).await {
        Ok(quote) => Ok(quote),
        Err(e) => {
            warn!(
                error = %e,
                principal = %request.principal,
                rate = %request.rate,
                tenure_months = request.tenure_months,
                "Maturity calculator unavailable, using local formula"
            );
            local_maturity(request)
        }
    }
}

/// Product catalog over correlated request/response topics.
pub struct CorrelatedProductCatalog {
    products: RequestResponseCorrelator<ProductRequest, Option<ProductDetails>>,
    pricing_rules: RequestResponseCorrelator<PricingRulesRequest, Vec<PricingRule>>,
}

impl CorrelatedProductCatalog {
    pub fn new(
        products: RequestResponseCorrelator<ProductRequest, Option<ProductDetails>>,
        pricing_rules: RequestResponseCorrelator<PricingRulesRequest, Vec<PricingRule>>,
    ) -> Self {
        Self {
            products,
            pricing_rules,
        }
    }
}

#[async_trait]
impl ProductCatalog for CorrelatedProductCatalog {
    async fn product_details(&self, product_code: &str) -> DepositResult<ProductDetails> {
        self.products
            .call(ProductRequest {
                product_code: product_code.to_string(),
            })
            .await?
            .ok_or_else(|| DepositError::not_found("product", product_code))
    }

    async fn active_pricing_rules(
        &self,
        product_code: &str,
        auth_token: Option<&str>,
    ) -> DepositResult<Vec<PricingRule>> {
        self.pricing_rules
            .call(PricingRulesRequest {
                product_code: product_code.to_string(),
                auth_token: auth_token.map(str::to_string),
            })
            .await
    }
}

/// Customer directory over correlated request/response topics.
pub struct CorrelatedCustomerDirectory {
    validation: RequestResponseCorrelator<CustomerValidationRequest, CustomerValidation>,
    currency: RequestResponseCorrelator<CurrencyPreferenceRequest, CurrencyPreference>,
}

impl CorrelatedCustomerDirectory {
    pub fn new(
        validation: RequestResponseCorrelator<CustomerValidationRequest, CustomerValidation>,
        currency: RequestResponseCorrelator<CurrencyPreferenceRequest, CurrencyPreference>,
    ) -> Self {
        Self {
            validation,
            currency,
        }
    }
}

#[async_trait]
impl CustomerDirectory for CorrelatedCustomerDirectory {
    async fn validate_customer(&self, customer_id: &str) -> DepositResult<CustomerValidation> {
        self.validation
            .call(CustomerValidationRequest {
                customer_id: customer_id.to_string(),
            })
            .await
    }

    async fn preferred_currency(&self, customer_id: &str) -> DepositResult<Option<String>> {
        let preference = self
            .currency
            .call(CurrencyPreferenceRequest {
                customer_id: customer_id.to_string(),
            })
            .await?;
        Ok(preference.currency)
    }
}

pub struct CorrelatedMaturityCalculator {
    calculations: RequestResponseCorrelator<MaturityRequest, MaturityQuote>,
}

impl CorrelatedMaturityCalculator {
    pub fn new(calculations: RequestResponseCorrelator<MaturityRequest, MaturityQuote>) -> Self {
        Self { calculations }
    }
}

#[async_trait]
impl MaturityCalculator for CorrelatedMaturityCalculator {
    async fn calculate(&self, request: &MaturityRequest) -> DepositResult<MaturityQuote> {
        self.calculations.call(request.clone()).await
    }
}

/// Correlators for every lookup topic, wired to in-process channels.
pub struct CorrelatedLookups {
    pub catalog: Arc<CorrelatedProductCatalog>,
    pub customers: Arc<CorrelatedCustomerDirectory>,
    pub calculator: Arc<CorrelatedMaturityCalculator>,
    pub streams: RequestStreams,
}

/// Request receivers to be bridged onto the message transport, with the
/// handles the bridge uses to deliver responses.
pub struct RequestStreams {
    pub products: mpsc::Receiver<CorrelatedRequest<ProductRequest>>,
    pub pricing_rules: mpsc::Receiver<CorrelatedRequest<PricingRulesRequest>>,
    pub customer_validation: mpsc::Receiver<CorrelatedRequest<CustomerValidationRequest>>,
    pub customer_currency: mpsc::Receiver<CorrelatedRequest<CurrencyPreferenceRequest>>,
    pub maturity: mpsc::Receiver<CorrelatedRequest<MaturityRequest>>,
    pub responders: LookupResponders,
}

/// Response side of every lookup topic; see
/// [`RequestResponseCorrelator::complete`].
#[derive(Clone)]
pub struct LookupResponders {
    pub products: RequestResponseCorrelator<ProductRequest, Option<ProductDetails>>,
    pub pricing_rules: RequestResponseCorrelator<PricingRulesRequest, Vec<PricingRule>>,
    pub customer_validation: RequestResponseCorrelator<CustomerValidationRequest, CustomerValidation>,
    pub customer_currency: RequestResponseCorrelator<CurrencyPreferenceRequest, CurrencyPreference>,
    pub maturity: RequestResponseCorrelator<MaturityRequest, MaturityQuote>,
}

impl RequestStreams {
    /// Consumes requests nobody will answer; callers then fail with a
    /// timeout and take their degraded paths.
    pub fn drain_unbridged(self) -> Vec<JoinHandle<()>> {
        vec![
            drain(PRODUCT_DETAILS_TOPIC, self.products),
            drain(PRICING_RULES_TOPIC, self.pricing_rules),
            drain(CUSTOMER_VALIDATION_TOPIC, self.customer_validation),
            drain(CUSTOMER_CURRENCY_TOPIC, self.customer_currency),
            drain(MATURITY_TOPIC, self.maturity),
        ]
    }
}

fn drain<Req: Send + 'static>(
    topic: &'static str,
    mut receiver: mpsc::Receiver<CorrelatedRequest<Req>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = receiver.recv().await {
            debug!(
                topic,
                correlation_id = %request.correlation_id,
                "No transport bridge configured, request left unanswered"
            );
        }
    })
}

impl CorrelatedLookups {
    pub fn over_channels(timeout: Duration, buffer: usize) -> Self {
        let (products_pub, products) = ChannelPublisher::channel(buffer);
        let (rules_pub, pricing_rules) = ChannelPublisher::channel(buffer);
        let (validation_pub, customer_validation) = ChannelPublisher::channel(buffer);
        let (currency_pub, customer_currency) = ChannelPublisher::channel(buffer);
        let (maturity_pub, maturity) = ChannelPublisher::channel(buffer);

        let responders = LookupResponders {
            products: RequestResponseCorrelator::new(
                PRODUCT_DETAILS_TOPIC,
                Arc::new(products_pub),
                timeout,
            ),
            pricing_rules: RequestResponseCorrelator::new(
                PRICING_RULES_TOPIC,
                Arc::new(rules_pub),
                timeout,
            ),
            customer_validation: RequestResponseCorrelator::new(
                CUSTOMER_VALIDATION_TOPIC,
                Arc::new(validation_pub),
                timeout,
            ),
            customer_currency: RequestResponseCorrelator::new(
                CUSTOMER_CURRENCY_TOPIC,
                Arc::new(currency_pub),
                timeout,
            ),
            maturity: RequestResponseCorrelator::new(MATURITY_TOPIC, Arc::new(maturity_pub), timeout),
        };

        let catalog = CorrelatedProductCatalog::new(
            responders.products.clone(),
            responders.pricing_rules.clone(),
        );
        let customers = CorrelatedCustomerDirectory::new(
            responders.customer_validation.clone(),
            responders.customer_currency.clone(),
        );
        let calculator = CorrelatedMaturityCalculator::new(responders.maturity.clone());

        Self {
            catalog: Arc::new(catalog),
            customers: Arc::new(customers),
            calculator: Arc::new(calculator),
            streams: RequestStreams {
                products,
                pricing_rules,
                customer_validation,
                customer_currency,
                maturity,
                responders,
            },
        }
    }
}

/// In-process redemption event fan-out.
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<RedemptionEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RedemptionEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish_redemption(&self, event: RedemptionEvent) -> DepositResult<()> {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(receivers, "Redemption event published");
            }
            Err(broadcast::error::SendError(event)) => {
                debug!(event_id = %event.event_id, "No subscribers for redemption event");
            }
        }
        Ok(())
    }
}
