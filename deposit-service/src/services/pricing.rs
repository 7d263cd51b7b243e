//! Tiered pricing rule resolution.

use crate::error::DepositResult;
use crate::models::{Account, PricingEvaluation, PricingRule};
use crate::money::{ceil_units, round_half_up_2dp};
use crate::services::lookups::ProductCatalog;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct PricingRuleResolver {
    catalog: Arc<dyn ProductCatalog>,
}

impl PricingRuleResolver {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }

    /// Picks the first active rule whose threshold band contains `balance`
    /// and derives the effective rate and optional fee from it.
    ///
    /// Rule-source failures surface as `ServiceIntegration`.
    #[instrument(skip(self, account, auth_token), fields(account_no = %account.account_no, product_code = %account.product_code))]
    pub async fn evaluate(
        &self,
        account: &Account,
        balance: Decimal,
        auth_token: Option<&str>,
    ) -> DepositResult<PricingEvaluation> {
        let rules = self
            .catalog
            .active_pricing_rules(&account.product_code, auth_token)
            .await?;
        Ok(select(&rules, account.base_interest_rate, balance))
    }

    /// Like [`evaluate`](Self::evaluate), but an unreachable rule source
    /// yields the base rate with no rule.
    pub async fn evaluate_or_base(
        &self,
        account: &Account,
        balance: Decimal,
        auth_token: Option<&str>,
    ) -> DepositResult<PricingEvaluation> {
        let rules = self.rules_or_empty(account, auth_token).await?;
        Ok(select(&rules, account.base_interest_rate, balance))
    }

    /// Active rules for the account's product; none when the rule source is
    /// unreachable. Callers that price several balances fetch once and
    /// [`select`] per balance.
    pub async fn rules_or_empty(
        &self,
        account: &Account,
        auth_token: Option<&str>,
    ) -> DepositResult<Vec<PricingRule>> {
        match self
            .catalog
            .active_pricing_rules(&account.product_code, auth_token)
            .await
        {
            Ok(rules) => Ok(rules),
            Err(e) if e.is_service_integration() => {
                warn!(
                    account_no = %account.account_no,
                    error = %e,
                    "Pricing rules unavailable, keeping base rate"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

/// First active rule in `rules` whose band contains `balance`, applied to
/// `base_rate`.
pub fn select(rules: &[PricingRule], base_rate: Decimal, balance: Decimal) -> PricingEvaluation {
    match rules.iter().find(|rule| rule.active && rule.matches(balance)) {
        Some(rule) => {
            debug!(rule_id = %rule.id, "Pricing rule matched");
            resolve(rule.clone(), base_rate)
        }
        None => PricingEvaluation::unpriced(base_rate),
    }
}

fn resolve(rule: PricingRule, base_rate: Decimal) -> PricingEvaluation {
    let applied_rate = match (rule.interest_rate, rule.discount_percentage) {
        (Some(flat), _) if flat > Decimal::ZERO => round_half_up_2dp(flat),
        (_, Some(discount)) if discount > Decimal::ZERO => {
            let discounted = base_rate * (Decimal::ONE - discount / Decimal::ONE_HUNDRED);
            round_half_up_2dp(discounted.max(Decimal::ZERO))
        }
        _ => round_half_up_2dp(base_rate),
    };
    let penalty = rule
        .fee_amount
        .filter(|fee| !fee.is_zero())
        .map(|fee| ceil_units(fee.abs()));

    PricingEvaluation {
        rule: Some(rule),
        applied_rate,
        penalty,
    }
}
