pub mod discount;
pub mod totals;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::Cart;
use crate::domain::discount::DiscountRule;
use crate::errors::DomainError;

pub use discount::{evaluate, DiscountEvaluation, EvaluationContext, RuleApplication};
pub use totals::{calculate_order_total, percent_of, PricingBasis, PricingSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingContext {
    pub is_member: bool,
    pub now: DateTime<Utc>,
    pub mva_rate: Decimal,
}

impl PricingContext {
    fn evaluation(&self) -> EvaluationContext {
        EvaluationContext { is_member: self.is_member, now: self.now }
    }
}

/// A snapshot plus the rule decomposition that produced its discount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCart {
    pub snapshot: PricingSnapshot,
    pub applied_rules: Vec<RuleApplication>,
}

/// Cart entry point: evaluates the rules, then runs the same total
/// calculation as the two-argument entry point.
pub fn calculate_pricing(
    cart: &Cart,
    rules: &[DiscountRule],
    context: &PricingContext,
) -> Result<PricedCart, DomainError> {
    let evaluation = evaluate(cart, rules, &context.evaluation());
    let snapshot = calculate_order_total(&PricingBasis {
        subtotal_cents: cart.subtotal_cents(),
        discount_cents: evaluation.discount_cents,
        mva_rate: context.mva_rate,
    })?;
    Ok(PricedCart { snapshot, applied_rules: evaluation.applied_rules })
}

pub trait PricingEngine: Send + Sync {
    fn price(
        &self,
        cart: &Cart,
        rules: &[DiscountRule],
        context: &PricingContext,
    ) -> Result<PricedCart, DomainError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicPricingEngine;

impl PricingEngine for DeterministicPricingEngine {
    fn price(
        &self,
        cart: &Cart,
        rules: &[DiscountRule],
        context: &PricingContext,
    ) -> Result<PricedCart, DomainError> {
        calculate_pricing(cart, rules, context)
    }
}
