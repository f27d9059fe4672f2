use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, ValidationErrors};

/// Inputs for the two-argument entry point: a subtotal and an already
/// computed discount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBasis {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    /// Percent, e.g. `25` for 25 % MVA. Zero when the organizer does not
    /// report MVA.
    pub mva_rate: Decimal,
}

/// Immutable record of how an order's price was derived. Field names are a
/// stable export contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub subtotal_after_discount_cents: i64,
    pub mva_rate: Decimal,
    pub mva_cents: i64,
    pub total_cents: i64,
}

impl PricingSnapshot {
    /// Checks the arithmetic identities, e.g. after decoding a stored copy.
    pub fn verify(&self) -> Result<(), DomainError> {
        let consistent = self.discount_cents >= 0
            && self.discount_cents <= self.subtotal_cents
            && self.subtotal_after_discount_cents == self.subtotal_cents - self.discount_cents
            && self.total_cents == self.subtotal_after_discount_cents + self.mva_cents;
        if consistent {
            Ok(())
        } else {
            Err(DomainError::InvariantViolation(format!(
                "pricing snapshot does not add up: {self:?}"
            )))
        }
    }
}

/// `amount * percent / 100`, rounded half-up to whole øre. Amounts are never
/// negative here, so away-from-zero is half-up.
pub fn percent_of(amount_cents: i64, percent: Decimal) -> i64 {
    let exact = Decimal::from(amount_cents) * percent / Decimal::ONE_HUNDRED;
    exact
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}

pub fn calculate_order_total(basis: &PricingBasis) -> Result<PricingSnapshot, DomainError> {
    let mut errors = ValidationErrors::new();
    if basis.subtotal_cents < 0 {
        errors.push("subtotal_cents", "must not be negative");
    }
    if basis.discount_cents < 0 {
        errors.push("discount_cents", "must not be negative");
    }
    if basis.mva_rate < Decimal::ZERO || basis.mva_rate > Decimal::ONE_HUNDRED {
        errors.push("mva_rate", "must be between 0 and 100");
    }
    errors.into_result()?;

    let discount_cents = basis.discount_cents.min(basis.subtotal_cents);
    let subtotal_after_discount_cents = basis.subtotal_cents - discount_cents;
    let mva_cents = percent_of(subtotal_after_discount_cents, basis.mva_rate);

    Ok(PricingSnapshot {
        subtotal_cents: basis.subtotal_cents,
        discount_cents,
        subtotal_after_discount_cents,
        mva_rate: basis.mva_rate,
        mva_cents,
        total_cents: subtotal_after_discount_cents + mva_cents,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{calculate_order_total, percent_of, PricingBasis};

    #[test]
    fn mva_rounds_half_up_to_whole_ore() {
        // 25 % of 2 øre is 0.5 øre.
        assert_eq!(percent_of(2, Decimal::new(25, 0)), 1);
        // 15 % of 3 øre is 0.45 øre.
        assert_eq!(percent_of(3, Decimal::new(15, 0)), 0);
        // 12 % of 1 234 567 øre is 148 148.04 øre.
        assert_eq!(percent_of(1_234_567, Decimal::new(12, 0)), 148_148);
        // 25 % of 99 999 øre is 24 999.75 øre.
        assert_eq!(percent_of(99_999, Decimal::new(25, 0)), 25_000);
    }

    #[test]
    fn fractional_mva_rate_is_exact() {
        let snapshot = calculate_order_total(&PricingBasis {
            subtotal_cents: 10_001,
            discount_cents: 1,
            mva_rate: Decimal::new(125, 1),
        })
        .expect("valid basis");

        assert_eq!(snapshot.subtotal_after_discount_cents, 10_000);
        assert_eq!(snapshot.mva_cents, 1_250);
        assert_eq!(snapshot.total_cents, 11_250);
        snapshot.verify().expect("identities hold");
    }

    #[test]
    fn discount_above_subtotal_is_clamped() {
        let snapshot = calculate_order_total(&PricingBasis {
            subtotal_cents: 5_000,
            discount_cents: 6_000,
            mva_rate: Decimal::new(25, 0),
        })
        .expect("valid basis");

        assert_eq!(snapshot.discount_cents, 5_000);
        assert_eq!(snapshot.subtotal_after_discount_cents, 0);
        assert_eq!(snapshot.mva_cents, 0);
        assert_eq!(snapshot.total_cents, 0);
    }

    #[test]
    fn rejects_negative_inputs_with_field_errors() {
        let error = calculate_order_total(&PricingBasis {
            subtotal_cents: -1,
            discount_cents: -1,
            mva_rate: Decimal::new(101, 0),
        })
        .expect_err("invalid basis");

        let rendered = error.to_string();
        assert!(rendered.contains("subtotal_cents"));
        assert!(rendered.contains("discount_cents"));
        assert!(rendered.contains("mva_rate"));
    }

    #[test]
    fn snapshot_serializes_with_stable_export_names() {
        let snapshot = calculate_order_total(&PricingBasis {
            subtotal_cents: 100_000,
            discount_cents: 10_000,
            mva_rate: Decimal::new(25, 0),
        })
        .expect("valid basis");

        let value = serde_json::to_value(&snapshot).expect("serialize snapshot");
        assert_eq!(value["subtotalCents"], json!(100_000));
        assert_eq!(value["discountCents"], json!(10_000));
        assert_eq!(value["subtotalAfterDiscountCents"], json!(90_000));
        assert_eq!(value["mvaCents"], json!(22_500));
        assert_eq!(value["totalCents"], json!(112_500));
        assert!(value.get("mvaRate").is_some());
    }
}
