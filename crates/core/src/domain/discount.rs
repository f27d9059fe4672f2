use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::catalog::CoursePeriodId;
use crate::errors::ValidationErrors;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscountRuleId(pub String);

/// Which subtotal a rule computes its discount from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleBasis {
    /// The gross cart subtotal, regardless of earlier rules.
    Original,
    /// Whatever is left after every earlier rule has been applied.
    Running,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "rule_type",
    content = "config",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum RuleKind {
    PercentageOff {
        percent: Decimal,
    },
    FixedAmountOff {
        amount_cents: i64,
    },
    MemberDiscount {
        percent: Decimal,
    },
    EarlyBird {
        #[serde(default)]
        percent: Option<Decimal>,
        #[serde(default)]
        amount_cents: Option<i64>,
        valid_until: DateTime<Utc>,
        #[serde(default)]
        valid_from: Option<DateTime<Utc>>,
    },
    BulkQuantity {
        min_quantity: u32,
        percent: Decimal,
    },
}

impl RuleKind {
    /// Fixed per rule type. Early-bird rules apply to the gross subtotal; every
    /// other type composes on the running subtotal.
    pub fn basis(&self) -> RuleBasis {
        match self {
            Self::EarlyBird { .. } => RuleBasis::Original,
            Self::PercentageOff { .. }
            | Self::FixedAmountOff { .. }
            | Self::MemberDiscount { .. }
            | Self::BulkQuantity { .. } => RuleBasis::Running,
        }
    }

    pub fn rule_type(&self) -> &'static str {
        match self {
            Self::PercentageOff { .. } => "percentage_off",
            Self::FixedAmountOff { .. } => "fixed_amount_off",
            Self::MemberDiscount { .. } => "member_discount",
            Self::EarlyBird { .. } => "early_bird",
            Self::BulkQuantity { .. } => "bulk_quantity",
        }
    }

    /// The stored JSON payload for this rule, without the type tag.
    pub fn config_json(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut tagged| tagged.get_mut("config").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Builds a typed rule from the persisted `(rule_type, config)` pair.
    pub fn from_legacy(rule_type: &str, config: &Value) -> Result<Self, ValidationErrors> {
        let normalized = rule_type.trim().to_ascii_lowercase().replace('-', "_");
        let known = [
            "percentage_off",
            "fixed_amount_off",
            "member_discount",
            "early_bird",
            "bulk_quantity",
        ];
        if !known.contains(&normalized.as_str()) {
            return Err(ValidationErrors::single(
                "rule_type",
                format!("unsupported rule type `{rule_type}`"),
            ));
        }

        let tagged = serde_json::json!({ "rule_type": normalized, "config": config });
        let kind: Self = serde_json::from_value(tagged)
            .map_err(|error| ValidationErrors::single("config", error.to_string()))?;
        kind.validate()?;
        Ok(kind)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match self {
            Self::PercentageOff { percent } | Self::MemberDiscount { percent } => {
                check_percent(&mut errors, "config.percent", *percent);
            }
            Self::FixedAmountOff { amount_cents } => {
                if *amount_cents <= 0 {
                    errors.push("config.amountCents", "must be greater than zero");
                }
            }
            Self::EarlyBird { percent, amount_cents, valid_until, valid_from } => {
                match (percent, amount_cents) {
                    (Some(percent), None) => check_percent(&mut errors, "config.percent", *percent),
                    (None, Some(amount)) if *amount <= 0 => {
                        errors.push("config.amountCents", "must be greater than zero");
                    }
                    (None, Some(_)) => {}
                    _ => errors.push("config", "set exactly one of percent or amountCents"),
                }
                if let Some(valid_from) = valid_from {
                    if valid_from >= valid_until {
                        errors.push("config.validFrom", "must be before validUntil");
                    }
                }
            }
            Self::BulkQuantity { min_quantity, percent } => {
                if *min_quantity < 2 {
                    errors.push("config.minQuantity", "must be at least 2");
                }
                check_percent(&mut errors, "config.percent", *percent);
            }
        }
        errors.into_result()
    }
}

fn check_percent(errors: &mut ValidationErrors, field: &str, percent: Decimal) {
    if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        errors.push(field, "must be greater than 0 and at most 100");
    }
}

/// Organizer-managed pricing rule scoped to one course period. Read-only at
/// pricing time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: DiscountRuleId,
    pub period_id: CoursePeriodId,
    pub code: String,
    pub name: String,
    /// Lower runs first.
    pub priority: i32,
    pub enabled: bool,
    pub kind: RuleKind,
    pub created_at: DateTime<Utc>,
}

impl DiscountRule {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.code.trim().is_empty() {
            errors.push("code", "must not be blank");
        }
        if self.name.trim().is_empty() {
            errors.push("name", "must not be blank");
        }
        if self.priority < 0 {
            errors.push("priority", "must not be negative");
        }
        if let Err(kind_errors) = self.kind.validate() {
            errors.errors.extend(kind_errors.errors);
        }
        errors.into_result()
    }
}
