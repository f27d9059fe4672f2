use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cart::Cart;
use crate::domain::discount::{DiscountRule, DiscountRuleId, RuleBasis, RuleKind};
use crate::pricing::totals::percent_of;

/// Everything a rule may look at besides the cart. `now` is always passed in;
/// the evaluator never reads the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvaluationContext {
    pub is_member: bool,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleApplication {
    pub rule_id: DiscountRuleId,
    pub code: String,
    pub name: String,
    pub rule_type: String,
    pub basis: RuleBasis,
    pub basis_cents: i64,
    pub discount_cents: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountEvaluation {
    pub discount_cents: i64,
    pub applied_rules: Vec<RuleApplication>,
}

/// Applies enabled rules in ascending priority. Equal priorities keep their
/// input order, which callers supply as creation order.
pub fn evaluate(
    cart: &Cart,
    rules: &[DiscountRule],
    context: &EvaluationContext,
) -> DiscountEvaluation {
    let original = cart.subtotal_cents().max(0);
    let quantity = cart.total_quantity();

    let mut ordered = rules.iter().filter(|rule| rule.enabled).collect::<Vec<_>>();
    ordered.sort_by_key(|rule| rule.priority);

    let mut running = original;
    let mut applied_rules = Vec::new();

    for rule in ordered {
        if running == 0 {
            break;
        }
        let basis = rule.kind.basis();
        let basis_cents = match basis {
            RuleBasis::Original => original,
            RuleBasis::Running => running,
        };
        let Some(raw) = rule_discount(&rule.kind, basis_cents, quantity, context) else {
            continue;
        };
        let discount_cents = raw.clamp(0, running);
        if discount_cents == 0 {
            continue;
        }

        running -= discount_cents;
        applied_rules.push(RuleApplication {
            rule_id: rule.id.clone(),
            code: rule.code.clone(),
            name: rule.name.clone(),
            rule_type: rule.kind.rule_type().to_string(),
            basis,
            basis_cents,
            discount_cents,
        });
    }

    DiscountEvaluation { discount_cents: original - running, applied_rules }
}

/// `None` means the rule does not apply to this cart at all.
fn rule_discount(
    kind: &RuleKind,
    basis_cents: i64,
    quantity: u32,
    context: &EvaluationContext,
) -> Option<i64> {
    match kind {
        RuleKind::PercentageOff { percent } => Some(percent_of(basis_cents, *percent)),
        RuleKind::FixedAmountOff { amount_cents } => Some(*amount_cents),
        RuleKind::MemberDiscount { percent } => {
            context.is_member.then(|| percent_of(basis_cents, *percent))
        }
        RuleKind::EarlyBird { percent, amount_cents, valid_until, valid_from } => {
            let opened = valid_from.map(|from| context.now >= from).unwrap_or(true);
            if !opened || context.now > *valid_until {
                return None;
            }
            match (percent, amount_cents) {
                (Some(percent), _) => Some(percent_of(basis_cents, *percent)),
                (None, Some(amount)) => Some(*amount),
                (None, None) => None,
            }
        }
        RuleKind::BulkQuantity { min_quantity, percent } => {
            (quantity >= *min_quantity).then(|| percent_of(basis_cents, *percent))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::cart::{Cart, CartItem, CartItemRef};
    use crate::domain::catalog::{CoursePeriodId, DanceRole, PriceBasis, TrackId};
    use crate::domain::discount::{DiscountRule, DiscountRuleId, RuleKind};
    use crate::domain::organizer::{OrganizerId, PersonId};

    use super::{evaluate, EvaluationContext};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap()
    }

    fn context(is_member: bool) -> EvaluationContext {
        EvaluationContext { is_member, now: now() }
    }

    fn cart_with(prices: &[i64]) -> Cart {
        Cart {
            organizer_id: OrganizerId("org-1".to_string()),
            purchaser_id: PersonId("person-1".to_string()),
            items: prices
                .iter()
                .enumerate()
                .map(|(index, price)| CartItem {
                    item: CartItemRef::Track {
                        period_id: CoursePeriodId("period-1".to_string()),
                        track_id: TrackId(format!("track-{index}")),
                    },
                    role: Some(DanceRole::Follower),
                    with_partner: false,
                    price_basis: PriceBasis::Single,
                    unit_price_cents: *price,
                    quantity: 1,
                    organizer_id: OrganizerId("org-1".to_string()),
                })
                .collect(),
        }
    }

    fn rule(id: &str, priority: i32, kind: RuleKind) -> DiscountRule {
        DiscountRule {
            id: DiscountRuleId(id.to_string()),
            period_id: CoursePeriodId("period-1".to_string()),
            code: id.to_uppercase(),
            name: format!("rule {id}"),
            priority,
            enabled: true,
            kind,
            created_at: now(),
        }
    }

    fn percent(value: i64) -> RuleKind {
        RuleKind::PercentageOff { percent: Decimal::new(value, 0) }
    }

    fn fixed(amount_cents: i64) -> RuleKind {
        RuleKind::FixedAmountOff { amount_cents }
    }

    #[test]
    fn stacked_fixed_rules_clamp_at_subtotal() {
        let evaluation = evaluate(
            &cart_with(&[5_000]),
            &[rule("a", 1, fixed(3_000)), rule("b", 2, fixed(3_000))],
            &context(false),
        );

        assert_eq!(evaluation.discount_cents, 5_000);
        assert_eq!(evaluation.applied_rules.len(), 2);
        assert_eq!(evaluation.applied_rules[1].discount_cents, 2_000);
    }

    #[test]
    fn swapping_priorities_of_non_commutative_rules_changes_the_result() {
        let cart = cart_with(&[100_000]);

        let percent_first =
            [rule("pct", 1, percent(10)), rule("fixed", 2, fixed(10_000))];
        let fixed_first =
            [rule("pct", 2, percent(10)), rule("fixed", 1, fixed(10_000))];

        let a = evaluate(&cart, &percent_first, &context(false));
        let b = evaluate(&cart, &fixed_first, &context(false));

        // 100 000 - 10 % = 90 000, then - 10 000 = 80 000.
        assert_eq!(a.discount_cents, 20_000);
        // 100 000 - 10 000 = 90 000, then - 10 % = 81 000.
        assert_eq!(b.discount_cents, 19_000);
        assert_eq!(a.applied_rules[0].code, "PCT");
        assert_eq!(b.applied_rules[0].code, "FIXED");

        for _ in 0..10 {
            assert_eq!(evaluate(&cart, &percent_first, &context(false)), a);
            assert_eq!(evaluate(&cart, &fixed_first, &context(false)), b);
        }
    }

    #[test]
    fn equal_priorities_keep_input_order() {
        let cart = cart_with(&[100_000]);
        let evaluation = evaluate(
            &cart,
            &[rule("first", 5, fixed(10_000)), rule("second", 5, percent(50))],
            &context(false),
        );

        assert_eq!(evaluation.applied_rules[0].code, "FIRST");
        assert_eq!(evaluation.discount_cents, 10_000 + 45_000);
    }

    #[test]
    fn member_discount_only_applies_to_members() {
        let cart = cart_with(&[100_000]);
        let rules =
            [rule("member", 1, RuleKind::MemberDiscount { percent: Decimal::new(20, 0) })];

        let guest = evaluate(&cart, &rules, &context(false));
        assert_eq!(guest.discount_cents, 0);
        assert!(guest.applied_rules.is_empty());

        let member = evaluate(&cart, &rules, &context(true));
        assert_eq!(member.discount_cents, 20_000);
    }

    #[test]
    fn early_bird_uses_gross_subtotal_within_its_window() {
        let cart = cart_with(&[100_000]);
        let early_bird = RuleKind::EarlyBird {
            percent: Some(Decimal::new(10, 0)),
            amount_cents: None,
            valid_until: now() + Duration::days(1),
            valid_from: None,
        };
        let rules = [rule("fixed", 1, fixed(50_000)), rule("early", 2, early_bird)];

        let inside = evaluate(&cart, &rules, &context(false));
        // 10 % of the gross 100 000, not of the remaining 50 000.
        assert_eq!(inside.applied_rules[1].basis_cents, 100_000);
        assert_eq!(inside.discount_cents, 60_000);

        let late = EvaluationContext { is_member: false, now: now() + Duration::days(2) };
        assert_eq!(evaluate(&cart, &rules, &late).discount_cents, 50_000);
    }

    #[test]
    fn bulk_rule_needs_minimum_quantity_and_disabled_rules_are_skipped() {
        let bulk = RuleKind::BulkQuantity { min_quantity: 2, percent: Decimal::new(15, 0) };
        let mut disabled = rule("off", 0, fixed(1_000));
        disabled.enabled = false;
        let rules = [disabled, rule("bulk", 1, bulk)];

        assert_eq!(evaluate(&cart_with(&[100_000]), &rules, &context(false)).discount_cents, 0);
        let two = evaluate(&cart_with(&[100_000, 100_000]), &rules, &context(false));
        assert_eq!(two.discount_cents, 30_000);
        assert_eq!(two.applied_rules.len(), 1);
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let carts = [vec![0], vec![1], vec![999], vec![150_000, 130_000], vec![7, 11, 13]];
        let rule_sets = [
            vec![rule("a", 1, percent(100)), rule("b", 2, fixed(1))],
            vec![rule("a", 1, fixed(1_000_000))],
            vec![rule("a", 1, percent(33)), rule("b", 1, percent(33)), rule("c", 1, percent(34))],
        ];

        for prices in &carts {
            let cart = cart_with(prices);
            for rules in &rule_sets {
                let evaluation = evaluate(&cart, rules, &context(true));
                assert!(evaluation.discount_cents >= 0);
                assert!(evaluation.discount_cents <= cart.subtotal_cents());
            }
        }
    }
}
