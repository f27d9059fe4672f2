use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::organizer::{OrganizerId, PersonId};
use crate::errors::DomainError;
use crate::pricing::{PricedCart, PricingSnapshot, RuleApplication};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    PendingPayment,
    Paid,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    CoursePeriod,
    Event,
    Membership,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoursePeriod => "course_period",
            Self::Event => "event",
            Self::Membership => "membership",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "course_period" => Some(Self::CoursePeriod),
            "event" => Some(Self::Event),
            "membership" => Some(Self::Membership),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub organizer_id: OrganizerId,
    pub purchaser_id: PersonId,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Captured once at draft time and never recomputed.
    pub pricing: PricingSnapshot,
    pub applied_rules: Vec<RuleApplication>,
    pub order_number: Option<u64>,
    pub provider_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn draft(
        organizer_id: OrganizerId,
        purchaser_id: PersonId,
        order_type: OrderType,
        priced: PricedCart,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::generate(),
            organizer_id,
            purchaser_id,
            order_type,
            status: OrderStatus::Draft,
            pricing: priced.snapshot,
            applied_rules: priced.applied_rules,
            order_number: None,
            provider_ref: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }

    pub fn total_cents(&self) -> i64 {
        self.pricing.total_cents
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self.status, next),
            (OrderStatus::Draft, OrderStatus::PendingPayment)
                | (OrderStatus::Draft, OrderStatus::Paid)
                | (OrderStatus::PendingPayment, OrderStatus::Paid)
                | (OrderStatus::Draft, OrderStatus::Cancelled)
                | (OrderStatus::PendingPayment, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }

    pub fn transition_to(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidOrderTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Stamps the order number and provider reference. Only legal once; the
    /// number is never reassigned.
    pub fn mark_paid(
        &mut self,
        order_number: u64,
        provider_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.order_number.is_some() {
            return Err(DomainError::InvariantViolation(format!(
                "order {} already carries an order number",
                self.id.0
            )));
        }
        self.transition_to(OrderStatus::Paid, now)?;
        self.order_number = Some(order_number);
        self.provider_ref = Some(provider_ref.into());
        self.paid_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::organizer::{OrganizerId, PersonId};
    use crate::errors::DomainError;
    use crate::pricing::{calculate_order_total, PricedCart, PricingBasis};

    use super::{Order, OrderStatus, OrderType};

    fn order() -> Order {
        let snapshot = calculate_order_total(&PricingBasis {
            subtotal_cents: 100_000,
            discount_cents: 0,
            mva_rate: Decimal::ZERO,
        })
        .expect("valid basis");
        Order::draft(
            OrganizerId("org-1".to_string()),
            PersonId("person-1".to_string()),
            OrderType::CoursePeriod,
            PricedCart { snapshot, applied_rules: Vec::new() },
            Utc::now(),
        )
    }

    #[test]
    fn follows_checkout_lifecycle() {
        let mut order = order();
        order.transition_to(OrderStatus::PendingPayment, Utc::now()).expect("draft->pending");
        order.mark_paid(1, "pi_123", Utc::now()).expect("pending->paid");

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.order_number, Some(1));
        assert_eq!(order.provider_ref.as_deref(), Some("pi_123"));
        assert!(order.paid_at.is_some());
    }

    #[test]
    fn paid_is_reached_only_once() {
        let mut order = order();
        order.mark_paid(7, "pi_1", Utc::now()).expect("draft->paid");

        let error = order.mark_paid(8, "pi_2", Utc::now()).expect_err("second payment");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
        assert_eq!(order.order_number, Some(7));
    }

    #[test]
    fn refund_requires_a_paid_order() {
        let mut order = order();
        let error = order
            .transition_to(OrderStatus::Refunded, Utc::now())
            .expect_err("draft cannot be refunded");
        assert!(matches!(error, DomainError::InvalidOrderTransition { .. }));

        order.transition_to(OrderStatus::Cancelled, Utc::now()).expect("abandoned checkout");
        assert!(!order.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in [
            OrderStatus::Draft,
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }
}
