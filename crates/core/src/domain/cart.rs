use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::catalog::{
    CoursePeriodId, DanceRole, EventId, MembershipTierId, PriceBasis, TrackId,
};
use crate::domain::order::OrderType;
use crate::domain::organizer::{OrganizerId, PersonId};
use crate::errors::ValidationErrors;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartItemRef {
    Track { period_id: CoursePeriodId, track_id: TrackId },
    Event { event_id: EventId },
    Membership { tier_id: MembershipTierId },
}

impl CartItemRef {
    pub fn order_type(&self) -> OrderType {
        match self {
            Self::Track { .. } => OrderType::CoursePeriod,
            Self::Event { .. } => OrderType::Event,
            Self::Membership { .. } => OrderType::Membership,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub item: CartItemRef,
    pub role: Option<DanceRole>,
    pub with_partner: bool,
    pub price_basis: PriceBasis,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub organizer_id: OrganizerId,
}

impl CartItem {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

/// Items selected for checkout. Never persisted as-is; checkout turns it into
/// an order and its child rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub organizer_id: OrganizerId,
    pub purchaser_id: PersonId,
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn subtotal_cents(&self) -> i64 {
        self.items.iter().map(CartItem::line_total_cents).sum()
    }

    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn order_type(&self) -> Option<OrderType> {
        self.items.first().map(|item| item.item.order_type())
    }

    pub fn period_id(&self) -> Option<&CoursePeriodId> {
        self.items.iter().find_map(|item| match &item.item {
            CartItemRef::Track { period_id, .. } => Some(period_id),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.organizer_id.0.trim().is_empty() {
            errors.push("organizer_id", "must not be blank");
        }
        if self.purchaser_id.0.trim().is_empty() {
            errors.push("purchaser_id", "must not be blank");
        }
        if self.items.is_empty() {
            errors.push("items", "cart must contain at least one item");
            return errors.into_result();
        }

        let order_type = self.order_type();
        let period_id = self.period_id();
        let mut seen_tracks = BTreeSet::new();

        for (index, item) in self.items.iter().enumerate() {
            let field = |name: &str| format!("items[{index}].{name}");

            if item.organizer_id != self.organizer_id {
                errors.push(field("organizer_id"), "all items must belong to the same organizer");
            }
            if item.unit_price_cents < 0 {
                errors.push(field("unit_price_cents"), "must not be negative");
            }
            if item.quantity == 0 {
                errors.push(field("quantity"), "must be at least 1");
            }
            if Some(item.item.order_type()) != order_type {
                errors.push(field("item"), "cannot mix courses, events, and memberships");
            }
            if item.price_basis == PriceBasis::Pair && !item.with_partner {
                errors.push(field("price_basis"), "pair pricing requires a partner");
            }

            match &item.item {
                CartItemRef::Track { period_id: item_period, track_id } => {
                    if !seen_tracks.insert(track_id) {
                        errors.push(field("item"), "track is already in the cart");
                    }
                    match item.role {
                        None => errors.push(field("role"), "is required for course tracks"),
                        Some(DanceRole::Any) => {
                            errors.push(field("role"), "must be LEADER or FOLLOWER")
                        }
                        Some(_) => {}
                    }
                    if item.quantity > 1 {
                        errors.push(field("quantity"), "course tracks are sold one seat at a time");
                    }
                    if Some(item_period) != period_id {
                        errors.push(field("item"), "all tracks must belong to one course period");
                    }
                }
                CartItemRef::Membership { .. } if item.quantity > 1 => {
                    errors.push(field("quantity"), "memberships are sold one at a time");
                }
                CartItemRef::Membership { .. } | CartItemRef::Event { .. } => {}
            }
        }

        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::catalog::{CoursePeriodId, DanceRole, EventId, PriceBasis, TrackId};
    use crate::domain::order::OrderType;
    use crate::domain::organizer::{OrganizerId, PersonId};

    use super::{Cart, CartItem, CartItemRef};

    fn track_item(track: &str, period: &str) -> CartItem {
        CartItem {
            item: CartItemRef::Track {
                period_id: CoursePeriodId(period.to_string()),
                track_id: TrackId(track.to_string()),
            },
            role: Some(DanceRole::Leader),
            with_partner: false,
            price_basis: PriceBasis::Single,
            unit_price_cents: 150_000,
            quantity: 1,
            organizer_id: OrganizerId("org-1".to_string()),
        }
    }

    fn cart(items: Vec<CartItem>) -> Cart {
        Cart {
            organizer_id: OrganizerId("org-1".to_string()),
            purchaser_id: PersonId("person-1".to_string()),
            items,
        }
    }

    #[test]
    fn subtotal_sums_price_times_quantity() {
        let mut event = track_item("t-1", "p-1");
        event.item = CartItemRef::Event { event_id: EventId("e-1".to_string()) };
        event.role = None;
        event.unit_price_cents = 25_000;
        event.quantity = 3;

        let cart = cart(vec![event]);
        assert_eq!(cart.subtotal_cents(), 75_000);
        assert_eq!(cart.total_quantity(), 3);
        assert_eq!(cart.order_type(), Some(OrderType::Event));
        assert!(cart.validate().is_ok());
    }

    #[test]
    fn rejects_items_from_another_organizer() {
        let mut foreign = track_item("t-2", "p-1");
        foreign.organizer_id = OrganizerId("org-2".to_string());

        let errors = cart(vec![track_item("t-1", "p-1"), foreign])
            .validate()
            .expect_err("mixed organizers must fail");
        assert!(errors.has_field("items[1].organizer_id"));
    }

    #[test]
    fn reports_every_broken_field_at_once() {
        let mut broken = track_item("t-1", "p-1");
        broken.role = None;
        broken.unit_price_cents = -1;
        broken.price_basis = PriceBasis::Pair;

        let errors = cart(vec![broken]).validate().expect_err("broken item must fail");
        assert!(errors.has_field("items[0].role"));
        assert!(errors.has_field("items[0].unit_price_cents"));
        assert!(errors.has_field("items[0].price_basis"));
    }

    #[test]
    fn rejects_empty_cart_and_tracks_across_periods() {
        assert!(cart(Vec::new()).validate().expect_err("empty").has_field("items"));

        let errors = cart(vec![track_item("t-1", "p-1"), track_item("t-2", "p-2")])
            .validate()
            .expect_err("two periods must fail");
        assert!(errors.has_field("items[1].item"));
    }

    #[test]
    fn rejects_the_same_track_twice() {
        let errors = cart(vec![track_item("t-1", "p-1"), track_item("t-1", "p-1")])
            .validate()
            .expect_err("repeated track must fail");
        assert!(errors.has_field("items[1].item"));
        assert!(!errors.has_field("items[0].item"));
    }
}
