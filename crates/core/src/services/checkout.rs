use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::Caller;
use crate::audit::{AuditCategory, AuditOutcome};
use crate::domain::cart::{Cart, CartItemRef};
use crate::domain::catalog::{DanceRole, TrackId};
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::organizer::Organizer;
use crate::domain::registration::{
    EventRegistration, Membership, Registration, RegistrationId, RegistrationStatus,
};
use crate::domain::waitlist::WaitlistEntry;
use crate::errors::{ApplicationError, ValidationErrors};
use crate::pricing::PricingContext;
use crate::services::fulfillment::{apply_fulfillment, send_order_confirmation};
use crate::services::{authorize_order_access, ServiceDeps, FREE_ORDER_PROVIDER_REF};
use crate::store::{CommerceStore, CommerceTx};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistedItem {
    pub registration_id: RegistrationId,
    pub track_id: TrackId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOutcome {
    /// `None` when every item went to a waitlist.
    pub order: Option<Order>,
    pub waitlisted: Vec<WaitlistedItem>,
}

pub struct CheckoutService<S> {
    deps: ServiceDeps<S>,
}

impl<S: CommerceStore> CheckoutService<S> {
    pub fn new(deps: ServiceDeps<S>) -> Self {
        Self { deps }
    }

    /// Prices the cart and creates a DRAFT order with its child rows. Tracks
    /// that are full produce a waitlisted registration instead of an order
    /// line. Orders that price to zero are fulfilled on the spot.
    pub async fn place_order(
        &self,
        caller: &Caller,
        cart: Cart,
    ) -> Result<CheckoutOutcome, ApplicationError> {
        if !caller.owns(&cart.purchaser_id) {
            self.deps.gate.assert_organizer_access(caller, &cart.organizer_id)?;
        }
        cart.validate()?;

        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;

        let organizer = tx
            .organizer(&cart.organizer_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("organizer", &cart.organizer_id.0))?;
        let purchaser = tx
            .person(&cart.purchaser_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("person", &cart.purchaser_id.0))?;

        let mut cart = resolve_catalog_prices(&mut tx, &organizer, cart).await?;

        // Split off tracks without a free seat.
        let mut waitlisted = Vec::new();
        let mut claimed: BTreeMap<TrackId, u32> = BTreeMap::new();
        let mut kept = Vec::with_capacity(cart.items.len());
        for item in cart.items {
            let CartItemRef::Track { period_id, track_id } = &item.item else {
                kept.push(item);
                continue;
            };
            let track = tx
                .track(track_id)
                .await?
                .ok_or_else(|| ApplicationError::not_found("track", &track_id.0))?;
            let already = tx
                .registrations_for(period_id, &cart.purchaser_id)
                .await?
                .into_iter()
                .any(|registration| {
                    &registration.track_id == track_id && registration.status.occupies_seat()
                });
            if already {
                return Err(ApplicationError::Conflict(format!(
                    "person `{}` is already registered on track `{}`",
                    cart.purchaser_id.0, track_id.0
                )));
            }

            let occupied = tx.occupied_seats(track_id).await?;
            let claimed_here = claimed.entry(track_id.clone()).or_default();
            let full = track.capacity.map(|capacity| occupied + *claimed_here >= capacity);
            if full.unwrap_or(false) {
                let registration = Registration::new(
                    cart.organizer_id.clone(),
                    period_id.clone(),
                    track_id.clone(),
                    cart.purchaser_id.clone(),
                    item.role.unwrap_or(DanceRole::Any),
                    item.with_partner,
                    item.price_basis,
                    RegistrationStatus::Waitlisted,
                    now,
                );
                let entry = WaitlistEntry::join(registration.id.clone(), track_id.clone(), now);
                tx.save_registration(&registration).await?;
                tx.save_waitlist_entry(&entry).await?;
                waitlisted.push(WaitlistedItem {
                    registration_id: registration.id,
                    track_id: track_id.clone(),
                });
            } else {
                *claimed_here += 1;
                kept.push(item);
            }
        }
        cart.items = kept;

        if cart.items.is_empty() {
            tx.commit().await?;
            info!(
                event_name = "checkout.waitlisted",
                correlation_id = %caller.correlation_id,
                waitlisted = waitlisted.len(),
                "all requested tracks are full"
            );
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "checkout.waitlisted",
                        AuditCategory::Order,
                        AuditOutcome::Success,
                    )
                    .with_metadata("waitlisted", waitlisted.len().to_string()),
            );
            return Ok(CheckoutOutcome { order: None, waitlisted });
        }

        let order_type = cart.order_type().ok_or_else(|| {
            ValidationErrors::single("items", "cart must contain at least one item")
        })?;
        let rules = match cart.period_id() {
            Some(period_id) => tx.discount_rules_for_period(period_id).await?,
            None => Vec::new(),
        };
        let is_member =
            tx.has_active_membership(&cart.organizer_id, &cart.purchaser_id, now).await?;
        let context =
            PricingContext { is_member, now, mva_rate: organizer.effective_mva_rate() };
        let priced = self.deps.pricing.price(&cart, &rules, &context)?;

        let mut order = Order::draft(
            cart.organizer_id.clone(),
            cart.purchaser_id.clone(),
            order_type,
            priced,
            now,
        );
        tx.save_order(&order).await?;

        for item in &cart.items {
            match &item.item {
                CartItemRef::Track { period_id, track_id } => {
                    let mut registration = Registration::new(
                        cart.organizer_id.clone(),
                        period_id.clone(),
                        track_id.clone(),
                        cart.purchaser_id.clone(),
                        item.role.unwrap_or(DanceRole::Any),
                        item.with_partner,
                        item.price_basis,
                        RegistrationStatus::Draft,
                        now,
                    );
                    registration.order_id = Some(order.id.clone());
                    tx.save_registration(&registration).await?;
                }
                CartItemRef::Event { event_id } => {
                    let registration = EventRegistration::new(
                        order.id.clone(),
                        event_id.clone(),
                        cart.purchaser_id.clone(),
                        item.quantity,
                        now,
                    );
                    tx.save_event_registration(&registration).await?;
                }
                CartItemRef::Membership { tier_id } => {
                    let membership = Membership::pending(
                        order.id.clone(),
                        cart.organizer_id.clone(),
                        tier_id.clone(),
                        cart.purchaser_id.clone(),
                        now,
                    );
                    tx.save_membership(&membership).await?;
                }
            }
        }

        let receipt = if order.total_cents() == 0 {
            Some(
                apply_fulfillment(
                    &mut tx,
                    &self.deps.settings,
                    &mut order,
                    FREE_ORDER_PROVIDER_REF,
                    now,
                )
                .await?,
            )
        } else {
            None
        };
        tx.commit().await?;

        info!(
            event_name = "checkout.order_created",
            correlation_id = %caller.correlation_id,
            order_id = %order.id.0,
            order_type = order.order_type.as_str(),
            total_cents = order.total_cents(),
            waitlisted = waitlisted.len(),
            "order drafted"
        );
        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "checkout.order_created",
                    AuditCategory::Pricing,
                    AuditOutcome::Success,
                )
                .for_order(&order.id)
                .with_metadata("subtotal_cents", order.pricing.subtotal_cents.to_string())
                .with_metadata("discount_cents", order.pricing.discount_cents.to_string())
                .with_metadata("total_cents", order.total_cents().to_string())
                .with_metadata("applied_rules", order.applied_rules.len().to_string()),
        );
        if let Some(receipt) = &receipt {
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "fulfillment.completed",
                        AuditCategory::Fulfillment,
                        AuditOutcome::Success,
                    )
                    .for_order(&order.id)
                    .with_metadata("order_number", receipt.order_number.to_string())
                    .with_metadata("provider_ref", FREE_ORDER_PROVIDER_REF),
            );
            send_order_confirmation(&self.deps, caller, &order, receipt, &purchaser.email).await;
        }

        Ok(CheckoutOutcome { order: Some(order), waitlisted })
    }

    /// Hands the order to the payment provider: DRAFT → PENDING_PAYMENT.
    /// Repeating the call while payment is pending returns the order as is.
    pub async fn begin_payment(
        &self,
        caller: &Caller,
        order_id: &OrderId,
    ) -> Result<Order, ApplicationError> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let order = tx.order(order_id).await?;
        authorize_order_access(self.deps.gate.as_ref(), caller, order.as_ref(), &order_id.0)?;
        let Some(mut order) = order else {
            return Err(ApplicationError::not_found("order", &order_id.0));
        };

        if order.status == OrderStatus::PendingPayment {
            return Ok(order);
        }
        order.transition_to(OrderStatus::PendingPayment, now)?;
        tx.save_order(&order).await?;
        tx.commit().await?;

        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "order.payment_started",
                    AuditCategory::Order,
                    AuditOutcome::Success,
                )
                .for_order(&order.id),
        );
        Ok(order)
    }
}

/// Replaces client-supplied unit prices with catalog prices and checks that
/// every referenced item exists and belongs to the cart's organizer.
async fn resolve_catalog_prices<T: CommerceTx>(
    tx: &mut T,
    organizer: &Organizer,
    mut cart: Cart,
) -> Result<Cart, ApplicationError> {
    let mut errors = ValidationErrors::new();

    for (index, item) in cart.items.iter_mut().enumerate() {
        let field = format!("items[{index}].item");
        match &item.item {
            CartItemRef::Track { period_id, track_id } => {
                let period = tx
                    .course_period(period_id)
                    .await?
                    .ok_or_else(|| ApplicationError::not_found("course period", &period_id.0))?;
                let track = tx
                    .track(track_id)
                    .await?
                    .ok_or_else(|| ApplicationError::not_found("track", &track_id.0))?;
                if period.organizer_id != organizer.id || track.period_id != period.id {
                    errors.push(field, "track does not belong to this organizer's period");
                    continue;
                }
                item.unit_price_cents = track.pricing.unit_price(item.price_basis);
            }
            CartItemRef::Event { event_id } => {
                let event = tx
                    .event(event_id)
                    .await?
                    .ok_or_else(|| ApplicationError::not_found("event", &event_id.0))?;
                if event.organizer_id != organizer.id {
                    errors.push(field, "event belongs to another organizer");
                    continue;
                }
                item.unit_price_cents = event.price_cents;
            }
            CartItemRef::Membership { tier_id } => {
                let tier = tx
                    .membership_tier(tier_id)
                    .await?
                    .ok_or_else(|| ApplicationError::not_found("membership tier", &tier_id.0))?;
                if tier.organizer_id != organizer.id {
                    errors.push(field, "membership tier belongs to another organizer");
                    continue;
                }
                item.unit_price_cents = tier.price_cents;
            }
        }
    }

    errors.into_result()?;
    Ok(cart)
}
