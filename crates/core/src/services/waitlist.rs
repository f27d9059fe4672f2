use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::Caller;
use crate::audit::{AuditCategory, AuditOutcome};
use crate::domain::cart::{Cart, CartItem, CartItemRef};
use crate::domain::order::{Order, OrderType};
use crate::domain::registration::{Registration, RegistrationId, RegistrationStatus};
use crate::domain::waitlist::WaitlistEntry;
use crate::errors::ApplicationError;
use crate::notify::{dispatch_best_effort, TransactionalMessage, WAITLIST_DECLINED, WAITLIST_OFFER};
use crate::pricing::PricingContext;
use crate::services::fulfillment::apply_fulfillment;
use crate::services::{ServiceDeps, FREE_ORDER_PROVIDER_REF};
use crate::store::{CommerceStore, CommerceTx};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySweep {
    pub expired: Vec<RegistrationId>,
}

impl ExpirySweep {
    pub fn count(&self) -> usize {
        self.expired.len()
    }
}

pub struct WaitlistService<S> {
    deps: ServiceDeps<S>,
}

impl<S: CommerceStore> WaitlistService<S> {
    pub fn new(deps: ServiceDeps<S>) -> Self {
        Self { deps }
    }

    /// Offers a freed seat to a waitlisted registration, or renews an expired
    /// offer. The offer notification is best effort.
    pub async fn promote(
        &self,
        caller: &Caller,
        registration_id: &RegistrationId,
        hours_valid: Option<u32>,
    ) -> Result<WaitlistEntry, ApplicationError> {
        let now = self.deps.clock.now();
        let hours_valid = hours_valid.unwrap_or(self.deps.settings.default_offer_hours);

        let mut tx = self.deps.store.begin().await?;
        let registration = tx
            .registration(registration_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("registration", &registration_id.0))?;
        self.deps.gate.assert_organizer_access(caller, &registration.organizer_id)?;

        let mut entry = load_entry(&mut tx, registration_id).await?;
        entry.promote(now, hours_valid)?;
        tx.save_waitlist_entry(&entry).await?;
        let recipient = tx.person(&registration.person_id).await?;
        tx.commit().await?;

        info!(
            event_name = "waitlist.offer_promoted",
            correlation_id = %caller.correlation_id,
            registration_id = %registration_id.0,
            hours_valid,
            offer_count = entry.offer_count,
            "waitlist offer issued"
        );
        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "waitlist.offer_promoted",
                    AuditCategory::Waitlist,
                    AuditOutcome::Success,
                )
                .for_registration(registration_id)
                .with_metadata("hours_valid", hours_valid.to_string()),
        );

        if let Some(person) = recipient {
            let mut message = TransactionalMessage::new(WAITLIST_OFFER, person.email)
                .with_variable("registration_id", registration_id.0.clone())
                .with_variable("name", person.name);
            if let Some(offered_until) = entry.offered_until {
                message = message.with_variable("offered_until", offered_until.to_rfc3339());
            }
            self.notify(caller, registration_id, &message).await;
        }

        Ok(entry)
    }

    /// Moves every lapsed offer to EXPIRED. Safe to repeat; a second run
    /// finds nothing left to expire.
    pub async fn expire_offers(&self, caller: &Caller) -> Result<ExpirySweep, ApplicationError> {
        self.deps.gate.assert_admin(caller)?;
        let now = self.deps.clock.now();

        let mut tx = self.deps.store.begin().await?;
        let mut sweep = ExpirySweep::default();
        for mut entry in tx.lapsed_offers(now).await? {
            if entry.expire(now) {
                tx.save_waitlist_entry(&entry).await?;
                sweep.expired.push(entry.registration_id);
            }
        }
        tx.commit().await?;

        info!(
            event_name = "waitlist.offers_expired",
            correlation_id = %caller.correlation_id,
            expired = sweep.count(),
            "waitlist expiry sweep finished"
        );
        let outcome =
            if sweep.expired.is_empty() { AuditOutcome::NoOp } else { AuditOutcome::Success };
        self.deps.emit(
            self.deps
                .audit_event(caller, "waitlist.offers_expired", AuditCategory::Waitlist, outcome)
                .with_metadata("expired", sweep.count().to_string()),
        );
        Ok(sweep)
    }

    /// Claims an offered seat: prices the track with the period's current
    /// rules and creates a DRAFT order for it. The deadline is re-checked
    /// here rather than trusting the entry status.
    pub async fn accept(
        &self,
        caller: &Caller,
        registration_id: &RegistrationId,
    ) -> Result<Order, ApplicationError> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut registration = load_owned(&mut tx, caller, registration_id).await?;
        let mut entry = load_entry(&mut tx, registration_id).await?;

        if let Err(error) = entry.accept(now) {
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "waitlist.accept_rejected",
                        AuditCategory::Waitlist,
                        AuditOutcome::Rejected,
                    )
                    .for_registration(registration_id)
                    .with_metadata("reason", error.to_string()),
            );
            return Err(error.into());
        }

        let organizer = tx
            .organizer(&registration.organizer_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("organizer", &registration.organizer_id.0))?;
        let track = tx
            .track(&registration.track_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("track", &registration.track_id.0))?;

        let cart = Cart {
            organizer_id: registration.organizer_id.clone(),
            purchaser_id: registration.person_id.clone(),
            items: vec![CartItem {
                item: CartItemRef::Track {
                    period_id: registration.period_id.clone(),
                    track_id: registration.track_id.clone(),
                },
                role: Some(registration.role.pricing_role()),
                with_partner: registration.with_partner,
                price_basis: registration.price_basis,
                unit_price_cents: track.pricing.unit_price(registration.price_basis),
                quantity: 1,
                organizer_id: registration.organizer_id.clone(),
            }],
        };
        let rules = tx.discount_rules_for_period(&registration.period_id).await?;
        let is_member = tx
            .has_active_membership(&registration.organizer_id, &registration.person_id, now)
            .await?;
        let context = PricingContext { is_member, now, mva_rate: organizer.effective_mva_rate() };
        let priced = self.deps.pricing.price(&cart, &rules, &context)?;

        let mut order = Order::draft(
            registration.organizer_id.clone(),
            registration.person_id.clone(),
            OrderType::CoursePeriod,
            priced,
            now,
        );
        tx.save_order(&order).await?;

        registration.order_id = Some(order.id.clone());
        registration.set_status(RegistrationStatus::Draft, now);
        tx.save_registration(&registration).await?;
        tx.save_waitlist_entry(&entry).await?;

        if order.total_cents() == 0 {
            apply_fulfillment(
                &mut tx,
                &self.deps.settings,
                &mut order,
                FREE_ORDER_PROVIDER_REF,
                now,
            )
            .await?;
        }
        tx.commit().await?;

        info!(
            event_name = "waitlist.offer_accepted",
            correlation_id = %caller.correlation_id,
            registration_id = %registration_id.0,
            order_id = %order.id.0,
            total_cents = order.total_cents(),
            "waitlist offer accepted"
        );
        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "waitlist.offer_accepted",
                    AuditCategory::Waitlist,
                    AuditOutcome::Success,
                )
                .for_registration(registration_id)
                .for_order(&order.id)
                .with_metadata("total_cents", order.total_cents().to_string()),
        );
        Ok(order)
    }

    /// Gives up the waitlist place: the entry is REMOVED and the
    /// registration CANCELLED together.
    pub async fn decline(
        &self,
        caller: &Caller,
        registration_id: &RegistrationId,
    ) -> Result<WaitlistEntry, ApplicationError> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut registration = load_owned(&mut tx, caller, registration_id).await?;
        let mut entry = load_entry(&mut tx, registration_id).await?;

        entry.remove(now)?;
        registration.set_status(RegistrationStatus::Cancelled, now);
        tx.save_waitlist_entry(&entry).await?;
        tx.save_registration(&registration).await?;
        tx.commit().await?;

        info!(
            event_name = "waitlist.offer_declined",
            correlation_id = %caller.correlation_id,
            registration_id = %registration_id.0,
            "waitlist place declined"
        );
        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "waitlist.offer_declined",
                    AuditCategory::Waitlist,
                    AuditOutcome::Success,
                )
                .for_registration(registration_id),
        );

        let message = TransactionalMessage::new(WAITLIST_DECLINED, caller.email.clone())
            .with_variable("registration_id", registration_id.0.clone());
        self.notify(caller, registration_id, &message).await;

        Ok(entry)
    }

    async fn notify(
        &self,
        caller: &Caller,
        registration_id: &RegistrationId,
        message: &TransactionalMessage,
    ) {
        let sent =
            dispatch_best_effort(self.deps.notifier.as_ref(), message, &caller.correlation_id)
                .await;
        if !sent {
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "notification.send_failed",
                        AuditCategory::Notification,
                        AuditOutcome::Failed,
                    )
                    .for_registration(registration_id)
                    .with_metadata("template", message.template_slug.clone()),
            );
        }
    }
}

/// Loads a registration the caller owns. Missing and foreign registrations
/// produce the same error so existence is not revealed.
async fn load_owned<T: CommerceTx>(
    tx: &mut T,
    caller: &Caller,
    registration_id: &RegistrationId,
) -> Result<Registration, ApplicationError> {
    match tx.registration(registration_id).await? {
        Some(registration) if caller.owns(&registration.person_id) => Ok(registration),
        _ => Err(ApplicationError::Unauthorized(format!(
            "caller `{}` does not own registration `{}`",
            caller.person_id.0, registration_id.0
        ))),
    }
}

async fn load_entry<T: CommerceTx>(
    tx: &mut T,
    registration_id: &RegistrationId,
) -> Result<WaitlistEntry, ApplicationError> {
    tx.waitlist_entry(registration_id).await?.ok_or_else(|| {
        ApplicationError::Conflict(format!(
            "registration `{}` has no waitlist entry",
            registration_id.0
        ))
    })
}
