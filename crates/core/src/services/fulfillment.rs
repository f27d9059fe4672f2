use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::Caller;
use crate::audit::{AuditCategory, AuditOutcome};
use crate::domain::billing::{format_document_number, Invoice, InvoiceStatus, Payment, PaymentId};
use crate::domain::order::{Order, OrderId, OrderStatus, OrderType};
use crate::domain::organizer::SequenceKind;
use crate::domain::registration::{MembershipStatus, RegistrationStatus};
use crate::domain::ticket::{EventTicket, Ticket, TicketStatus};
use crate::errors::{ApplicationError, ValidationErrors};
use crate::notify::{dispatch_best_effort, TransactionalMessage, ORDER_CONFIRMATION};
use crate::services::{CommerceSettings, ServiceDeps};
use crate::store::{CommerceStore, CommerceTx};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentReceipt {
    pub order_id: OrderId,
    pub order_number: u64,
    pub invoice_number: String,
    pub payment_id: PaymentId,
    pub tickets_issued: usize,
    pub event_tickets_issued: usize,
    pub memberships_activated: usize,
    pub memberships_awaiting_validation: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    Fulfilled(FulfillmentReceipt),
    /// The order was already paid; nothing was written.
    AlreadyFulfilled { order_id: OrderId, order_number: Option<u64> },
}

impl FulfillmentOutcome {
    pub fn order_number(&self) -> Option<u64> {
        match self {
            Self::Fulfilled(receipt) => Some(receipt.order_number),
            Self::AlreadyFulfilled { order_number, .. } => *order_number,
        }
    }
}

pub struct FulfillmentService<S> {
    deps: ServiceDeps<S>,
}

impl<S: CommerceStore> FulfillmentService<S> {
    pub fn new(deps: ServiceDeps<S>) -> Self {
        Self { deps }
    }

    /// Turns a confirmed payment into an order number, a payment record, an
    /// invoice and the purchased entitlements, all in one transaction.
    /// Redelivered confirmations for a paid order are a successful no-op.
    pub async fn fulfill_order(
        &self,
        caller: &Caller,
        order_id: &OrderId,
        provider_ref: &str,
    ) -> Result<FulfillmentOutcome, ApplicationError> {
        self.deps.gate.assert_admin(caller)?;
        if provider_ref.trim().is_empty() {
            return Err(ValidationErrors::single("provider_ref", "must not be blank").into());
        }

        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut order = tx
            .order(order_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("order", &order_id.0))?;

        if order.status == OrderStatus::Paid {
            info!(
                event_name = "fulfillment.already_fulfilled",
                correlation_id = %caller.correlation_id,
                order_id = %order.id.0,
                "payment confirmation for paid order ignored"
            );
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "fulfillment.already_fulfilled",
                        AuditCategory::Fulfillment,
                        AuditOutcome::NoOp,
                    )
                    .for_order(&order.id)
                    .with_metadata("provider_ref", provider_ref),
            );
            return Ok(FulfillmentOutcome::AlreadyFulfilled {
                order_id: order.id,
                order_number: order.order_number,
            });
        }

        if !matches!(order.status, OrderStatus::Draft | OrderStatus::PendingPayment) {
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "fulfillment.rejected",
                        AuditCategory::Fulfillment,
                        AuditOutcome::Rejected,
                    )
                    .for_order(&order.id)
                    .with_metadata("status", order.status.as_str()),
            );
            return Err(ApplicationError::Conflict(format!(
                "order `{}` is {} and cannot be fulfilled",
                order.id.0,
                order.status.as_str()
            )));
        }

        let receipt =
            apply_fulfillment(&mut tx, &self.deps.settings, &mut order, provider_ref, now).await?;
        let recipient = tx.person(&order.purchaser_id).await?.map(|person| person.email);
        tx.commit().await?;

        info!(
            event_name = "fulfillment.completed",
            correlation_id = %caller.correlation_id,
            order_id = %order.id.0,
            order_number = receipt.order_number,
            invoice_number = %receipt.invoice_number,
            "order fulfilled"
        );
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
                .with_metadata("invoice_number", receipt.invoice_number.clone())
                .with_metadata("total_cents", order.total_cents().to_string()),
        );

        if let Some(email) = recipient {
            send_order_confirmation(&self.deps, caller, &order, &receipt, &email).await;
        }

        Ok(FulfillmentOutcome::Fulfilled(receipt))
    }
}

pub(crate) async fn send_order_confirmation<S: CommerceStore>(
    deps: &ServiceDeps<S>,
    caller: &Caller,
    order: &Order,
    receipt: &FulfillmentReceipt,
    email: &str,
) {
    let message = TransactionalMessage::new(ORDER_CONFIRMATION, email)
        .with_variable("order_id", order.id.0.clone())
        .with_variable("order_number", receipt.order_number.to_string())
        .with_variable("invoice_number", receipt.invoice_number.clone())
        .with_variable("total_cents", order.total_cents().to_string());
    if !dispatch_best_effort(deps.notifier.as_ref(), &message, &caller.correlation_id).await {
        deps.emit(
            deps.audit_event(
                caller,
                "notification.send_failed",
                AuditCategory::Notification,
                AuditOutcome::Failed,
            )
            .for_order(&order.id)
            .with_metadata("template", ORDER_CONFIRMATION),
        );
    }
}

/// The body of fulfillment, run inside the caller's transaction. The caller
/// has already checked that the order is DRAFT or PENDING_PAYMENT.
pub(crate) async fn apply_fulfillment<T: CommerceTx>(
    tx: &mut T,
    settings: &CommerceSettings,
    order: &mut Order,
    provider_ref: &str,
    now: DateTime<Utc>,
) -> Result<FulfillmentReceipt, ApplicationError> {
    let organizer = tx
        .organizer(&order.organizer_id)
        .await?
        .ok_or_else(|| ApplicationError::not_found("organizer", &order.organizer_id.0))?;

    let order_number = tx.next_sequence(&order.organizer_id, SequenceKind::OrderNumber).await?;
    order.mark_paid(order_number, provider_ref, now)?;
    tx.save_order(order).await?;

    let payment = Payment::record(order, provider_ref, now);
    tx.insert_payment(&payment).await?;

    let invoice_sequence =
        tx.next_sequence(&order.organizer_id, SequenceKind::InvoiceNumber).await?;
    let prefix = organizer.invoice_prefix.as_deref().unwrap_or(&settings.invoice_prefix);
    let invoice_number = format_document_number(prefix, invoice_sequence, settings.number_width);
    let mut invoice = Invoice::issue(order, invoice_number.clone(), invoice_sequence, now);
    invoice.transition_to(InvoiceStatus::Paid, now)?;
    tx.save_invoice(&invoice).await?;

    let mut receipt = FulfillmentReceipt {
        order_id: order.id.clone(),
        order_number,
        invoice_number,
        payment_id: payment.id,
        tickets_issued: 0,
        event_tickets_issued: 0,
        memberships_activated: 0,
        memberships_awaiting_validation: 0,
    };

    match order.order_type {
        OrderType::CoursePeriod => {
            receipt.tickets_issued = activate_course_registrations(tx, order, now).await?;
        }
        OrderType::Membership => {
            let (activated, pending) = settle_memberships(tx, order, now).await?;
            receipt.memberships_activated = activated;
            receipt.memberships_awaiting_validation = pending;
        }
        OrderType::Event => {
            receipt.event_tickets_issued = issue_event_tickets(tx, order, now).await?;
        }
    }

    Ok(receipt)
}

async fn activate_course_registrations<T: CommerceTx>(
    tx: &mut T,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<usize, ApplicationError> {
    let registrations = tx.registrations_for_order(&order.id).await?;
    let mut holders = BTreeSet::new();
    for mut registration in registrations {
        if registration.status == RegistrationStatus::Cancelled {
            continue;
        }
        registration.set_status(RegistrationStatus::Active, now);
        tx.save_registration(&registration).await?;
        holders.insert((registration.period_id, registration.person_id));
    }

    // One combined ticket per (period, person), however many tracks were bought.
    let mut issued = 0;
    for (period_id, person_id) in holders {
        match tx.ticket_for(&period_id, &person_id).await? {
            Some(ticket) if ticket.status == TicketStatus::Active => {}
            Some(mut revoked) => {
                revoked.status = TicketStatus::Active;
                revoked.order_id = order.id.clone();
                tx.save_ticket(&revoked).await?;
            }
            None => {
                let ticket = Ticket::issue(
                    order.organizer_id.clone(),
                    period_id,
                    person_id,
                    order.id.clone(),
                    now,
                );
                tx.save_ticket(&ticket).await?;
                issued += 1;
            }
        }
    }
    Ok(issued)
}

/// Tier policy decides the final state: tiers that need manual validation
/// stay in the approval queue even though payment arrived.
async fn settle_memberships<T: CommerceTx>(
    tx: &mut T,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<(usize, usize), ApplicationError> {
    let mut activated = 0;
    let mut pending = 0;
    for mut membership in tx.memberships_for_order(&order.id).await? {
        if membership.status != MembershipStatus::PendingPayment {
            continue;
        }
        let tier = tx
            .membership_tier(&membership.tier_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("membership tier", &membership.tier_id.0))?;

        if tier.requires_manual_validation {
            membership.updated_at = now;
            pending += 1;
        } else {
            let number =
                tx.next_sequence(&order.organizer_id, SequenceKind::MembershipNumber).await?;
            membership.activate(&tier, number, now)?;
            activated += 1;
        }
        tx.save_membership(&membership).await?;
    }
    Ok((activated, pending))
}

async fn issue_event_tickets<T: CommerceTx>(
    tx: &mut T,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<usize, ApplicationError> {
    let existing = tx.event_tickets_for_order(&order.id).await?;
    let mut issued = 0;
    for mut registration in tx.event_registrations_for_order(&order.id).await? {
        if registration.status == RegistrationStatus::Cancelled {
            continue;
        }
        registration.set_status(RegistrationStatus::Active, now);
        tx.save_event_registration(&registration).await?;

        let taken = existing
            .iter()
            .filter(|ticket| ticket.event_registration_id == registration.id)
            .map(|ticket| ticket.seq)
            .collect::<BTreeSet<_>>();
        for seq in (1..=registration.quantity).filter(|seq| !taken.contains(seq)) {
            let ticket = EventTicket::issue(
                registration.id.clone(),
                order.id.clone(),
                registration.event_id.clone(),
                registration.person_id.clone(),
                seq,
                now,
            );
            tx.save_event_ticket(&ticket).await?;
            issued += 1;
        }
    }
    Ok(issued)
}
