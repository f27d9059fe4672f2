use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::access::Caller;
use crate::audit::{AuditCategory, AuditOutcome};
use crate::domain::billing::{format_document_number, CreditNote, InvoiceStatus};
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::organizer::SequenceKind;
use crate::domain::registration::{MembershipStatus, RegistrationStatus};
use crate::domain::ticket::TicketStatus;
use crate::errors::{ApplicationError, ValidationErrors};
use crate::notify::{dispatch_best_effort, TransactionalMessage, ORDER_REFUNDED};
use crate::services::{authorize_order_access, CommerceSettings, ServiceDeps};
use crate::store::{CommerceStore, CommerceTx};

/// What a cancellation or refund undid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reversal {
    pub order: Order,
    pub credit_note_number: Option<String>,
    pub registrations_cancelled: usize,
    pub event_tickets_revoked: usize,
    pub memberships_cancelled: usize,
    pub tickets_revoked: usize,
}

pub struct OrderService<S> {
    deps: ServiceDeps<S>,
}

impl<S: CommerceStore> OrderService<S> {
    pub fn new(deps: ServiceDeps<S>) -> Self {
        Self { deps }
    }

    pub async fn get(
        &self,
        caller: &Caller,
        order_id: &OrderId,
    ) -> Result<Order, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let order = tx.order(order_id).await?;
        authorize_order_access(self.deps.gate.as_ref(), caller, order.as_ref(), &order_id.0)?;
        order.ok_or_else(|| ApplicationError::not_found("order", &order_id.0))
    }

    /// Cancels an order. Purchasers may abandon their own unpaid checkout;
    /// anything else needs organizer access. A paid order is credited in
    /// full and its entitlements are withdrawn.
    pub async fn cancel(
        &self,
        caller: &Caller,
        order_id: &OrderId,
        reason: &str,
    ) -> Result<Reversal, ApplicationError> {
        self.reverse(caller, order_id, reason, OrderStatus::Cancelled).await
    }

    /// Refunds a paid order. Always needs organizer access.
    pub async fn refund(
        &self,
        caller: &Caller,
        order_id: &OrderId,
        reason: &str,
    ) -> Result<Reversal, ApplicationError> {
        self.reverse(caller, order_id, reason, OrderStatus::Refunded).await
    }

    async fn reverse(
        &self,
        caller: &Caller,
        order_id: &OrderId,
        reason: &str,
        target: OrderStatus,
    ) -> Result<Reversal, ApplicationError> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let order = tx.order(order_id).await?;

        match &order {
            Some(found)
                if target == OrderStatus::Cancelled
                    && found.status != OrderStatus::Paid
                    && caller.owns(&found.purchaser_id) => {}
            Some(found) => self.deps.gate.assert_organizer_access(caller, &found.organizer_id)?,
            None => authorize_order_access(self.deps.gate.as_ref(), caller, None, &order_id.0)?,
        }
        let Some(mut order) = order else {
            return Err(ApplicationError::not_found("order", &order_id.0));
        };
        if reason.trim().is_empty() {
            return Err(ValidationErrors::single("reason", "must not be blank").into());
        }

        let was_paid = order.status == OrderStatus::Paid;
        if let Err(error) = order.transition_to(target, now) {
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        event_type(target),
                        AuditCategory::Order,
                        AuditOutcome::Rejected,
                    )
                    .for_order(&order.id)
                    .with_metadata("status", order.status.as_str()),
            );
            return Err(error.into());
        }
        tx.save_order(&order).await?;

        let credit_note_number = if was_paid {
            Some(issue_credit_note(&mut tx, &self.deps.settings, &order, reason, now).await?)
        } else {
            None
        };
        let mut reversal = withdraw_entitlements(&mut tx, order, now).await?;
        reversal.credit_note_number = credit_note_number;
        let recipient = tx.person(&reversal.order.purchaser_id).await?.map(|person| person.email);
        tx.commit().await?;

        info!(
            event_name = event_type(target),
            correlation_id = %caller.correlation_id,
            order_id = %reversal.order.id.0,
            was_paid,
            credit_note_number = reversal.credit_note_number.as_deref().unwrap_or(""),
            "order reversed"
        );
        let mut event = self
            .deps
            .audit_event(caller, event_type(target), AuditCategory::Order, AuditOutcome::Success)
            .for_order(&reversal.order.id)
            .with_metadata("reason", reason)
            .with_metadata("was_paid", was_paid.to_string());
        if let Some(number) = &reversal.credit_note_number {
            event = event.with_metadata("credit_note_number", number.clone());
        }
        self.deps.emit(event);

        if target == OrderStatus::Refunded {
            if let Some(email) = recipient {
                self.send_refund_notice(caller, &reversal, reason, &email).await;
            }
        }

        Ok(reversal)
    }

    async fn send_refund_notice(
        &self,
        caller: &Caller,
        reversal: &Reversal,
        reason: &str,
        email: &str,
    ) {
        let mut message = TransactionalMessage::new(ORDER_REFUNDED, email)
            .with_variable("order_id", reversal.order.id.0.clone())
            .with_variable("total_cents", reversal.order.total_cents().to_string())
            .with_variable("reason", reason);
        if let Some(number) = &reversal.credit_note_number {
            message = message.with_variable("credit_note_number", number.clone());
        }
        if !dispatch_best_effort(self.deps.notifier.as_ref(), &message, &caller.correlation_id)
            .await
        {
            self.deps.emit(
                self.deps
                    .audit_event(
                        caller,
                        "notification.send_failed",
                        AuditCategory::Notification,
                        AuditOutcome::Failed,
                    )
                    .for_order(&reversal.order.id)
                    .with_metadata("template", ORDER_REFUNDED),
            );
        }
    }
}

fn event_type(target: OrderStatus) -> &'static str {
    match target {
        OrderStatus::Refunded => "order.refunded",
        _ => "order.cancelled",
    }
}

/// Supersedes the order's invoice with a credit note for the full total.
async fn issue_credit_note<T: CommerceTx>(
    tx: &mut T,
    settings: &CommerceSettings,
    order: &Order,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<String, ApplicationError> {
    let mut invoice = tx.invoice_for_order(&order.id).await?.ok_or_else(|| {
        ApplicationError::Conflict(format!("paid order `{}` has no invoice", order.id.0))
    })?;
    if invoice.status == InvoiceStatus::Credited {
        return Err(ApplicationError::Conflict(format!(
            "invoice {} is already credited",
            invoice.invoice_number
        )));
    }

    let sequence = tx.next_sequence(&order.organizer_id, SequenceKind::CreditNoteNumber).await?;
    let number =
        format_document_number(&settings.credit_note_prefix, sequence, settings.number_width);
    let credit_note = CreditNote::for_invoice(&invoice, number.clone(), sequence, reason, now);
    tx.insert_credit_note(&credit_note).await?;

    invoice.transition_to(InvoiceStatus::Credited, now)?;
    tx.save_invoice(&invoice).await?;
    Ok(number)
}

async fn withdraw_entitlements<T: CommerceTx>(
    tx: &mut T,
    order: Order,
    now: DateTime<Utc>,
) -> Result<Reversal, ApplicationError> {
    let mut reversal = Reversal {
        order,
        credit_note_number: None,
        registrations_cancelled: 0,
        event_tickets_revoked: 0,
        memberships_cancelled: 0,
        tickets_revoked: 0,
    };
    let order_id = reversal.order.id.clone();

    let mut holders = BTreeSet::new();
    for mut registration in tx.registrations_for_order(&order_id).await? {
        if registration.status == RegistrationStatus::Cancelled {
            continue;
        }
        registration.set_status(RegistrationStatus::Cancelled, now);
        tx.save_registration(&registration).await?;
        holders.insert((registration.period_id, registration.person_id));
        reversal.registrations_cancelled += 1;
    }

    // The period ticket survives while another active track keeps it in use.
    for (period_id, person_id) in holders {
        if !tx.active_registrations_for(&period_id, &person_id).await?.is_empty() {
            continue;
        }
        if let Some(mut ticket) = tx.ticket_for(&period_id, &person_id).await? {
            if ticket.status == TicketStatus::Active {
                ticket.status = TicketStatus::Revoked;
                tx.save_ticket(&ticket).await?;
                reversal.tickets_revoked += 1;
            }
        }
    }

    for mut registration in tx.event_registrations_for_order(&order_id).await? {
        if registration.status != RegistrationStatus::Cancelled {
            registration.set_status(RegistrationStatus::Cancelled, now);
            tx.save_event_registration(&registration).await?;
            reversal.registrations_cancelled += 1;
        }
    }
    for mut ticket in tx.event_tickets_for_order(&order_id).await? {
        if ticket.status == TicketStatus::Active {
            ticket.status = TicketStatus::Revoked;
            tx.save_event_ticket(&ticket).await?;
            reversal.event_tickets_revoked += 1;
        }
    }

    for mut membership in tx.memberships_for_order(&order_id).await? {
        if membership.status != MembershipStatus::Cancelled {
            membership.cancel(now);
            tx.save_membership(&membership).await?;
            reversal.memberships_cancelled += 1;
        }
    }

    Ok(reversal)
}
