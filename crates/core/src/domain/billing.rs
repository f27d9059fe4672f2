use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{Order, OrderId};
use crate::domain::organizer::OrganizerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvoiceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreditNoteId(pub String);

/// Renders `prefix-0001` style document numbers.
pub fn format_document_number(prefix: &str, sequence: u64, width: usize) -> String {
    format!("{prefix}-{sequence:0width$}")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub provider_ref: String,
    pub amount_cents: i64,
    pub received_at: DateTime<Utc>,
}

impl Payment {
    pub fn record(order: &Order, provider_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId(Uuid::new_v4().to_string()),
            order_id: order.id.clone(),
            provider_ref: provider_ref.into(),
            amount_cents: order.total_cents(),
            received_at: now,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Sent,
    Paid,
    Credited,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Credited => "credited",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sent" => Some(Self::Sent),
            "paid" => Some(Self::Paid),
            "credited" => Some(Self::Credited),
            _ => None,
        }
    }
}

/// Fiscal record for a paid order. Amounts are copied from the order's
/// pricing snapshot and never change after issue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub organizer_id: OrganizerId,
    pub order_id: OrderId,
    pub invoice_number: String,
    pub sequence: u64,
    pub status: InvoiceStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub mva_cents: i64,
    pub total_cents: i64,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn issue(order: &Order, invoice_number: String, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: InvoiceId(Uuid::new_v4().to_string()),
            organizer_id: order.organizer_id.clone(),
            order_id: order.id.clone(),
            invoice_number,
            sequence,
            status: InvoiceStatus::Sent,
            subtotal_cents: order.pricing.subtotal_cents,
            discount_cents: order.pricing.discount_cents,
            mva_cents: order.pricing.mva_cents,
            total_cents: order.pricing.total_cents,
            issued_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(
        &mut self,
        next: InvoiceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let allowed = matches!(
            (self.status, next),
            (InvoiceStatus::Sent, InvoiceStatus::Paid)
                | (InvoiceStatus::Sent, InvoiceStatus::Credited)
                | (InvoiceStatus::Paid, InvoiceStatus::Credited)
        );
        if !allowed {
            return Err(DomainError::InvariantViolation(format!(
                "invoice {} cannot move from {:?} to {next:?}",
                self.invoice_number, self.status
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Supersedes an invoice on cancellation or refund; the invoice itself is
/// never rewritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: CreditNoteId,
    pub organizer_id: OrganizerId,
    pub invoice_id: InvoiceId,
    pub order_id: OrderId,
    pub credit_note_number: String,
    pub sequence: u64,
    pub amount_cents: i64,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
}

impl CreditNote {
    pub fn for_invoice(
        invoice: &Invoice,
        credit_note_number: String,
        sequence: u64,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CreditNoteId(Uuid::new_v4().to_string()),
            organizer_id: invoice.organizer_id.clone(),
            invoice_id: invoice.id.clone(),
            order_id: invoice.order_id.clone(),
            credit_note_number,
            sequence,
            amount_cents: invoice.total_cents,
            reason: reason.into(),
            issued_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::format_document_number;

    #[test]
    fn document_numbers_are_zero_padded() {
        assert_eq!(format_document_number("INV", 1, 4), "INV-0001");
        assert_eq!(format_document_number("CN", 42, 4), "CN-0042");
        assert_eq!(format_document_number("INV", 123_456, 4), "INV-123456");
    }
}
