use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    pub id: OrganizerId,
    pub name: String,
    /// Organizers below the registration threshold do not report MVA.
    pub vat_registered: bool,
    pub mva_rate: Decimal,
    pub invoice_prefix: Option<String>,
}

impl Organizer {
    pub fn effective_mva_rate(&self) -> Decimal {
        if self.vat_registered {
            self.mva_rate
        } else {
            Decimal::ZERO
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub email: String,
}

/// Organizer-scoped counters. Each is advanced by a single atomic
/// increment-and-return at the storage layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    OrderNumber,
    InvoiceNumber,
    CreditNoteNumber,
    MembershipNumber,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderNumber => "order_number",
            Self::InvoiceNumber => "invoice_number",
            Self::CreditNoteNumber => "credit_note_number",
            Self::MembershipNumber => "membership_number",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "order_number" => Some(Self::OrderNumber),
            "invoice_number" => Some(Self::InvoiceNumber),
            "credit_note_number" => Some(Self::CreditNoteNumber),
            "membership_number" => Some(Self::MembershipNumber),
            _ => None,
        }
    }
}
