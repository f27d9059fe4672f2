use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{CoursePeriodId, EventId};
use crate::domain::order::OrderId;
use crate::domain::organizer::{OrganizerId, PersonId};
use crate::domain::registration::EventRegistrationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventTicketId(pub String);

const TOKEN_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const TOKEN_LEN: usize = 24;

/// Random token encoded into the ticket QR code. The charset drops
/// look-alike characters so tokens can be typed in at the door.
pub fn generate_ticket_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Active,
    Revoked,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Combined-access ticket for a course period. At most one exists per
/// (period, person), however many tracks the person bought.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub organizer_id: OrganizerId,
    pub period_id: CoursePeriodId,
    pub person_id: PersonId,
    pub order_id: OrderId,
    pub token: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
}

impl Ticket {
    pub fn issue(
        organizer_id: OrganizerId,
        period_id: CoursePeriodId,
        person_id: PersonId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId(Uuid::new_v4().to_string()),
            organizer_id,
            period_id,
            person_id,
            order_id,
            token: generate_ticket_token(),
            status: TicketStatus::Active,
            issued_at: now,
        }
    }
}

/// One admission to an event. An event registration for N seats yields N of
/// these, numbered 1..=N.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTicket {
    pub id: EventTicketId,
    pub event_registration_id: EventRegistrationId,
    pub order_id: OrderId,
    pub event_id: EventId,
    pub person_id: PersonId,
    pub seq: u32,
    pub token: String,
    pub status: TicketStatus,
    pub issued_at: DateTime<Utc>,
}

impl EventTicket {
    pub fn issue(
        event_registration_id: EventRegistrationId,
        order_id: OrderId,
        event_id: EventId,
        person_id: PersonId,
        seq: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventTicketId(Uuid::new_v4().to_string()),
            event_registration_id,
            order_id,
            event_id,
            person_id,
            seq,
            token: generate_ticket_token(),
            status: TicketStatus::Active,
            issued_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{generate_ticket_token, TOKEN_CHARSET, TOKEN_LEN};

    #[test]
    fn tokens_use_unambiguous_charset() {
        let token = generate_ticket_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|byte| TOKEN_CHARSET.contains(&byte)));
        assert!(!token.contains('O') && !token.contains('0') && !token.contains('I'));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let tokens = (0..500).map(|_| generate_ticket_token()).collect::<HashSet<_>>();
        assert_eq!(tokens.len(), 500);
    }
}
