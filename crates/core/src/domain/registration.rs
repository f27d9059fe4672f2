use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::{
    CoursePeriodId, DanceRole, EventId, MembershipTier, MembershipTierId, PriceBasis, TrackId,
};
use crate::domain::order::OrderId;
use crate::domain::organizer::{OrganizerId, PersonId};
use crate::errors::{DomainError, ValidationErrors};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventRegistrationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipId(pub String);

/// Shared by course and event registrations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Waitlisted,
    Draft,
    Active,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waitlisted => "waitlisted",
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "waitlisted" => Some(Self::Waitlisted),
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Statuses that hold a seat on a track.
    pub fn occupies_seat(&self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub order_id: Option<OrderId>,
    pub organizer_id: OrganizerId,
    pub period_id: CoursePeriodId,
    pub track_id: TrackId,
    pub person_id: PersonId,
    pub role: DanceRole,
    pub with_partner: bool,
    pub price_basis: PriceBasis,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organizer_id: OrganizerId,
        period_id: CoursePeriodId,
        track_id: TrackId,
        person_id: PersonId,
        role: DanceRole,
        with_partner: bool,
        price_basis: PriceBasis,
        status: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegistrationId(Uuid::new_v4().to_string()),
            order_id: None,
            organizer_id,
            period_id,
            track_id,
            person_id,
            role,
            with_partner,
            price_basis,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: RegistrationStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRegistration {
    pub id: EventRegistrationId,
    pub order_id: OrderId,
    pub event_id: EventId,
    pub person_id: PersonId,
    pub quantity: u32,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRegistration {
    pub fn new(
        order_id: OrderId,
        event_id: EventId,
        person_id: PersonId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventRegistrationId(Uuid::new_v4().to_string()),
            order_id,
            event_id,
            person_id,
            quantity,
            status: RegistrationStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: RegistrationStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    PendingPayment,
    Active,
    Cancelled,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_payment" => Some(Self::PendingPayment),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub order_id: OrderId,
    pub organizer_id: OrganizerId,
    pub tier_id: MembershipTierId,
    pub person_id: PersonId,
    pub status: MembershipStatus,
    pub membership_number: Option<u64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn pending(
        order_id: OrderId,
        organizer_id: OrganizerId,
        tier_id: MembershipTierId,
        person_id: PersonId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MembershipId(Uuid::new_v4().to_string()),
            order_id,
            organizer_id,
            tier_id,
            person_id,
            status: MembershipStatus::PendingPayment,
            membership_number: None,
            valid_from: None,
            valid_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn activate(
        &mut self,
        tier: &MembershipTier,
        membership_number: u64,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let valid_until = now
            .checked_add_signed(Duration::days(i64::from(tier.validity_days)))
            .ok_or_else(|| {
                ValidationErrors::single("validity_days", "membership would end out of range")
            })?;
        self.status = MembershipStatus::Active;
        self.membership_number = Some(membership_number);
        self.valid_from = Some(now);
        self.valid_until = Some(valid_until);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = MembershipStatus::Cancelled;
        self.updated_at = now;
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active
            && self.valid_until.map(|until| now <= until).unwrap_or(true)
    }
}
