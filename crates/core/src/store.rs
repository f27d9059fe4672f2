//! Transactional storage seam used by the services.
//!
//! Every service call opens one [`CommerceTx`], performs all of its reads,
//! checks and writes through it, and commits once. A transaction is exclusive
//! for writers from its first read, so read-check-write sequences inside it
//! cannot interleave with another writer. Dropping a transaction without
//! calling [`CommerceTx::commit`] discards every write made through it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::billing::{CreditNote, Invoice, Payment};
use crate::domain::catalog::{
    CoursePeriod, CoursePeriodId, Event, EventId, MembershipTier, MembershipTierId, Track, TrackId,
};
use crate::domain::discount::{DiscountRule, DiscountRuleId};
use crate::domain::order::{Order, OrderId};
use crate::domain::organizer::{Organizer, OrganizerId, Person, PersonId, SequenceKind};
use crate::domain::registration::{
    EventRegistration, Membership, Registration, RegistrationId,
};
use crate::domain::ticket::{EventTicket, Ticket};
use crate::domain::waitlist::WaitlistEntry;
use crate::errors::ApplicationError;

pub type StoreResult<T> = Result<T, ApplicationError>;

#[async_trait]
pub trait CommerceStore: Send + Sync + 'static {
    type Tx: CommerceTx;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

#[async_trait]
pub trait CommerceTx: Send {
    async fn commit(self) -> StoreResult<()>;

    // Tenants and catalog.
    async fn organizer(&mut self, id: &OrganizerId) -> StoreResult<Option<Organizer>>;
    async fn save_organizer(&mut self, organizer: &Organizer) -> StoreResult<()>;
    async fn person(&mut self, id: &PersonId) -> StoreResult<Option<Person>>;
    async fn save_person(&mut self, person: &Person) -> StoreResult<()>;
    async fn course_period(&mut self, id: &CoursePeriodId) -> StoreResult<Option<CoursePeriod>>;
    async fn save_course_period(&mut self, period: &CoursePeriod) -> StoreResult<()>;
    async fn track(&mut self, id: &TrackId) -> StoreResult<Option<Track>>;
    async fn save_track(&mut self, track: &Track) -> StoreResult<()>;
    async fn event(&mut self, id: &EventId) -> StoreResult<Option<Event>>;
    async fn save_event(&mut self, event: &Event) -> StoreResult<()>;
    async fn membership_tier(&mut self, id: &MembershipTierId)
        -> StoreResult<Option<MembershipTier>>;
    async fn save_membership_tier(&mut self, tier: &MembershipTier) -> StoreResult<()>;

    // Discount rules.
    async fn discount_rule(&mut self, id: &DiscountRuleId) -> StoreResult<Option<DiscountRule>>;
    /// All rules of a period, enabled or not, in creation order.
    async fn discount_rules_for_period(
        &mut self,
        period_id: &CoursePeriodId,
    ) -> StoreResult<Vec<DiscountRule>>;
    async fn save_discount_rule(&mut self, rule: &DiscountRule) -> StoreResult<()>;

    /// Atomic increment-and-return of an organizer-scoped counter. The first
    /// value handed out is 1.
    async fn next_sequence(
        &mut self,
        organizer_id: &OrganizerId,
        kind: SequenceKind,
    ) -> StoreResult<u64>;

    // Orders.
    async fn order(&mut self, id: &OrderId) -> StoreResult<Option<Order>>;
    async fn save_order(&mut self, order: &Order) -> StoreResult<()>;

    // Course registrations and waitlist.
    async fn registration(&mut self, id: &RegistrationId) -> StoreResult<Option<Registration>>;
    async fn registrations_for_order(&mut self, order_id: &OrderId)
        -> StoreResult<Vec<Registration>>;
    /// Registrations of `person_id` in `period_id` whose status is ACTIVE.
    async fn active_registrations_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Vec<Registration>>;
    /// Registrations of `person_id` in `period_id` in any status.
    async fn registrations_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Vec<Registration>>;
    /// Number of registrations on the track that hold a seat (DRAFT or ACTIVE).
    async fn occupied_seats(&mut self, track_id: &TrackId) -> StoreResult<u32>;
    async fn save_registration(&mut self, registration: &Registration) -> StoreResult<()>;
    async fn waitlist_entry(
        &mut self,
        registration_id: &RegistrationId,
    ) -> StoreResult<Option<WaitlistEntry>>;
    /// OFFERED entries whose deadline lies strictly before `now`.
    async fn lapsed_offers(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntry>>;
    async fn save_waitlist_entry(&mut self, entry: &WaitlistEntry) -> StoreResult<()>;

    // Event registrations and tickets.
    async fn event_registrations_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<EventRegistration>>;
    async fn save_event_registration(&mut self, registration: &EventRegistration)
        -> StoreResult<()>;
    async fn event_tickets_for_order(&mut self, order_id: &OrderId)
        -> StoreResult<Vec<EventTicket>>;
    async fn save_event_ticket(&mut self, ticket: &EventTicket) -> StoreResult<()>;

    // Memberships.
    async fn memberships_for_order(&mut self, order_id: &OrderId) -> StoreResult<Vec<Membership>>;
    async fn has_active_membership(
        &mut self,
        organizer_id: &OrganizerId,
        person_id: &PersonId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn save_membership(&mut self, membership: &Membership) -> StoreResult<()>;

    // Course tickets: at most one per (period, person).
    async fn ticket_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Option<Ticket>>;
    async fn save_ticket(&mut self, ticket: &Ticket) -> StoreResult<()>;

    // Billing.
    async fn payment_for_order(&mut self, order_id: &OrderId) -> StoreResult<Option<Payment>>;
    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;
    async fn invoice_for_order(&mut self, order_id: &OrderId) -> StoreResult<Option<Invoice>>;
    async fn save_invoice(&mut self, invoice: &Invoice) -> StoreResult<()>;
    async fn credit_notes_for_order(&mut self, order_id: &OrderId)
        -> StoreResult<Vec<CreditNote>>;
    async fn insert_credit_note(&mut self, credit_note: &CreditNote) -> StoreResult<()>;
}
