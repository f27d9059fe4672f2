use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use enrolla_core::domain::billing::{CreditNote, Invoice, Payment};
use enrolla_core::domain::catalog::{
    CoursePeriod, CoursePeriodId, Event, EventId, MembershipTier, MembershipTierId, Track, TrackId,
};
use enrolla_core::domain::discount::{DiscountRule, DiscountRuleId};
use enrolla_core::domain::order::{Order, OrderId};
use enrolla_core::domain::organizer::{Organizer, OrganizerId, Person, PersonId, SequenceKind};
use enrolla_core::domain::registration::{
    EventRegistration, Membership, MembershipStatus, Registration, RegistrationId,
    RegistrationStatus,
};
use enrolla_core::domain::ticket::{EventTicket, Ticket};
use enrolla_core::domain::waitlist::{WaitlistEntry, WaitlistStatus};
use enrolla_core::errors::ApplicationError;
use enrolla_core::store::{CommerceStore, CommerceTx, StoreResult};

#[derive(Clone, Debug, Default)]
struct CommerceState {
    organizers: HashMap<String, Organizer>,
    people: HashMap<String, Person>,
    periods: HashMap<String, CoursePeriod>,
    tracks: HashMap<String, Track>,
    events: HashMap<String, Event>,
    tiers: HashMap<String, MembershipTier>,
    // Insertion order doubles as creation order.
    rules: Vec<DiscountRule>,
    sequences: HashMap<(String, SequenceKind), u64>,
    orders: HashMap<String, Order>,
    registrations: Vec<Registration>,
    waitlist: HashMap<String, WaitlistEntry>,
    event_registrations: Vec<EventRegistration>,
    memberships: Vec<Membership>,
    tickets: Vec<Ticket>,
    event_tickets: Vec<EventTicket>,
    payments: Vec<Payment>,
    invoices: Vec<Invoice>,
    credit_notes: Vec<CreditNote>,
}

/// Process-local store used by tests and the demo CLI. One transaction at a
/// time holds the state lock and works on a private copy that replaces the
/// shared state on commit.
#[derive(Clone, Default)]
pub struct InMemoryCommerceStore {
    state: Arc<Mutex<CommerceState>>,
}

impl InMemoryCommerceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct InMemoryCommerceTx {
    guard: OwnedMutexGuard<CommerceState>,
    working: CommerceState,
}

#[async_trait]
impl CommerceStore for InMemoryCommerceStore {
    type Tx = InMemoryCommerceTx;

    async fn begin(&self) -> StoreResult<InMemoryCommerceTx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryCommerceTx { guard, working })
    }
}

fn conflict(message: impl Into<String>) -> ApplicationError {
    ApplicationError::Conflict(message.into())
}

fn upsert<T>(rows: &mut Vec<T>, row: &T, same: impl Fn(&T) -> bool)
where
    T: Clone,
{
    match rows.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
}

#[async_trait]
impl CommerceTx for InMemoryCommerceTx {
    async fn commit(self) -> StoreResult<()> {
        let Self { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn organizer(&mut self, id: &OrganizerId) -> StoreResult<Option<Organizer>> {
        Ok(self.working.organizers.get(&id.0).cloned())
    }

    async fn save_organizer(&mut self, organizer: &Organizer) -> StoreResult<()> {
        self.working.organizers.insert(organizer.id.0.clone(), organizer.clone());
        Ok(())
    }

    async fn person(&mut self, id: &PersonId) -> StoreResult<Option<Person>> {
        Ok(self.working.people.get(&id.0).cloned())
    }

    async fn save_person(&mut self, person: &Person) -> StoreResult<()> {
        self.working.people.insert(person.id.0.clone(), person.clone());
        Ok(())
    }

    async fn course_period(&mut self, id: &CoursePeriodId) -> StoreResult<Option<CoursePeriod>> {
        Ok(self.working.periods.get(&id.0).cloned())
    }

    async fn save_course_period(&mut self, period: &CoursePeriod) -> StoreResult<()> {
        self.working.periods.insert(period.id.0.clone(), period.clone());
        Ok(())
    }

    async fn track(&mut self, id: &TrackId) -> StoreResult<Option<Track>> {
        Ok(self.working.tracks.get(&id.0).cloned())
    }

    async fn save_track(&mut self, track: &Track) -> StoreResult<()> {
        self.working.tracks.insert(track.id.0.clone(), track.clone());
        Ok(())
    }

    async fn event(&mut self, id: &EventId) -> StoreResult<Option<Event>> {
        Ok(self.working.events.get(&id.0).cloned())
    }

    async fn save_event(&mut self, event: &Event) -> StoreResult<()> {
        self.working.events.insert(event.id.0.clone(), event.clone());
        Ok(())
    }

    async fn membership_tier(
        &mut self,
        id: &MembershipTierId,
    ) -> StoreResult<Option<MembershipTier>> {
        Ok(self.working.tiers.get(&id.0).cloned())
    }

    async fn save_membership_tier(&mut self, tier: &MembershipTier) -> StoreResult<()> {
        self.working.tiers.insert(tier.id.0.clone(), tier.clone());
        Ok(())
    }

    async fn discount_rule(&mut self, id: &DiscountRuleId) -> StoreResult<Option<DiscountRule>> {
        Ok(self.working.rules.iter().find(|rule| rule.id == *id).cloned())
    }

    async fn discount_rules_for_period(
        &mut self,
        period_id: &CoursePeriodId,
    ) -> StoreResult<Vec<DiscountRule>> {
        Ok(self.working.rules.iter().filter(|rule| rule.period_id == *period_id).cloned().collect())
    }

    async fn save_discount_rule(&mut self, rule: &DiscountRule) -> StoreResult<()> {
        upsert(&mut self.working.rules, rule, |existing| existing.id == rule.id);
        Ok(())
    }

    async fn next_sequence(
        &mut self,
        organizer_id: &OrganizerId,
        kind: SequenceKind,
    ) -> StoreResult<u64> {
        let value = self.working.sequences.entry((organizer_id.0.clone(), kind)).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn order(&mut self, id: &OrderId) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id.0).cloned())
    }

    async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        if let Some(number) = order.order_number {
            let taken = self.working.orders.values().any(|other| {
                other.id != order.id
                    && other.organizer_id == order.organizer_id
                    && other.order_number == Some(number)
            });
            if taken {
                return Err(conflict(format!("order number {number} already assigned")));
            }
        }
        self.working.orders.insert(order.id.0.clone(), order.clone());
        Ok(())
    }

    async fn registration(&mut self, id: &RegistrationId) -> StoreResult<Option<Registration>> {
        Ok(self.working.registrations.iter().find(|reg| reg.id == *id).cloned())
    }

    async fn registrations_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<Registration>> {
        Ok(self
            .working
            .registrations
            .iter()
            .filter(|reg| reg.order_id.as_ref() == Some(order_id))
            .cloned()
            .collect())
    }

    async fn active_registrations_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Vec<Registration>> {
        Ok(self
            .working
            .registrations
            .iter()
            .filter(|reg| {
                reg.period_id == *period_id
                    && reg.person_id == *person_id
                    && reg.status == RegistrationStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn registrations_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Vec<Registration>> {
        Ok(self
            .working
            .registrations
            .iter()
            .filter(|reg| reg.period_id == *period_id && reg.person_id == *person_id)
            .cloned()
            .collect())
    }

    async fn occupied_seats(&mut self, track_id: &TrackId) -> StoreResult<u32> {
        let seats = self
            .working
            .registrations
            .iter()
            .filter(|reg| {
                reg.track_id == *track_id
                    && matches!(reg.status, RegistrationStatus::Draft | RegistrationStatus::Active)
            })
            .count();
        Ok(u32::try_from(seats).unwrap_or(u32::MAX))
    }

    async fn save_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        upsert(&mut self.working.registrations, registration, |existing| {
            existing.id == registration.id
        });
        Ok(())
    }

    async fn waitlist_entry(
        &mut self,
        registration_id: &RegistrationId,
    ) -> StoreResult<Option<WaitlistEntry>> {
        Ok(self.working.waitlist.get(&registration_id.0).cloned())
    }

    async fn lapsed_offers(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntry>> {
        let mut lapsed: Vec<WaitlistEntry> = self
            .working
            .waitlist
            .values()
            .filter(|entry| {
                entry.status == WaitlistStatus::Offered
                    && entry.offered_until.is_some_and(|until| until < now)
            })
            .cloned()
            .collect();
        lapsed.sort_by(|left, right| {
            left.offered_until
                .cmp(&right.offered_until)
                .then_with(|| left.registration_id.0.cmp(&right.registration_id.0))
        });
        Ok(lapsed)
    }

    async fn save_waitlist_entry(&mut self, entry: &WaitlistEntry) -> StoreResult<()> {
        self.working.waitlist.insert(entry.registration_id.0.clone(), entry.clone());
        Ok(())
    }

    async fn event_registrations_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<EventRegistration>> {
        Ok(self
            .working
            .event_registrations
            .iter()
            .filter(|reg| reg.order_id == *order_id)
            .cloned()
            .collect())
    }

    async fn save_event_registration(
        &mut self,
        registration: &EventRegistration,
    ) -> StoreResult<()> {
        upsert(&mut self.working.event_registrations, registration, |existing| {
            existing.id == registration.id
        });
        Ok(())
    }

    async fn event_tickets_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<EventTicket>> {
        let mut tickets: Vec<EventTicket> = self
            .working
            .event_tickets
            .iter()
            .filter(|ticket| ticket.order_id == *order_id)
            .cloned()
            .collect();
        tickets.sort_by(|left, right| {
            left.event_registration_id
                .0
                .cmp(&right.event_registration_id.0)
                .then(left.seq.cmp(&right.seq))
        });
        Ok(tickets)
    }

    async fn save_event_ticket(&mut self, ticket: &EventTicket) -> StoreResult<()> {
        let clash = self.working.event_tickets.iter().any(|other| {
            other.id != ticket.id
                && ((other.event_registration_id == ticket.event_registration_id
                    && other.seq == ticket.seq)
                    || other.token == ticket.token)
        });
        if clash {
            return Err(conflict(format!(
                "event ticket {} of registration {} already issued",
                ticket.seq, ticket.event_registration_id.0
            )));
        }
        upsert(&mut self.working.event_tickets, ticket, |existing| existing.id == ticket.id);
        Ok(())
    }

    async fn memberships_for_order(&mut self, order_id: &OrderId) -> StoreResult<Vec<Membership>> {
        Ok(self
            .working
            .memberships
            .iter()
            .filter(|membership| membership.order_id == *order_id)
            .cloned()
            .collect())
    }

    async fn has_active_membership(
        &mut self,
        organizer_id: &OrganizerId,
        person_id: &PersonId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.working.memberships.iter().any(|membership| {
            membership.organizer_id == *organizer_id
                && membership.person_id == *person_id
                && membership.status == MembershipStatus::Active
                && membership.is_active_at(now)
        }))
    }

    async fn save_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        upsert(&mut self.working.memberships, membership, |existing| existing.id == membership.id);
        Ok(())
    }

    async fn ticket_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Option<Ticket>> {
        Ok(self
            .working
            .tickets
            .iter()
            .find(|ticket| ticket.period_id == *period_id && ticket.person_id == *person_id)
            .cloned())
    }

    async fn save_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        let clash = self.working.tickets.iter().any(|other| {
            other.id != ticket.id
                && ((other.period_id == ticket.period_id && other.person_id == ticket.person_id)
                    || other.token == ticket.token)
        });
        if clash {
            return Err(conflict(format!(
                "ticket for person {} in period {} already exists",
                ticket.person_id.0, ticket.period_id.0
            )));
        }
        upsert(&mut self.working.tickets, ticket, |existing| existing.id == ticket.id);
        Ok(())
    }

    async fn payment_for_order(&mut self, order_id: &OrderId) -> StoreResult<Option<Payment>> {
        Ok(self.working.payments.iter().find(|payment| payment.order_id == *order_id).cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        if self.working.payments.iter().any(|other| other.order_id == payment.order_id) {
            return Err(conflict(format!("order {} already has a payment", payment.order_id.0)));
        }
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn invoice_for_order(&mut self, order_id: &OrderId) -> StoreResult<Option<Invoice>> {
        Ok(self.working.invoices.iter().find(|invoice| invoice.order_id == *order_id).cloned())
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        let clash = self.working.invoices.iter().any(|other| {
            other.id != invoice.id
                && (other.order_id == invoice.order_id
                    || (other.organizer_id == invoice.organizer_id
                        && other.invoice_number == invoice.invoice_number))
        });
        if clash {
            let order_id = &invoice.order_id.0;
            return Err(conflict(format!("invoice for order {order_id} already exists")));
        }
        upsert(&mut self.working.invoices, invoice, |existing| existing.id == invoice.id);
        Ok(())
    }

    async fn credit_notes_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<CreditNote>> {
        Ok(self
            .working
            .credit_notes
            .iter()
            .filter(|note| note.order_id == *order_id)
            .cloned()
            .collect())
    }

    async fn insert_credit_note(&mut self, credit_note: &CreditNote) -> StoreResult<()> {
        let clash = self.working.credit_notes.iter().any(|other| {
            other.organizer_id == credit_note.organizer_id
                && other.credit_note_number == credit_note.credit_note_number
        });
        if clash {
            return Err(conflict(format!(
                "credit note {} already exists",
                credit_note.credit_note_number
            )));
        }
        self.working.credit_notes.push(credit_note.clone());
        Ok(())
    }
}
