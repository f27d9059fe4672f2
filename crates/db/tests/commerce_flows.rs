use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use enrolla_core::access::Caller;
use enrolla_core::audit::InMemoryAuditSink;
use enrolla_core::clock::FixedClock;
use enrolla_core::domain::billing::InvoiceStatus;
use enrolla_core::domain::cart::{Cart, CartItem, CartItemRef};
use enrolla_core::domain::catalog::{
    CoursePeriodId, DanceRole, EventId, MembershipTierId, PriceBasis, TrackId,
};
use enrolla_core::domain::discount::{DiscountRule, DiscountRuleId, RuleKind};
use enrolla_core::domain::order::{Order, OrderStatus};
use enrolla_core::domain::organizer::{OrganizerId, PersonId};
use enrolla_core::domain::registration::{MembershipStatus, RegistrationId, RegistrationStatus};
use enrolla_core::domain::ticket::TicketStatus;
use enrolla_core::domain::waitlist::WaitlistStatus;
use enrolla_core::errors::ApplicationError;
use enrolla_core::notify::{RecordingNotificationSender, ORDER_CONFIRMATION, WAITLIST_OFFER};
use enrolla_core::services::{CommerceServices, FulfillmentOutcome, ServiceDeps};
use enrolla_core::store::{CommerceStore, CommerceTx};
use enrolla_db::fixtures::{
    DemoCatalog, CAPPED_TRACK_ID, EVENT_ID, OPEN_TRACK_ID, ORGANIZER_ADMIN_ID, ORGANIZER_ID,
    PERIOD_ID, SELF_SERVICE_TIER_ID, VALIDATED_TIER_ID,
};
use enrolla_db::{connect_with_settings, migrations, InMemoryCommerceStore, SqlCommerceStore};

struct Harness<S> {
    store: Arc<S>,
    services: CommerceServices<S>,
    clock: FixedClock,
    audit: InMemoryAuditSink,
    notifier: RecordingNotificationSender,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap()
}

async fn harness<S: CommerceStore>(store: S) -> Harness<S> {
    let store = Arc::new(store);
    DemoCatalog::load(store.as_ref(), start()).await.expect("seed demo catalog");

    let clock = FixedClock::new(start());
    let audit = InMemoryAuditSink::default();
    let notifier = RecordingNotificationSender::default();
    let deps = ServiceDeps::new(Arc::clone(&store))
        .with_clock(Arc::new(clock.clone()))
        .with_audit(Arc::new(audit.clone()))
        .with_notifier(Arc::new(notifier.clone()));

    Harness { store, services: CommerceServices::new(deps), clock, audit, notifier }
}

async fn memory_store() -> InMemoryCommerceStore {
    InMemoryCommerceStore::new()
}

async fn sqlite_store() -> SqlCommerceStore {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");
    SqlCommerceStore::new(pool)
}

fn organizer() -> OrganizerId {
    OrganizerId(ORGANIZER_ID.to_string())
}

fn dancer(id: &str) -> Caller {
    Caller::person(PersonId(id.to_string()), format!("{id}@dancers.test"))
}

fn staff() -> Caller {
    Caller::person(PersonId(ORGANIZER_ADMIN_ID.to_string()), "admin@swing-oslo.test")
        .with_organizer_role(organizer())
}

fn webhook() -> Caller {
    Caller::system("payment-webhook")
}

fn track_item(track_id: &str) -> CartItem {
    CartItem {
        item: CartItemRef::Track {
            period_id: CoursePeriodId(PERIOD_ID.to_string()),
            track_id: TrackId(track_id.to_string()),
        },
        role: Some(DanceRole::Leader),
        with_partner: false,
        price_basis: PriceBasis::Single,
        unit_price_cents: 0,
        quantity: 1,
        organizer_id: organizer(),
    }
}

fn event_item(quantity: u32) -> CartItem {
    CartItem {
        item: CartItemRef::Event { event_id: EventId(EVENT_ID.to_string()) },
        role: None,
        with_partner: false,
        price_basis: PriceBasis::Single,
        unit_price_cents: 0,
        quantity,
        organizer_id: organizer(),
    }
}

fn membership_item(tier_id: &str) -> CartItem {
    CartItem {
        item: CartItemRef::Membership { tier_id: MembershipTierId(tier_id.to_string()) },
        role: None,
        with_partner: false,
        price_basis: PriceBasis::Single,
        unit_price_cents: 0,
        quantity: 1,
        organizer_id: organizer(),
    }
}

fn waitlisted_cart() -> Cart {
    cart("person-cleo", vec![track_item(CAPPED_TRACK_ID)])
}

fn cart(person_id: &str, items: Vec<CartItem>) -> Cart {
    Cart { organizer_id: organizer(), purchaser_id: PersonId(person_id.to_string()), items }
}

async fn place<S: CommerceStore>(
    harness: &Harness<S>,
    person_id: &str,
    items: Vec<CartItem>,
) -> Order {
    harness
        .services
        .checkout
        .place_order(&dancer(person_id), cart(person_id, items))
        .await
        .expect("place order")
        .order
        .expect("order created")
}

async fn fulfill<S: CommerceStore>(harness: &Harness<S>, order: &Order) -> FulfillmentOutcome {
    harness
        .services
        .fulfillment
        .fulfill_order(&webhook(), &order.id, &format!("pay-{}", order.id.0))
        .await
        .expect("fulfill order")
}

async fn fulfillment_is_idempotent<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let order = place(&harness, "person-ada", vec![track_item(OPEN_TRACK_ID)]).await;

    let first = fulfill(&harness, &order).await;
    let FulfillmentOutcome::Fulfilled(receipt) = &first else {
        panic!("first confirmation should fulfill: {first:?}");
    };
    assert_eq!(receipt.order_number, 1);
    assert_eq!(receipt.invoice_number, "SO-0001");
    assert_eq!(receipt.tickets_issued, 1);

    let period_id = CoursePeriodId(PERIOD_ID.to_string());
    let person_id = PersonId("person-ada".to_string());
    let (invoice, ticket) = {
        let mut tx = harness.store.begin().await.expect("begin");
        let invoice = tx.invoice_for_order(&order.id).await.expect("load").expect("invoice");
        let ticket = tx.ticket_for(&period_id, &person_id).await.expect("load").expect("ticket");
        (invoice, ticket)
    };

    let second = fulfill(&harness, &order).await;
    assert!(matches!(
        &second,
        FulfillmentOutcome::AlreadyFulfilled { order_number: Some(1), .. }
    ));

    let mut tx = harness.store.begin().await.expect("begin");
    assert!(tx.payment_for_order(&order.id).await.expect("payment").is_some());
    let paid = tx.order(&order.id).await.expect("order").expect("order exists");
    assert_eq!(paid.status, OrderStatus::Paid);
    let replayed = tx.invoice_for_order(&order.id).await.expect("load").expect("invoice");
    assert_eq!(replayed, invoice);
    let replayed = tx.ticket_for(&period_id, &person_id).await.expect("load").expect("ticket");
    assert_eq!(replayed, ticket);
    drop(tx);

    // The replay consumed no invoice or order number.
    let next = place(&harness, "person-bo", vec![event_item(1)]).await;
    let FulfillmentOutcome::Fulfilled(receipt) = fulfill(&harness, &next).await else {
        panic!("next order should fulfill");
    };
    assert_eq!(receipt.order_number, 2);
    assert_eq!(receipt.invoice_number, "SO-0002");

    assert_eq!(harness.audit.events_of_type("fulfillment.completed").len(), 1);
    assert_eq!(harness.audit.events_of_type("fulfillment.already_fulfilled").len(), 1);
    assert_eq!(harness.notifier.sent_with_template(ORDER_CONFIRMATION).len(), 1);
}

async fn course_pricing_applies_rules_and_mva<S: CommerceStore>(store: S) {
    let harness = harness(store).await;

    let single = place(&harness, "person-ada", vec![track_item(OPEN_TRACK_ID)]).await;
    // 10 % early bird on 1 200 kr, then 25 % MVA.
    assert_eq!(single.pricing.discount_cents, 12_000);
    assert_eq!(single.pricing.mva_cents, 27_000);
    assert_eq!(single.pricing.total_cents, 135_000);
    assert_eq!(single.status, OrderStatus::Draft);

    let double = place(
        &harness,
        "person-bo",
        vec![track_item(CAPPED_TRACK_ID), track_item(OPEN_TRACK_ID)],
    )
    .await;
    // Early bird on the gross 2 700 kr, then 20 % off the remaining 2 430 kr.
    assert_eq!(double.pricing.subtotal_cents, 270_000);
    assert_eq!(double.pricing.discount_cents, 27_000 + 48_600);
    assert_eq!(double.pricing.total_cents, 243_000);
    let codes: Vec<&str> = double.applied_rules.iter().map(|rule| rule.code.as_str()).collect();
    assert_eq!(codes, vec!["EARLY", "MULTI"]);
}

async fn event_quantity_issues_distinct_tickets<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let order = place(&harness, "person-bo", vec![event_item(3)]).await;
    assert_eq!(order.pricing.total_cents, 75_000);

    let outcome = fulfill(&harness, &order).await;
    let FulfillmentOutcome::Fulfilled(receipt) = outcome else {
        panic!("event order should fulfill");
    };
    assert_eq!(receipt.event_tickets_issued, 3);

    let mut tx = harness.store.begin().await.expect("begin");
    let tickets = tx.event_tickets_for_order(&order.id).await.expect("tickets");
    let seqs: Vec<u32> = tickets.iter().map(|ticket| ticket.seq).collect();
    let tokens: BTreeSet<&str> = tickets.iter().map(|ticket| ticket.token.as_str()).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(tokens.len(), 3);
}

async fn one_ticket_per_period_and_conditional_revocation<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let first = place(&harness, "person-ada", vec![track_item(CAPPED_TRACK_ID)]).await;
    let second = place(&harness, "person-ada", vec![track_item(OPEN_TRACK_ID)]).await;

    fulfill(&harness, &first).await;
    let FulfillmentOutcome::Fulfilled(receipt) = fulfill(&harness, &second).await else {
        panic!("second order should fulfill");
    };
    assert_eq!(receipt.tickets_issued, 0, "the period ticket is shared");

    let period_id = CoursePeriodId(PERIOD_ID.to_string());
    let person_id = PersonId("person-ada".to_string());

    let reversal = harness
        .services
        .orders
        .refund(&staff(), &first.id, "moved away")
        .await
        .expect("refund first order");
    assert_eq!(reversal.registrations_cancelled, 1);
    assert_eq!(reversal.tickets_revoked, 0);
    {
        let mut tx = harness.store.begin().await.expect("begin");
        let ticket = tx.ticket_for(&period_id, &person_id).await.expect("load").expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Active);
    }

    let reversal = harness
        .services
        .orders
        .refund(&staff(), &second.id, "moved away")
        .await
        .expect("refund second order");
    assert_eq!(reversal.tickets_revoked, 1);
    let mut tx = harness.store.begin().await.expect("begin");
    let ticket = tx.ticket_for(&period_id, &person_id).await.expect("load").expect("ticket");
    assert_eq!(ticket.status, TicketStatus::Revoked);
}

async fn membership_tier_policy_decides_activation<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let standard =
        place(&harness, "person-ada", vec![membership_item(SELF_SERVICE_TIER_ID)]).await;
    let student = place(&harness, "person-bo", vec![membership_item(VALIDATED_TIER_ID)]).await;

    let FulfillmentOutcome::Fulfilled(receipt) = fulfill(&harness, &standard).await else {
        panic!("standard membership should fulfill");
    };
    assert_eq!(receipt.memberships_activated, 1);
    let FulfillmentOutcome::Fulfilled(receipt) = fulfill(&harness, &student).await else {
        panic!("student membership should fulfill");
    };
    assert_eq!(receipt.memberships_awaiting_validation, 1);

    let mut tx = harness.store.begin().await.expect("begin");
    let active = tx.memberships_for_order(&standard.id).await.expect("memberships");
    assert_eq!(active[0].status, MembershipStatus::Active);
    assert_eq!(active[0].membership_number, Some(1));
    let pending = tx.memberships_for_order(&student.id).await.expect("memberships");
    assert_ne!(pending[0].status, MembershipStatus::Active);
    assert_eq!(pending[0].membership_number, None);

    assert!(tx
        .has_active_membership(&organizer(), &PersonId("person-ada".to_string()), start())
        .await
        .expect("membership lookup"));
    assert!(!tx
        .has_active_membership(&organizer(), &PersonId("person-bo".to_string()), start())
        .await
        .expect("membership lookup"));
}

async fn waitlist_offer_accepted_before_deadline_survives_sweep<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    place(&harness, "person-ada", vec![track_item(CAPPED_TRACK_ID)]).await;
    place(&harness, "person-bo", vec![track_item(CAPPED_TRACK_ID)]).await;

    let outcome = harness
        .services
        .checkout
        .place_order(&dancer("person-cleo"), waitlisted_cart())
        .await
        .expect("checkout");
    assert!(outcome.order.is_none());
    let registration_id = outcome.waitlisted[0].registration_id.clone();

    let endless =
        harness.services.waitlist.promote(&staff(), &registration_id, Some(u32::MAX)).await;
    assert!(matches!(endless, Err(ApplicationError::Domain(_))));

    let entry = harness
        .services
        .waitlist
        .promote(&staff(), &registration_id, Some(24))
        .await
        .expect("promote");
    assert_eq!(entry.status, WaitlistStatus::Offered);
    assert_eq!(harness.notifier.sent_with_template(WAITLIST_OFFER).len(), 1);

    harness.clock.advance(Duration::hours(23));
    let order = harness
        .services
        .waitlist
        .accept(&dancer("person-cleo"), &registration_id)
        .await
        .expect("accept within deadline");
    assert_eq!(order.status, OrderStatus::Draft);

    harness.clock.advance(Duration::hours(2));
    let sweep = harness
        .services
        .waitlist
        .expire_offers(&Caller::system("expiry-sweep"))
        .await
        .expect("sweep");
    assert_eq!(sweep.count(), 0);

    let mut tx = harness.store.begin().await.expect("begin");
    let entry = tx.waitlist_entry(&registration_id).await.expect("load").expect("entry");
    assert_eq!(entry.status, WaitlistStatus::Accepted);
    let registration = tx.registration(&registration_id).await.expect("load").expect("reg");
    assert_eq!(registration.status, RegistrationStatus::Draft);
    assert_eq!(registration.order_id, Some(order.id));
}

async fn lapsed_waitlist_offer_cannot_be_accepted<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    place(&harness, "person-ada", vec![track_item(CAPPED_TRACK_ID)]).await;
    place(&harness, "person-bo", vec![track_item(CAPPED_TRACK_ID)]).await;
    let outcome = harness
        .services
        .checkout
        .place_order(&dancer("person-cleo"), waitlisted_cart())
        .await
        .expect("checkout");
    let registration_id = outcome.waitlisted[0].registration_id.clone();
    harness.services.waitlist.promote(&staff(), &registration_id, Some(24)).await.expect("promote");

    harness.clock.advance(Duration::hours(25));
    // The sweep has not run yet; the deadline alone blocks the accept.
    let early = harness.services.waitlist.accept(&dancer("person-cleo"), &registration_id).await;
    assert!(matches!(early, Err(ApplicationError::Domain(_))));

    let sweeper = Caller::system("expiry-sweep");
    let sweep = harness.services.waitlist.expire_offers(&sweeper).await.expect("sweep");
    assert_eq!(sweep.expired, vec![registration_id.clone()]);
    let again = harness.services.waitlist.expire_offers(&sweeper).await.expect("sweep");
    assert_eq!(again.count(), 0);

    let late = harness.services.waitlist.accept(&dancer("person-cleo"), &registration_id).await;
    assert!(matches!(late, Err(ApplicationError::Domain(_))));
    assert_eq!(harness.audit.events_of_type("waitlist.accept_rejected").len(), 2);
}

async fn offered_seat<S: CommerceStore>(harness: &Harness<S>) -> RegistrationId {
    place(harness, "person-ada", vec![track_item(CAPPED_TRACK_ID)]).await;
    place(harness, "person-bo", vec![track_item(CAPPED_TRACK_ID)]).await;
    let outcome = harness
        .services
        .checkout
        .place_order(&dancer("person-cleo"), waitlisted_cart())
        .await
        .expect("checkout");
    let registration_id = outcome.waitlisted[0].registration_id.clone();
    harness.services.waitlist.promote(&staff(), &registration_id, Some(24)).await.expect("promote");
    registration_id
}

/// Runs accept and the expiry sweep together and checks that exactly one of
/// them won. Returns the final entry status.
async fn race_accept_against_sweep<S: CommerceStore>(
    store: S,
    after_offer: Duration,
) -> WaitlistStatus {
    let harness = harness(store).await;
    let registration_id = offered_seat(&harness).await;
    harness.clock.advance(after_offer);

    let cleo = dancer("person-cleo");
    let sweeper = Caller::system("expiry-sweep");
    let (accepted, swept) = tokio::join!(
        harness.services.waitlist.accept(&cleo, &registration_id),
        harness.services.waitlist.expire_offers(&sweeper),
    );
    let swept = swept.expect("sweep");

    let mut tx = harness.store.begin().await.expect("begin");
    let entry = tx.waitlist_entry(&registration_id).await.expect("load").expect("entry");
    let registration = tx.registration(&registration_id).await.expect("load").expect("reg");
    match entry.status {
        WaitlistStatus::Accepted => {
            let order = accepted.expect("accepted offer has an order");
            assert!(swept.expired.is_empty());
            assert_eq!(registration.order_id, Some(order.id.clone()));
            assert!(tx.order(&order.id).await.expect("load").is_some());
        }
        WaitlistStatus::Expired => {
            assert!(accepted.is_err());
            assert_eq!(swept.expired, vec![registration_id.clone()]);
            assert_eq!(registration.order_id, None);
            assert_eq!(registration.status, RegistrationStatus::Waitlisted);
        }
        other => panic!("accept and sweep left the entry {other:?}"),
    }
    entry.status
}

async fn accept_racing_sweep_at_the_deadline_wins<S: CommerceStore>(store: S) {
    let status = race_accept_against_sweep(store, Duration::hours(24)).await;
    assert_eq!(status, WaitlistStatus::Accepted);
}

async fn sweep_racing_accept_past_the_deadline_wins<S: CommerceStore>(store: S) {
    let after_offer = Duration::hours(24) + Duration::seconds(1);
    let status = race_accept_against_sweep(store, after_offer).await;
    assert_eq!(status, WaitlistStatus::Expired);
}

async fn the_same_track_cannot_be_bought_twice<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let track_id = TrackId(OPEN_TRACK_ID.to_string());
    let ada = dancer("person-ada");

    let doubled = cart("person-ada", vec![track_item(OPEN_TRACK_ID), track_item(OPEN_TRACK_ID)]);
    let rejected = harness.services.checkout.place_order(&ada, doubled).await;
    assert!(matches!(rejected, Err(ApplicationError::Domain(_))));

    let draft = place(&harness, "person-ada", vec![track_item(OPEN_TRACK_ID)]).await;
    assert_eq!(draft.status, OrderStatus::Draft);
    let single = cart("person-ada", vec![track_item(OPEN_TRACK_ID)]);
    let again = harness.services.checkout.place_order(&ada, single.clone()).await;
    assert!(matches!(again, Err(ApplicationError::Conflict(_))));
    {
        let mut tx = harness.store.begin().await.expect("begin");
        assert_eq!(tx.occupied_seats(&track_id).await.expect("seats"), 1);
    }

    fulfill(&harness, &draft).await;
    let paid_again = harness.services.checkout.place_order(&ada, single.clone()).await;
    assert!(matches!(paid_again, Err(ApplicationError::Conflict(_))));

    harness.services.orders.refund(&staff(), &draft.id, "moved away").await.expect("refund");
    let outcome = harness.services.checkout.place_order(&ada, single).await.expect("rebuy");
    assert!(outcome.order.is_some());
    let mut tx = harness.store.begin().await.expect("begin");
    assert_eq!(tx.occupied_seats(&track_id).await.expect("seats"), 1);
}

async fn concurrent_fulfillments_get_distinct_order_numbers<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let mut orders = Vec::new();
    for person in ["person-ada", "person-bo", "person-cleo", "person-ada"] {
        orders.push(place(&harness, person, vec![event_item(1)]).await);
    }

    let (a, b, c, d) = tokio::join!(
        fulfill(&harness, &orders[0]),
        fulfill(&harness, &orders[1]),
        fulfill(&harness, &orders[2]),
        fulfill(&harness, &orders[3]),
    );
    let numbers: BTreeSet<u64> =
        [a, b, c, d].iter().filter_map(FulfillmentOutcome::order_number).collect();
    assert_eq!(numbers, BTreeSet::from([1, 2, 3, 4]));
}

async fn refund_issues_credit_note<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let order = place(&harness, "person-ada", vec![event_item(2)]).await;
    fulfill(&harness, &order).await;

    let denied = harness.services.orders.refund(&dancer("person-ada"), &order.id, "sick").await;
    assert!(matches!(denied, Err(ApplicationError::Unauthorized(_))));
    let blank = harness.services.orders.refund(&staff(), &order.id, "  ").await;
    assert!(matches!(blank, Err(ApplicationError::Domain(_))));

    let reversal =
        harness.services.orders.refund(&staff(), &order.id, "sick").await.expect("refund");
    assert_eq!(reversal.order.status, OrderStatus::Refunded);
    assert_eq!(reversal.credit_note_number.as_deref(), Some("CN-0001"));
    assert_eq!(reversal.event_tickets_revoked, 2);

    let mut tx = harness.store.begin().await.expect("begin");
    let invoice = tx.invoice_for_order(&order.id).await.expect("load").expect("invoice");
    assert_eq!(invoice.status, InvoiceStatus::Credited);
    let notes = tx.credit_notes_for_order(&order.id).await.expect("credit notes");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].amount_cents, order.pricing.total_cents);
    assert_eq!(notes[0].reason, "sick");
    drop(tx);

    let twice = harness.services.orders.refund(&staff(), &order.id, "again").await;
    assert!(matches!(twice, Err(ApplicationError::Domain(_))));
}

async fn purchaser_may_cancel_own_unpaid_order<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let order = place(&harness, "person-ada", vec![track_item(CAPPED_TRACK_ID)]).await;

    let foreign = harness.services.orders.cancel(&dancer("person-bo"), &order.id, "mine").await;
    assert!(matches!(foreign, Err(ApplicationError::Unauthorized(_))));

    let reversal = harness
        .services
        .orders
        .cancel(&dancer("person-ada"), &order.id, "changed my mind")
        .await
        .expect("cancel");
    assert_eq!(reversal.order.status, OrderStatus::Cancelled);
    assert_eq!(reversal.credit_note_number, None);
    assert_eq!(reversal.registrations_cancelled, 1);

    let mut tx = harness.store.begin().await.expect("begin");
    let seats = tx.occupied_seats(&TrackId(CAPPED_TRACK_ID.to_string())).await.expect("seats");
    assert_eq!(seats, 0);
}

async fn priced_order_keeps_its_snapshot<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let order = place(&harness, "person-ada", vec![track_item(OPEN_TRACK_ID)]).await;

    harness
        .services
        .rules
        .set_enabled(&staff(), &DiscountRuleId("rule-early-bird".to_string()), false)
        .await
        .expect("disable early bird");
    harness.clock.advance(Duration::days(20));
    fulfill(&harness, &order).await;

    let stored = harness.services.orders.get(&dancer("person-ada"), &order.id).await.expect("get");
    assert_eq!(stored.pricing, order.pricing);
    assert_eq!(stored.applied_rules, order.applied_rules);

    let mut tx = harness.store.begin().await.expect("begin");
    let invoice = tx.invoice_for_order(&order.id).await.expect("load").expect("invoice");
    assert_eq!(invoice.total_cents, order.pricing.total_cents);
    assert_eq!(invoice.discount_cents, 12_000);
}

async fn zero_total_order_is_fulfilled_at_checkout<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    harness
        .services
        .rules
        .upsert(
            &staff(),
            DiscountRule {
                id: DiscountRuleId("rule-scholarship".to_string()),
                period_id: CoursePeriodId(PERIOD_ID.to_string()),
                code: "SCHOLAR".to_string(),
                name: "Scholarship".to_string(),
                priority: 0,
                enabled: true,
                kind: RuleKind::FixedAmountOff { amount_cents: 1_000_000 },
                created_at: start(),
            },
        )
        .await
        .expect("save scholarship rule");

    let order = place(&harness, "person-cleo", vec![track_item(OPEN_TRACK_ID)]).await;
    assert_eq!(order.pricing.total_cents, 0);
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.provider_ref.as_deref(), Some("free"));
    assert!(order.order_number.is_some());

    let mut tx = harness.store.begin().await.expect("begin");
    let ticket = tx
        .ticket_for(&CoursePeriodId(PERIOD_ID.to_string()), &PersonId("person-cleo".to_string()))
        .await
        .expect("load");
    assert!(ticket.is_some());
}

async fn rule_changes_need_organizer_access<S: CommerceStore>(store: S) {
    let harness = harness(store).await;
    let period_id = CoursePeriodId(PERIOD_ID.to_string());

    let denied = harness.services.rules.list(&dancer("person-ada"), &period_id).await;
    assert!(matches!(denied, Err(ApplicationError::Unauthorized(_))));

    let invalid = harness
        .services
        .rules
        .upsert(
            &staff(),
            DiscountRule {
                id: DiscountRuleId("rule-bad".to_string()),
                period_id: period_id.clone(),
                code: "BAD".to_string(),
                name: "Too generous".to_string(),
                priority: 5,
                enabled: true,
                kind: RuleKind::PercentageOff { percent: Decimal::new(150, 0) },
                created_at: start(),
            },
        )
        .await;
    assert!(matches!(invalid, Err(ApplicationError::Domain(_))));

    let rules = harness.services.rules.list(&staff(), &period_id).await.expect("list");
    assert_eq!(rules.len(), 3);
}

macro_rules! against_both_stores {
    ($($scenario:ident),* $(,)?) => {
        mod memory {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::memory_store().await).await;
                }
            )*
        }

        mod sqlite {
            $(
                #[tokio::test]
                async fn $scenario() {
                    super::$scenario(super::sqlite_store().await).await;
                }
            )*
        }
    };
}

against_both_stores!(
    fulfillment_is_idempotent,
    course_pricing_applies_rules_and_mva,
    event_quantity_issues_distinct_tickets,
    one_ticket_per_period_and_conditional_revocation,
    membership_tier_policy_decides_activation,
    waitlist_offer_accepted_before_deadline_survives_sweep,
    lapsed_waitlist_offer_cannot_be_accepted,
    accept_racing_sweep_at_the_deadline_wins,
    sweep_racing_accept_past_the_deadline_wins,
    the_same_track_cannot_be_bought_twice,
    concurrent_fulfillments_get_distinct_order_numbers,
    refund_issues_credit_note,
    purchaser_may_cancel_own_unpaid_order,
    priced_order_keeps_its_snapshot,
    zero_total_order_is_fulfilled_at_checkout,
    rule_changes_need_organizer_access,
);
