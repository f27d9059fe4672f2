use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use enrolla_core::domain::billing::{
    CreditNote, CreditNoteId, Invoice, InvoiceId, InvoiceStatus, Payment, PaymentId,
};
use enrolla_core::domain::catalog::{
    CoursePeriod, CoursePeriodId, DanceRole, Event, EventId, MembershipTier, MembershipTierId,
    PriceBasis, Track, TrackId, TrackPricing,
};
use enrolla_core::domain::discount::{DiscountRule, DiscountRuleId, RuleKind};
use enrolla_core::domain::order::{Order, OrderId, OrderStatus, OrderType};
use enrolla_core::domain::organizer::{Organizer, OrganizerId, Person, PersonId, SequenceKind};
use enrolla_core::domain::registration::{
    EventRegistration, EventRegistrationId, Membership, MembershipId, MembershipStatus,
    Registration, RegistrationId, RegistrationStatus,
};
use enrolla_core::domain::ticket::{EventTicket, EventTicketId, Ticket, TicketId, TicketStatus};
use enrolla_core::domain::waitlist::{WaitlistEntry, WaitlistStatus};
use enrolla_core::errors::ApplicationError;
use enrolla_core::pricing::{PricingSnapshot, RuleApplication};
use enrolla_core::store::{CommerceStore, CommerceTx, StoreResult};

use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed store. Every transaction touches `commerce_lock` first, so
/// it holds the database write lock from its first statement until commit or
/// rollback; concurrent writers queue on `busy_timeout`.
#[derive(Clone)]
pub struct SqlCommerceStore {
    pool: DbPool,
}

impl SqlCommerceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub struct SqlCommerceTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl CommerceStore for SqlCommerceStore {
    type Tx = SqlCommerceTx;

    async fn begin(&self) -> StoreResult<SqlCommerceTx> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("UPDATE commerce_lock SET touched_at = ? WHERE id = 1")
            .bind(encode_ts(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(SqlCommerceTx { tx })
    }
}

fn db_error(error: sqlx::Error) -> ApplicationError {
    RepositoryError::Database(error).into()
}

/// Fixed-width UTC timestamps, so text comparison in SQL matches time order.
fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn encode_u64(value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("value {value} exceeds i64 storage")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn parse_ts(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{name} `{raw}`: {error}")))
}

fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_ts(name, &raw)
}

fn opt_timestamp(row: &SqliteRow, name: &str) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|raw| parse_ts(name, &raw)).transpose()
}

fn small_count(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, name)?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name} `{raw}` out of range")))
}

fn opt_number(row: &SqliteRow, name: &str) -> Result<Option<u64>, RepositoryError> {
    let raw: Option<i64> = column(row, name)?;
    raw.map(|raw| {
        u64::try_from(raw)
            .map_err(|_| RepositoryError::Decode(format!("{name} `{raw}` is negative")))
    })
    .transpose()
}

fn number(row: &SqliteRow, name: &str) -> Result<u64, RepositoryError> {
    opt_number(row, name)?.ok_or_else(|| RepositoryError::Decode(format!("{name} is null")))
}

fn decimal(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

fn parsed<T>(
    row: &SqliteRow,
    name: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    let raw: String = column(row, name)?;
    parse(&raw).ok_or_else(|| RepositoryError::Decode(format!("unknown {name} `{raw}`")))
}

const ORGANIZER_SELECT: &str =
    "SELECT id, name, vat_registered, mva_rate, invoice_prefix FROM organizer";
const PERSON_SELECT: &str = "SELECT id, name, email FROM person";
const PERIOD_SELECT: &str =
    "SELECT id, organizer_id, name, starts_at, ends_at FROM course_period";
const TRACK_SELECT: &str =
    "SELECT id, period_id, name, price_cents, pair_price_cents, capacity FROM course_track";
const EVENT_SELECT: &str = "SELECT id, organizer_id, name, price_cents, starts_at FROM event";
const TIER_SELECT: &str = "SELECT id, organizer_id, name, price_cents, requires_manual_validation,
            validity_days
     FROM membership_tier";
const RULE_SELECT: &str =
    "SELECT id, period_id, code, name, priority, enabled, rule_type, config_json, created_at
     FROM discount_rule";
const ORDER_SELECT: &str = "SELECT id, organizer_id, purchaser_id, order_type, status,
            subtotal_cents, discount_cents, subtotal_after_discount_cents, mva_rate,
            mva_cents, total_cents, applied_rules_json, order_number, provider_ref,
            created_at, updated_at, paid_at
     FROM customer_order";
const REGISTRATION_SELECT: &str = "SELECT id, order_id, organizer_id, period_id, track_id,
            person_id, role, with_partner, price_basis, status, created_at, updated_at
     FROM registration";
const WAITLIST_SELECT: &str = "SELECT registration_id, track_id, status, joined_at, offered_at,
            offered_until, offer_count, updated_at
     FROM waitlist_entry";
const EVENT_REGISTRATION_SELECT: &str = "SELECT id, order_id, event_id, person_id, quantity,
            status, created_at, updated_at
     FROM event_registration";
const MEMBERSHIP_SELECT: &str = "SELECT id, order_id, organizer_id, tier_id, person_id, status,
            membership_number, valid_from, valid_until, created_at, updated_at
     FROM membership";
const TICKET_SELECT: &str =
    "SELECT id, organizer_id, period_id, person_id, order_id, token, status, issued_at
     FROM ticket";
const EVENT_TICKET_SELECT: &str = "SELECT id, event_registration_id, order_id, event_id,
            person_id, seq, token, status, issued_at
     FROM event_ticket";
const PAYMENT_SELECT: &str =
    "SELECT id, order_id, provider_ref, amount_cents, received_at FROM payment";
const INVOICE_SELECT: &str = "SELECT id, organizer_id, order_id, invoice_number, sequence, status,
            subtotal_cents, discount_cents, mva_cents, total_cents, issued_at, updated_at
     FROM invoice";
const CREDIT_NOTE_SELECT: &str = "SELECT id, organizer_id, invoice_id, order_id,
            credit_note_number, sequence, amount_cents, reason, issued_at
     FROM credit_note";

fn row_to_organizer(row: &SqliteRow) -> Result<Organizer, RepositoryError> {
    Ok(Organizer {
        id: OrganizerId(column(row, "id")?),
        name: column(row, "name")?,
        vat_registered: column(row, "vat_registered")?,
        mva_rate: decimal(row, "mva_rate")?,
        invoice_prefix: column(row, "invoice_prefix")?,
    })
}

fn row_to_person(row: &SqliteRow) -> Result<Person, RepositoryError> {
    Ok(Person {
        id: PersonId(column(row, "id")?),
        name: column(row, "name")?,
        email: column(row, "email")?,
    })
}

fn row_to_period(row: &SqliteRow) -> Result<CoursePeriod, RepositoryError> {
    Ok(CoursePeriod {
        id: CoursePeriodId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        name: column(row, "name")?,
        starts_at: timestamp(row, "starts_at")?,
        ends_at: timestamp(row, "ends_at")?,
    })
}

fn row_to_track(row: &SqliteRow) -> Result<Track, RepositoryError> {
    let capacity: Option<i64> = column(row, "capacity")?;
    let capacity = capacity
        .map(|raw| {
            u32::try_from(raw)
                .map_err(|_| RepositoryError::Decode(format!("capacity `{raw}` out of range")))
        })
        .transpose()?;
    Ok(Track {
        id: TrackId(column(row, "id")?),
        period_id: CoursePeriodId(column(row, "period_id")?),
        name: column(row, "name")?,
        pricing: TrackPricing {
            price_cents: column(row, "price_cents")?,
            pair_price_cents: column(row, "pair_price_cents")?,
        },
        capacity,
    })
}

fn row_to_event(row: &SqliteRow) -> Result<Event, RepositoryError> {
    Ok(Event {
        id: EventId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        name: column(row, "name")?,
        price_cents: column(row, "price_cents")?,
        starts_at: timestamp(row, "starts_at")?,
    })
}

fn row_to_tier(row: &SqliteRow) -> Result<MembershipTier, RepositoryError> {
    Ok(MembershipTier {
        id: MembershipTierId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        name: column(row, "name")?,
        price_cents: column(row, "price_cents")?,
        requires_manual_validation: column(row, "requires_manual_validation")?,
        validity_days: small_count(row, "validity_days")?,
    })
}

fn row_to_rule(row: &SqliteRow) -> Result<DiscountRule, RepositoryError> {
    let id: String = column(row, "id")?;
    let rule_type: String = column(row, "rule_type")?;
    let config_json: String = column(row, "config_json")?;
    let config = serde_json::from_str(&config_json)
        .map_err(|error| RepositoryError::Decode(format!("rule `{id}` config: {error}")))?;
    let kind = RuleKind::from_legacy(&rule_type, &config)
        .map_err(|error| RepositoryError::Decode(format!("rule `{id}`: {error}")))?;
    Ok(DiscountRule {
        id: DiscountRuleId(id),
        period_id: CoursePeriodId(column(row, "period_id")?),
        code: column(row, "code")?,
        name: column(row, "name")?,
        priority: column(row, "priority")?,
        enabled: column(row, "enabled")?,
        kind,
        created_at: timestamp(row, "created_at")?,
    })
}

fn row_to_order(row: &SqliteRow) -> Result<Order, RepositoryError> {
    let applied_rules_json: String = column(row, "applied_rules_json")?;
    let applied_rules: Vec<RuleApplication> = serde_json::from_str(&applied_rules_json)
        .map_err(|error| RepositoryError::Decode(format!("applied_rules_json: {error}")))?;
    let pricing = PricingSnapshot {
        subtotal_cents: column(row, "subtotal_cents")?,
        discount_cents: column(row, "discount_cents")?,
        subtotal_after_discount_cents: column(row, "subtotal_after_discount_cents")?,
        mva_rate: decimal(row, "mva_rate")?,
        mva_cents: column(row, "mva_cents")?,
        total_cents: column(row, "total_cents")?,
    };
    pricing.verify().map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Order {
        id: OrderId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        purchaser_id: PersonId(column(row, "purchaser_id")?),
        order_type: parsed(row, "order_type", OrderType::parse)?,
        status: parsed(row, "status", OrderStatus::parse)?,
        pricing,
        applied_rules,
        order_number: opt_number(row, "order_number")?,
        provider_ref: column(row, "provider_ref")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
        paid_at: opt_timestamp(row, "paid_at")?,
    })
}

fn row_to_registration(row: &SqliteRow) -> Result<Registration, RepositoryError> {
    let order_id: Option<String> = column(row, "order_id")?;
    Ok(Registration {
        id: RegistrationId(column(row, "id")?),
        order_id: order_id.map(OrderId),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        period_id: CoursePeriodId(column(row, "period_id")?),
        track_id: TrackId(column(row, "track_id")?),
        person_id: PersonId(column(row, "person_id")?),
        role: parsed(row, "role", DanceRole::parse)?,
        with_partner: column(row, "with_partner")?,
        price_basis: parsed(row, "price_basis", PriceBasis::parse)?,
        status: parsed(row, "status", RegistrationStatus::parse)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_waitlist_entry(row: &SqliteRow) -> Result<WaitlistEntry, RepositoryError> {
    Ok(WaitlistEntry {
        registration_id: RegistrationId(column(row, "registration_id")?),
        track_id: TrackId(column(row, "track_id")?),
        status: parsed(row, "status", WaitlistStatus::parse)?,
        joined_at: timestamp(row, "joined_at")?,
        offered_at: opt_timestamp(row, "offered_at")?,
        offered_until: opt_timestamp(row, "offered_until")?,
        offer_count: small_count(row, "offer_count")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_event_registration(row: &SqliteRow) -> Result<EventRegistration, RepositoryError> {
    Ok(EventRegistration {
        id: EventRegistrationId(column(row, "id")?),
        order_id: OrderId(column(row, "order_id")?),
        event_id: EventId(column(row, "event_id")?),
        person_id: PersonId(column(row, "person_id")?),
        quantity: small_count(row, "quantity")?,
        status: parsed(row, "status", RegistrationStatus::parse)?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_membership(row: &SqliteRow) -> Result<Membership, RepositoryError> {
    Ok(Membership {
        id: MembershipId(column(row, "id")?),
        order_id: OrderId(column(row, "order_id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        tier_id: MembershipTierId(column(row, "tier_id")?),
        person_id: PersonId(column(row, "person_id")?),
        status: parsed(row, "status", MembershipStatus::parse)?,
        membership_number: opt_number(row, "membership_number")?,
        valid_from: opt_timestamp(row, "valid_from")?,
        valid_until: opt_timestamp(row, "valid_until")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_ticket(row: &SqliteRow) -> Result<Ticket, RepositoryError> {
    Ok(Ticket {
        id: TicketId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        period_id: CoursePeriodId(column(row, "period_id")?),
        person_id: PersonId(column(row, "person_id")?),
        order_id: OrderId(column(row, "order_id")?),
        token: column(row, "token")?,
        status: parsed(row, "status", TicketStatus::parse)?,
        issued_at: timestamp(row, "issued_at")?,
    })
}

fn row_to_event_ticket(row: &SqliteRow) -> Result<EventTicket, RepositoryError> {
    Ok(EventTicket {
        id: EventTicketId(column(row, "id")?),
        event_registration_id: EventRegistrationId(column(row, "event_registration_id")?),
        order_id: OrderId(column(row, "order_id")?),
        event_id: EventId(column(row, "event_id")?),
        person_id: PersonId(column(row, "person_id")?),
        seq: small_count(row, "seq")?,
        token: column(row, "token")?,
        status: parsed(row, "status", TicketStatus::parse)?,
        issued_at: timestamp(row, "issued_at")?,
    })
}

fn row_to_payment(row: &SqliteRow) -> Result<Payment, RepositoryError> {
    Ok(Payment {
        id: PaymentId(column(row, "id")?),
        order_id: OrderId(column(row, "order_id")?),
        provider_ref: column(row, "provider_ref")?,
        amount_cents: column(row, "amount_cents")?,
        received_at: timestamp(row, "received_at")?,
    })
}

fn row_to_invoice(row: &SqliteRow) -> Result<Invoice, RepositoryError> {
    Ok(Invoice {
        id: InvoiceId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        order_id: OrderId(column(row, "order_id")?),
        invoice_number: column(row, "invoice_number")?,
        sequence: number(row, "sequence")?,
        status: parsed(row, "status", InvoiceStatus::parse)?,
        subtotal_cents: column(row, "subtotal_cents")?,
        discount_cents: column(row, "discount_cents")?,
        mva_cents: column(row, "mva_cents")?,
        total_cents: column(row, "total_cents")?,
        issued_at: timestamp(row, "issued_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_credit_note(row: &SqliteRow) -> Result<CreditNote, RepositoryError> {
    Ok(CreditNote {
        id: CreditNoteId(column(row, "id")?),
        organizer_id: OrganizerId(column(row, "organizer_id")?),
        invoice_id: InvoiceId(column(row, "invoice_id")?),
        order_id: OrderId(column(row, "order_id")?),
        credit_note_number: column(row, "credit_note_number")?,
        sequence: number(row, "sequence")?,
        amount_cents: column(row, "amount_cents")?,
        reason: column(row, "reason")?,
        issued_at: timestamp(row, "issued_at")?,
    })
}

impl SqlCommerceTx {
    async fn fetch_by_id<T>(
        &mut self,
        select: &str,
        id: &str,
        decode: fn(&SqliteRow) -> Result<T, RepositoryError>,
    ) -> StoreResult<Option<T>> {
        let sql = format!("{select} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(row.as_ref().map(decode).transpose()?)
    }

    async fn fetch_by_order<T>(
        &mut self,
        select: &str,
        order_id: &OrderId,
        order_by: &str,
        decode: fn(&SqliteRow) -> Result<T, RepositoryError>,
    ) -> StoreResult<Vec<T>> {
        let sql = format!("{select} WHERE order_id = ? ORDER BY {order_by}");
        let rows = sqlx::query(&sql)
            .bind(&order_id.0)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl CommerceTx for SqlCommerceTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn organizer(&mut self, id: &OrganizerId) -> StoreResult<Option<Organizer>> {
        self.fetch_by_id(ORGANIZER_SELECT, &id.0, row_to_organizer).await
    }

    async fn save_organizer(&mut self, organizer: &Organizer) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO organizer (id, name, vat_registered, mva_rate, invoice_prefix)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 vat_registered = excluded.vat_registered,
                 mva_rate = excluded.mva_rate,
                 invoice_prefix = excluded.invoice_prefix",
        )
        .bind(&organizer.id.0)
        .bind(&organizer.name)
        .bind(organizer.vat_registered)
        .bind(organizer.mva_rate.to_string())
        .bind(&organizer.invoice_prefix)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn person(&mut self, id: &PersonId) -> StoreResult<Option<Person>> {
        self.fetch_by_id(PERSON_SELECT, &id.0, row_to_person).await
    }

    async fn save_person(&mut self, person: &Person) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO person (id, name, email) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email",
        )
        .bind(&person.id.0)
        .bind(&person.name)
        .bind(&person.email)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn course_period(&mut self, id: &CoursePeriodId) -> StoreResult<Option<CoursePeriod>> {
        self.fetch_by_id(PERIOD_SELECT, &id.0, row_to_period).await
    }

    async fn save_course_period(&mut self, period: &CoursePeriod) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO course_period (id, organizer_id, name, starts_at, ends_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 starts_at = excluded.starts_at,
                 ends_at = excluded.ends_at",
        )
        .bind(&period.id.0)
        .bind(&period.organizer_id.0)
        .bind(&period.name)
        .bind(encode_ts(period.starts_at))
        .bind(encode_ts(period.ends_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn track(&mut self, id: &TrackId) -> StoreResult<Option<Track>> {
        self.fetch_by_id(TRACK_SELECT, &id.0, row_to_track).await
    }

    async fn save_track(&mut self, track: &Track) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO course_track (id, period_id, name, price_cents, pair_price_cents, capacity)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 price_cents = excluded.price_cents,
                 pair_price_cents = excluded.pair_price_cents,
                 capacity = excluded.capacity",
        )
        .bind(&track.id.0)
        .bind(&track.period_id.0)
        .bind(&track.name)
        .bind(track.pricing.price_cents)
        .bind(track.pricing.pair_price_cents)
        .bind(track.capacity.map(i64::from))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn event(&mut self, id: &EventId) -> StoreResult<Option<Event>> {
        self.fetch_by_id(EVENT_SELECT, &id.0, row_to_event).await
    }

    async fn save_event(&mut self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event (id, organizer_id, name, price_cents, starts_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 price_cents = excluded.price_cents,
                 starts_at = excluded.starts_at",
        )
        .bind(&event.id.0)
        .bind(&event.organizer_id.0)
        .bind(&event.name)
        .bind(event.price_cents)
        .bind(encode_ts(event.starts_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn membership_tier(
        &mut self,
        id: &MembershipTierId,
    ) -> StoreResult<Option<MembershipTier>> {
        self.fetch_by_id(TIER_SELECT, &id.0, row_to_tier).await
    }

    async fn save_membership_tier(&mut self, tier: &MembershipTier) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO membership_tier (id, organizer_id, name, price_cents,
                                          requires_manual_validation, validity_days)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 price_cents = excluded.price_cents,
                 requires_manual_validation = excluded.requires_manual_validation,
                 validity_days = excluded.validity_days",
        )
        .bind(&tier.id.0)
        .bind(&tier.organizer_id.0)
        .bind(&tier.name)
        .bind(tier.price_cents)
        .bind(tier.requires_manual_validation)
        .bind(i64::from(tier.validity_days))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn discount_rule(&mut self, id: &DiscountRuleId) -> StoreResult<Option<DiscountRule>> {
        self.fetch_by_id(RULE_SELECT, &id.0, row_to_rule).await
    }

    async fn discount_rules_for_period(
        &mut self,
        period_id: &CoursePeriodId,
    ) -> StoreResult<Vec<DiscountRule>> {
        let sql = format!("{RULE_SELECT} WHERE period_id = ? ORDER BY created_at ASC, rowid ASC");
        let rows = sqlx::query(&sql)
            .bind(&period_id.0)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(row_to_rule).collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_discount_rule(&mut self, rule: &DiscountRule) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO discount_rule (id, period_id, code, name, priority, enabled, rule_type,
                                        config_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 name = excluded.name,
                 priority = excluded.priority,
                 enabled = excluded.enabled,
                 rule_type = excluded.rule_type,
                 config_json = excluded.config_json",
        )
        .bind(&rule.id.0)
        .bind(&rule.period_id.0)
        .bind(&rule.code)
        .bind(&rule.name)
        .bind(rule.priority)
        .bind(rule.enabled)
        .bind(rule.kind.rule_type())
        .bind(rule.kind.config_json().to_string())
        .bind(encode_ts(rule.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn next_sequence(
        &mut self,
        organizer_id: &OrganizerId,
        kind: SequenceKind,
    ) -> StoreResult<u64> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO organizer_sequence (organizer_id, sequence, last_value)
             VALUES (?, ?, 1)
             ON CONFLICT(organizer_id, sequence) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
        )
        .bind(&organizer_id.0)
        .bind(kind.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        u64::try_from(value).map_err(|_| {
            RepositoryError::Decode(format!("sequence {} went negative", kind.as_str())).into()
        })
    }

    async fn order(&mut self, id: &OrderId) -> StoreResult<Option<Order>> {
        self.fetch_by_id(ORDER_SELECT, &id.0, row_to_order).await
    }

    async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        let applied_rules_json = serde_json::to_string(&order.applied_rules)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let order_number = order.order_number.map(encode_u64).transpose()?;
        sqlx::query(
            "INSERT INTO customer_order (id, organizer_id, purchaser_id, order_type, status,
                                         subtotal_cents, discount_cents,
                                         subtotal_after_discount_cents, mva_rate, mva_cents,
                                         total_cents, applied_rules_json, order_number,
                                         provider_ref, created_at, updated_at, paid_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 order_number = excluded.order_number,
                 provider_ref = excluded.provider_ref,
                 updated_at = excluded.updated_at,
                 paid_at = excluded.paid_at",
        )
        .bind(&order.id.0)
        .bind(&order.organizer_id.0)
        .bind(&order.purchaser_id.0)
        .bind(order.order_type.as_str())
        .bind(order.status.as_str())
        .bind(order.pricing.subtotal_cents)
        .bind(order.pricing.discount_cents)
        .bind(order.pricing.subtotal_after_discount_cents)
        .bind(order.pricing.mva_rate.to_string())
        .bind(order.pricing.mva_cents)
        .bind(order.pricing.total_cents)
        .bind(applied_rules_json)
        .bind(order_number)
        .bind(&order.provider_ref)
        .bind(encode_ts(order.created_at))
        .bind(encode_ts(order.updated_at))
        .bind(order.paid_at.map(encode_ts))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn registration(&mut self, id: &RegistrationId) -> StoreResult<Option<Registration>> {
        self.fetch_by_id(REGISTRATION_SELECT, &id.0, row_to_registration).await
    }

    async fn registrations_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<Registration>> {
        self.fetch_by_order(REGISTRATION_SELECT, order_id, "created_at, rowid", row_to_registration)
            .await
    }

    async fn active_registrations_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Vec<Registration>> {
        let sql = format!(
            "{REGISTRATION_SELECT} WHERE period_id = ? AND person_id = ? AND status = ?
             ORDER BY created_at, rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(&period_id.0)
            .bind(&person_id.0)
            .bind(RegistrationStatus::Active.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(row_to_registration).collect::<Result<Vec<_>, _>>()?)
    }

    async fn registrations_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Vec<Registration>> {
        let sql = format!(
            "{REGISTRATION_SELECT} WHERE period_id = ? AND person_id = ?
             ORDER BY created_at, rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(&period_id.0)
            .bind(&person_id.0)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(row_to_registration).collect::<Result<Vec<_>, _>>()?)
    }

    async fn occupied_seats(&mut self, track_id: &TrackId) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registration WHERE track_id = ? AND status IN (?, ?)",
        )
        .bind(&track_id.0)
        .bind(RegistrationStatus::Draft.as_str())
        .bind(RegistrationStatus::Active.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn save_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO registration (id, order_id, organizer_id, period_id, track_id, person_id,
                                       role, with_partner, price_basis, status, created_at,
                                       updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 order_id = excluded.order_id,
                 role = excluded.role,
                 with_partner = excluded.with_partner,
                 price_basis = excluded.price_basis,
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(&registration.id.0)
        .bind(registration.order_id.as_ref().map(|id| id.0.as_str()))
        .bind(&registration.organizer_id.0)
        .bind(&registration.period_id.0)
        .bind(&registration.track_id.0)
        .bind(&registration.person_id.0)
        .bind(registration.role.as_str())
        .bind(registration.with_partner)
        .bind(registration.price_basis.as_str())
        .bind(registration.status.as_str())
        .bind(encode_ts(registration.created_at))
        .bind(encode_ts(registration.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn waitlist_entry(
        &mut self,
        registration_id: &RegistrationId,
    ) -> StoreResult<Option<WaitlistEntry>> {
        let sql = format!("{WAITLIST_SELECT} WHERE registration_id = ?");
        let row = sqlx::query(&sql)
            .bind(&registration_id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(row.as_ref().map(row_to_waitlist_entry).transpose()?)
    }

    async fn lapsed_offers(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<WaitlistEntry>> {
        let sql = format!(
            "{WAITLIST_SELECT} WHERE status = ? AND offered_until IS NOT NULL AND offered_until < ?
             ORDER BY offered_until, registration_id"
        );
        let rows = sqlx::query(&sql)
            .bind(WaitlistStatus::Offered.as_str())
            .bind(encode_ts(now))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(row_to_waitlist_entry).collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_waitlist_entry(&mut self, entry: &WaitlistEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO waitlist_entry (registration_id, track_id, status, joined_at, offered_at,
                                         offered_until, offer_count, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(registration_id) DO UPDATE SET
                 status = excluded.status,
                 offered_at = excluded.offered_at,
                 offered_until = excluded.offered_until,
                 offer_count = excluded.offer_count,
                 updated_at = excluded.updated_at",
        )
        .bind(&entry.registration_id.0)
        .bind(&entry.track_id.0)
        .bind(entry.status.as_str())
        .bind(encode_ts(entry.joined_at))
        .bind(entry.offered_at.map(encode_ts))
        .bind(entry.offered_until.map(encode_ts))
        .bind(i64::from(entry.offer_count))
        .bind(encode_ts(entry.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn event_registrations_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<EventRegistration>> {
        self.fetch_by_order(
            EVENT_REGISTRATION_SELECT,
            order_id,
            "created_at, rowid",
            row_to_event_registration,
        )
        .await
    }

    async fn save_event_registration(
        &mut self,
        registration: &EventRegistration,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_registration (id, order_id, event_id, person_id, quantity, status,
                                             created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(&registration.id.0)
        .bind(&registration.order_id.0)
        .bind(&registration.event_id.0)
        .bind(&registration.person_id.0)
        .bind(i64::from(registration.quantity))
        .bind(registration.status.as_str())
        .bind(encode_ts(registration.created_at))
        .bind(encode_ts(registration.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn event_tickets_for_order(
        &mut self,
        order_id: &OrderId,
    ) -> StoreResult<Vec<EventTicket>> {
        self.fetch_by_order(
            EVENT_TICKET_SELECT,
            order_id,
            "event_registration_id, seq",
            row_to_event_ticket,
        )
        .await
    }

    async fn save_event_ticket(&mut self, ticket: &EventTicket) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_ticket (id, event_registration_id, order_id, event_id, person_id,
                                       seq, token, status, issued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status",
        )
        .bind(&ticket.id.0)
        .bind(&ticket.event_registration_id.0)
        .bind(&ticket.order_id.0)
        .bind(&ticket.event_id.0)
        .bind(&ticket.person_id.0)
        .bind(i64::from(ticket.seq))
        .bind(&ticket.token)
        .bind(ticket.status.as_str())
        .bind(encode_ts(ticket.issued_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn memberships_for_order(&mut self, order_id: &OrderId) -> StoreResult<Vec<Membership>> {
        self.fetch_by_order(MEMBERSHIP_SELECT, order_id, "created_at, rowid", row_to_membership)
            .await
    }

    async fn has_active_membership(
        &mut self,
        organizer_id: &OrganizerId,
        person_id: &PersonId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql =
            format!("{MEMBERSHIP_SELECT} WHERE organizer_id = ? AND person_id = ? AND status = ?");
        let rows = sqlx::query(&sql)
            .bind(&organizer_id.0)
            .bind(&person_id.0)
            .bind(MembershipStatus::Active.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        for row in &rows {
            if row_to_membership(row)?.is_active_at(now) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        let membership_number = membership.membership_number.map(encode_u64).transpose()?;
        sqlx::query(
            "INSERT INTO membership (id, order_id, organizer_id, tier_id, person_id, status,
                                     membership_number, valid_from, valid_until, created_at,
                                     updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 membership_number = excluded.membership_number,
                 valid_from = excluded.valid_from,
                 valid_until = excluded.valid_until,
                 updated_at = excluded.updated_at",
        )
        .bind(&membership.id.0)
        .bind(&membership.order_id.0)
        .bind(&membership.organizer_id.0)
        .bind(&membership.tier_id.0)
        .bind(&membership.person_id.0)
        .bind(membership.status.as_str())
        .bind(membership_number)
        .bind(membership.valid_from.map(encode_ts))
        .bind(membership.valid_until.map(encode_ts))
        .bind(encode_ts(membership.created_at))
        .bind(encode_ts(membership.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn ticket_for(
        &mut self,
        period_id: &CoursePeriodId,
        person_id: &PersonId,
    ) -> StoreResult<Option<Ticket>> {
        let sql = format!("{TICKET_SELECT} WHERE period_id = ? AND person_id = ?");
        let row = sqlx::query(&sql)
            .bind(&period_id.0)
            .bind(&person_id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(row.as_ref().map(row_to_ticket).transpose()?)
    }

    async fn save_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO ticket (id, organizer_id, period_id, person_id, order_id, token, status,
                                 issued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 order_id = excluded.order_id,
                 status = excluded.status",
        )
        .bind(&ticket.id.0)
        .bind(&ticket.organizer_id.0)
        .bind(&ticket.period_id.0)
        .bind(&ticket.person_id.0)
        .bind(&ticket.order_id.0)
        .bind(&ticket.token)
        .bind(ticket.status.as_str())
        .bind(encode_ts(ticket.issued_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn payment_for_order(&mut self, order_id: &OrderId) -> StoreResult<Option<Payment>> {
        Ok(self.fetch_by_order(PAYMENT_SELECT, order_id, "rowid", row_to_payment).await?.pop())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payment (id, order_id, provider_ref, amount_cents, received_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&payment.id.0)
        .bind(&payment.order_id.0)
        .bind(&payment.provider_ref)
        .bind(payment.amount_cents)
        .bind(encode_ts(payment.received_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn invoice_for_order(&mut self, order_id: &OrderId) -> StoreResult<Option<Invoice>> {
        Ok(self.fetch_by_order(INVOICE_SELECT, order_id, "rowid", row_to_invoice).await?.pop())
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO invoice (id, organizer_id, order_id, invoice_number, sequence, status,
                                  subtotal_cents, discount_cents, mva_cents, total_cents,
                                  issued_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(&invoice.id.0)
        .bind(&invoice.organizer_id.0)
        .bind(&invoice.order_id.0)
        .bind(&invoice.invoice_number)
        .bind(encode_u64(invoice.sequence)?)
        .bind(invoice.status.as_str())
        .bind(invoice.subtotal_cents)
        .bind(invoice.discount_cents)
        .bind(invoice.mva_cents)
        .bind(invoice.total_cents)
        .bind(encode_ts(invoice.issued_at))
        .bind(encode_ts(invoice.updated_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn credit_notes_for_order(&mut self, order_id: &OrderId) -> StoreResult<Vec<CreditNote>> {
        self.fetch_by_order(CREDIT_NOTE_SELECT, order_id, "sequence", row_to_credit_note).await
    }

    async fn insert_credit_note(&mut self, credit_note: &CreditNote) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO credit_note (id, organizer_id, invoice_id, order_id, credit_note_number,
                                      sequence, amount_cents, reason, issued_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&credit_note.id.0)
        .bind(&credit_note.organizer_id.0)
        .bind(&credit_note.invoice_id.0)
        .bind(&credit_note.order_id.0)
        .bind(&credit_note.credit_note_number)
        .bind(encode_u64(credit_note.sequence)?)
        .bind(credit_note.amount_cents)
        .bind(&credit_note.reason)
        .bind(encode_ts(credit_note.issued_at))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
