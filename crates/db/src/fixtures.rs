//! Deterministic demo catalog used by `enrolla seed` and the integration tests.
//!
//! Provides one VAT-registered organizer with:
//! 1. A spring course period with a capped track, a pair-priced track and an
//!    open track
//! 2. A social event
//! 3. A self-service and a manually validated membership tier
//! 4. Early-bird, member and multi-course discount rules

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use enrolla_core::domain::catalog::{
    CoursePeriod, CoursePeriodId, Event, EventId, MembershipTier, MembershipTierId, Track, TrackId,
    TrackPricing,
};
use enrolla_core::domain::discount::{DiscountRule, DiscountRuleId, RuleKind};
use enrolla_core::domain::organizer::{Organizer, OrganizerId, Person, PersonId};
use enrolla_core::errors::ApplicationError;
use enrolla_core::store::{CommerceStore, CommerceTx};

pub const ORGANIZER_ID: &str = "org-swing-oslo";
pub const ORGANIZER_ADMIN_ID: &str = "person-admin";
pub const DANCER_IDS: &[&str] = &["person-ada", "person-bo", "person-cleo"];
pub const PERIOD_ID: &str = "period-spring";
pub const CAPPED_TRACK_ID: &str = "track-lindy-1";
pub const PAIR_TRACK_ID: &str = "track-lindy-2";
pub const OPEN_TRACK_ID: &str = "track-solo-jazz";
pub const EVENT_ID: &str = "event-spring-social";
pub const SELF_SERVICE_TIER_ID: &str = "tier-standard";
pub const VALIDATED_TIER_ID: &str = "tier-student";
pub const CAPPED_TRACK_CAPACITY: u32 = 2;

pub struct DemoCatalog;

impl DemoCatalog {
    /// Upserts the whole catalog in one transaction. Safe to run repeatedly:
    /// rows keep their ids and discount rules keep their creation order.
    pub async fn load<S>(store: &S, now: DateTime<Utc>) -> Result<SeedResult, ApplicationError>
    where
        S: CommerceStore,
    {
        let mut tx = store.begin().await?;

        let organizer_id = OrganizerId(ORGANIZER_ID.to_string());
        tx.save_organizer(&Organizer {
            id: organizer_id.clone(),
            name: "Swing Oslo".to_string(),
            vat_registered: true,
            mva_rate: Decimal::new(25, 0),
            invoice_prefix: Some("SO".to_string()),
        })
        .await?;

        let mut people = vec![Person {
            id: PersonId(ORGANIZER_ADMIN_ID.to_string()),
            name: "Frida Admin".to_string(),
            email: "admin@swing-oslo.test".to_string(),
        }];
        people.extend(DANCER_IDS.iter().map(|id| {
            let name = id.trim_start_matches("person-");
            Person {
                id: PersonId(id.to_string()),
                name: capitalize(name),
                email: format!("{name}@dancers.test"),
            }
        }));
        for person in &people {
            tx.save_person(person).await?;
        }

        let period_id = CoursePeriodId(PERIOD_ID.to_string());
        let starts_at = now + Duration::days(30);
        tx.save_course_period(&CoursePeriod {
            id: period_id.clone(),
            organizer_id: organizer_id.clone(),
            name: "Spring term".to_string(),
            starts_at,
            ends_at: starts_at + Duration::weeks(10),
        })
        .await?;

        let tracks = [
            Track {
                id: TrackId(CAPPED_TRACK_ID.to_string()),
                period_id: period_id.clone(),
                name: "Lindy Hop 1".to_string(),
                pricing: TrackPricing { price_cents: 150_000, pair_price_cents: None },
                capacity: Some(CAPPED_TRACK_CAPACITY),
            },
            Track {
                id: TrackId(PAIR_TRACK_ID.to_string()),
                period_id: period_id.clone(),
                name: "Lindy Hop 2".to_string(),
                pricing: TrackPricing { price_cents: 150_000, pair_price_cents: Some(250_000) },
                capacity: Some(20),
            },
            Track {
                id: TrackId(OPEN_TRACK_ID.to_string()),
                period_id: period_id.clone(),
                name: "Solo Jazz".to_string(),
                pricing: TrackPricing { price_cents: 120_000, pair_price_cents: None },
                capacity: None,
            },
        ];
        for track in &tracks {
            tx.save_track(track).await?;
        }

        tx.save_event(&Event {
            id: EventId(EVENT_ID.to_string()),
            organizer_id: organizer_id.clone(),
            name: "Spring social".to_string(),
            price_cents: 20_000,
            starts_at: starts_at + Duration::weeks(2),
        })
        .await?;

        let tiers = [
            MembershipTier {
                id: MembershipTierId(SELF_SERVICE_TIER_ID.to_string()),
                organizer_id: organizer_id.clone(),
                name: "Standard".to_string(),
                price_cents: 30_000,
                requires_manual_validation: false,
                validity_days: 365,
            },
            MembershipTier {
                id: MembershipTierId(VALIDATED_TIER_ID.to_string()),
                organizer_id: organizer_id.clone(),
                name: "Student".to_string(),
                price_cents: 15_000,
                requires_manual_validation: true,
                validity_days: 365,
            },
        ];
        for tier in &tiers {
            tx.save_membership_tier(tier).await?;
        }

        let rules = demo_rules(&period_id, now);
        for rule in &rules {
            let created_at = tx
                .discount_rule(&rule.id)
                .await?
                .map(|existing| existing.created_at)
                .unwrap_or(rule.created_at);
            tx.save_discount_rule(&DiscountRule { created_at, ..rule.clone() }).await?;
        }

        tx.commit().await?;

        tracing::info!(
            event_name = "seed.demo_catalog_loaded",
            organizer_id = %organizer_id.0,
            people = people.len(),
            tracks = tracks.len(),
            rules = rules.len(),
            "demo catalog loaded"
        );

        Ok(SeedResult {
            organizer_id,
            period_id,
            people_seeded: people.len(),
            tracks_seeded: tracks.len(),
            events_seeded: 1,
            tiers_seeded: tiers.len(),
            rules_seeded: rules.len(),
        })
    }

    /// Checks that every seeded row is present.
    pub async fn verify<S>(store: &S) -> Result<VerificationResult, ApplicationError>
    where
        S: CommerceStore,
    {
        let mut tx = store.begin().await?;
        let mut checks = Vec::new();

        checks.push((
            "organizer",
            tx.organizer(&OrganizerId(ORGANIZER_ID.to_string())).await?.is_some(),
        ));
        let mut people_present = true;
        for id in std::iter::once(&ORGANIZER_ADMIN_ID).chain(DANCER_IDS) {
            people_present &= tx.person(&PersonId(id.to_string())).await?.is_some();
        }
        checks.push(("people", people_present));

        let period_id = CoursePeriodId(PERIOD_ID.to_string());
        checks.push(("period", tx.course_period(&period_id).await?.is_some()));
        let mut tracks_present = true;
        for id in [CAPPED_TRACK_ID, PAIR_TRACK_ID, OPEN_TRACK_ID] {
            tracks_present &= tx.track(&TrackId(id.to_string())).await?.is_some();
        }
        checks.push(("tracks", tracks_present));
        checks.push(("event", tx.event(&EventId(EVENT_ID.to_string())).await?.is_some()));
        let mut tiers_present = true;
        for id in [SELF_SERVICE_TIER_ID, VALIDATED_TIER_ID] {
            tiers_present &= tx.membership_tier(&MembershipTierId(id.to_string())).await?.is_some();
        }
        checks.push(("membership-tiers", tiers_present));
        checks.push(("discount-rules", tx.discount_rules_for_period(&period_id).await?.len() == 3));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

fn demo_rules(period_id: &CoursePeriodId, now: DateTime<Utc>) -> Vec<DiscountRule> {
    vec![
        DiscountRule {
            id: DiscountRuleId("rule-early-bird".to_string()),
            period_id: period_id.clone(),
            code: "EARLY".to_string(),
            name: "Early bird".to_string(),
            priority: 10,
            enabled: true,
            kind: RuleKind::EarlyBird {
                percent: Some(Decimal::new(10, 0)),
                amount_cents: None,
                valid_until: now + Duration::days(14),
                valid_from: None,
            },
            created_at: now,
        },
        DiscountRule {
            id: DiscountRuleId("rule-member".to_string()),
            period_id: period_id.clone(),
            code: "MEMBER".to_string(),
            name: "Member price".to_string(),
            priority: 20,
            enabled: true,
            kind: RuleKind::MemberDiscount { percent: Decimal::new(15, 0) },
            created_at: now + Duration::microseconds(1),
        },
        DiscountRule {
            id: DiscountRuleId("rule-multi-course".to_string()),
            period_id: period_id.clone(),
            code: "MULTI".to_string(),
            name: "Two or more courses".to_string(),
            priority: 30,
            enabled: true,
            kind: RuleKind::BulkQuantity { min_quantity: 2, percent: Decimal::new(20, 0) },
            created_at: now + Duration::microseconds(2),
        },
    ]
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub organizer_id: OrganizerId,
    pub period_id: CoursePeriodId,
    pub people_seeded: usize,
    pub tracks_seeded: usize,
    pub events_seeded: usize,
    pub tiers_seeded: usize,
    pub rules_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
