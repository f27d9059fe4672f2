use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::organizer::OrganizerId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoursePeriodId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipTierId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePeriod {
    pub id: CoursePeriodId,
    pub organizer_id: OrganizerId,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DanceRole {
    Leader,
    Follower,
    /// Only valid on waitlist entries that accept either role.
    Any,
}

impl DanceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
            Self::Any => "any",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "leader" => Some(Self::Leader),
            "follower" => Some(Self::Follower),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// `Any` is priced as a leader seat.
    pub fn pricing_role(&self) -> Self {
        match self {
            Self::Any => Self::Leader,
            role => *role,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceBasis {
    Single,
    Pair,
}

impl PriceBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Pair => "pair",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" => Some(Self::Single),
            "pair" => Some(Self::Pair),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPricing {
    pub price_cents: i64,
    pub pair_price_cents: Option<i64>,
}

impl TrackPricing {
    pub fn unit_price(&self, basis: PriceBasis) -> i64 {
        match basis {
            PriceBasis::Single => self.price_cents,
            PriceBasis::Pair => self.pair_price_cents.unwrap_or(self.price_cents * 2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub period_id: CoursePeriodId,
    pub name: String,
    pub pricing: TrackPricing,
    /// Seats across both roles; `None` means unlimited.
    pub capacity: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub organizer_id: OrganizerId,
    pub name: String,
    pub price_cents: i64,
    pub starts_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipTier {
    pub id: MembershipTierId,
    pub organizer_id: OrganizerId,
    pub name: String,
    pub price_cents: i64,
    pub requires_manual_validation: bool,
    pub validity_days: u32,
}

#[cfg(test)]
mod tests {
    use super::{DanceRole, PriceBasis, TrackPricing};

    #[test]
    fn pair_price_falls_back_to_double_single_price() {
        let explicit = TrackPricing { price_cents: 150_000, pair_price_cents: Some(270_000) };
        let implicit = TrackPricing { price_cents: 150_000, pair_price_cents: None };

        assert_eq!(explicit.unit_price(PriceBasis::Single), 150_000);
        assert_eq!(explicit.unit_price(PriceBasis::Pair), 270_000);
        assert_eq!(implicit.unit_price(PriceBasis::Pair), 300_000);
    }

    #[test]
    fn any_role_prices_as_leader() {
        assert_eq!(DanceRole::Any.pricing_role(), DanceRole::Leader);
        assert_eq!(DanceRole::Follower.pricing_role(), DanceRole::Follower);
    }
}
