use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::TrackId;
use crate::domain::registration::RegistrationId;
use crate::errors::{DomainError, ValidationErrors};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    OnWaitlist,
    Offered,
    Accepted,
    Expired,
    Removed,
}

impl WaitlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnWaitlist => "on_waitlist",
            Self::Offered => "offered",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on_waitlist" => Some(Self::OnWaitlist),
            "offered" => Some(Self::Offered),
            "accepted" => Some(Self::Accepted),
            "expired" => Some(Self::Expired),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Longest offer window staff may open, in hours.
pub const MAX_OFFER_HOURS: u32 = 720;

/// Capacity-overflow state for one registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub registration_id: RegistrationId,
    pub track_id: TrackId,
    pub status: WaitlistStatus,
    pub joined_at: DateTime<Utc>,
    pub offered_at: Option<DateTime<Utc>>,
    pub offered_until: Option<DateTime<Utc>>,
    pub offer_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn join(registration_id: RegistrationId, track_id: TrackId, now: DateTime<Utc>) -> Self {
        Self {
            registration_id,
            track_id,
            status: WaitlistStatus::OnWaitlist,
            joined_at: now,
            offered_at: None,
            offered_until: None,
            offer_count: 0,
            updated_at: now,
        }
    }

    fn invalid(&self, to: WaitlistStatus) -> DomainError {
        DomainError::InvalidWaitlistTransition { from: self.status, to }
    }

    /// Opens a time-boxed offer. Also used to renew an expired one.
    pub fn promote(&mut self, now: DateTime<Utc>, hours_valid: u32) -> Result<(), DomainError> {
        if hours_valid == 0 || hours_valid > MAX_OFFER_HOURS {
            return Err(ValidationErrors::single(
                "hours_valid",
                format!("must be in range 1..={MAX_OFFER_HOURS}"),
            )
            .into());
        }
        if !matches!(self.status, WaitlistStatus::OnWaitlist | WaitlistStatus::Expired) {
            return Err(self.invalid(WaitlistStatus::Offered));
        }
        let offered_until = now
            .checked_add_signed(Duration::hours(i64::from(hours_valid)))
            .ok_or_else(|| ValidationErrors::single("hours_valid", "deadline is out of range"))?;
        self.status = WaitlistStatus::Offered;
        self.offered_at = Some(now);
        self.offered_until = Some(offered_until);
        self.offer_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// True when the offer deadline has passed. The deadline itself is still
    /// inside the offer window.
    pub fn offer_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.offered_until.map(|until| until < now).unwrap_or(false)
    }

    /// Returns whether anything changed; expiring twice is a no-op.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != WaitlistStatus::Offered || !self.offer_lapsed(now) {
            return false;
        }
        self.status = WaitlistStatus::Expired;
        self.updated_at = now;
        true
    }

    /// Re-checks the deadline instead of trusting the status flag, since the
    /// expiry sweep may not have run yet.
    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != WaitlistStatus::Offered {
            return Err(self.invalid(WaitlistStatus::Accepted));
        }
        if let Some(offered_until) = self.offered_until.filter(|_| self.offer_lapsed(now)) {
            return Err(DomainError::OfferExpired { offered_until });
        }
        self.status = WaitlistStatus::Accepted;
        self.updated_at = now;
        Ok(())
    }

    pub fn remove(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !matches!(
            self.status,
            WaitlistStatus::OnWaitlist | WaitlistStatus::Offered | WaitlistStatus::Expired
        ) {
            return Err(self.invalid(WaitlistStatus::Removed));
        }
        self.status = WaitlistStatus::Removed;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::catalog::TrackId;
    use crate::domain::registration::RegistrationId;
    use crate::errors::DomainError;

    use super::{WaitlistEntry, WaitlistStatus, MAX_OFFER_HOURS};

    fn entry() -> WaitlistEntry {
        WaitlistEntry::join(
            RegistrationId("reg-1".to_string()),
            TrackId("track-1".to_string()),
            Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn promote_sets_deadline_from_hours_valid() {
        let mut entry = entry();
        let now = entry.joined_at + Duration::days(2);
        entry.promote(now, 48).expect("promote from waitlist");

        assert_eq!(entry.status, WaitlistStatus::Offered);
        assert_eq!(entry.offered_until, Some(now + Duration::hours(48)));
        assert_eq!(entry.offer_count, 1);
    }

    #[test]
    fn expire_is_idempotent_and_ignores_live_offers() {
        let mut entry = entry();
        let now = entry.joined_at;
        entry.promote(now, 24).expect("promote");

        assert!(!entry.expire(now + Duration::hours(24)), "deadline itself is still live");
        assert!(entry.expire(now + Duration::hours(25)));
        assert!(!entry.expire(now + Duration::hours(26)));
        assert_eq!(entry.status, WaitlistStatus::Expired);
    }

    #[test]
    fn accept_rechecks_deadline_even_while_status_is_offered() {
        let mut entry = entry();
        let now = entry.joined_at;
        entry.promote(now, 1).expect("promote");

        let error = entry.accept(now + Duration::hours(2)).expect_err("offer lapsed");
        assert!(matches!(error, DomainError::OfferExpired { .. }));
        assert_eq!(entry.status, WaitlistStatus::Offered);

        entry.expire(now + Duration::hours(2));
        entry.promote(now + Duration::hours(3), 1).expect("renew expired offer");
        entry.accept(now + Duration::hours(3)).expect("accept renewed offer");
        assert_eq!(entry.status, WaitlistStatus::Accepted);
        assert_eq!(entry.offer_count, 2);
    }

    #[test]
    fn accepted_entries_cannot_be_removed_or_promoted() {
        let mut entry = entry();
        let now = entry.joined_at;
        entry.promote(now, 1).expect("promote");
        entry.accept(now).expect("accept");

        assert!(matches!(
            entry.remove(now),
            Err(DomainError::InvalidWaitlistTransition { .. })
        ));
        assert!(entry.promote(now, 1).is_err());
    }

    #[test]
    fn promote_rejects_windows_past_the_limit() {
        let mut entry = entry();
        let now = entry.joined_at;

        for hours in [0, MAX_OFFER_HOURS + 1, u32::MAX] {
            let error = entry.promote(now, hours).expect_err("window out of range");
            assert!(matches!(error, DomainError::Validation(_)));
        }
        assert_eq!(entry.status, WaitlistStatus::OnWaitlist);
        entry.promote(now, MAX_OFFER_HOURS).expect("longest window is allowed");
    }
}
