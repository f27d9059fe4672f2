use tracing::info;

use crate::access::Caller;
use crate::audit::{AuditCategory, AuditOutcome};
use crate::domain::catalog::{CoursePeriod, CoursePeriodId};
use crate::domain::discount::{DiscountRule, DiscountRuleId};
use crate::errors::ApplicationError;
use crate::services::ServiceDeps;
use crate::store::{CommerceStore, CommerceTx};

/// Organizer-side management of a period's discount rules. Pricing only
/// ever reads them.
pub struct DiscountRuleService<S> {
    deps: ServiceDeps<S>,
}

impl<S: CommerceStore> DiscountRuleService<S> {
    pub fn new(deps: ServiceDeps<S>) -> Self {
        Self { deps }
    }

    pub async fn list(
        &self,
        caller: &Caller,
        period_id: &CoursePeriodId,
    ) -> Result<Vec<DiscountRule>, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let period = load_period(&mut tx, period_id).await?;
        self.deps.gate.assert_organizer_access(caller, &period.organizer_id)?;
        tx.discount_rules_for_period(period_id).await
    }

    /// Creates or replaces a rule. A rule cannot be moved to another period.
    pub async fn upsert(
        &self,
        caller: &Caller,
        rule: DiscountRule,
    ) -> Result<DiscountRule, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let period = load_period(&mut tx, &rule.period_id).await?;
        self.deps.gate.assert_organizer_access(caller, &period.organizer_id)?;
        rule.validate()?;

        let existing = tx.discount_rule(&rule.id).await?;
        if let Some(existing) = &existing {
            if existing.period_id != rule.period_id {
                return Err(ApplicationError::Conflict(format!(
                    "discount rule `{}` belongs to period `{}`",
                    rule.id.0, existing.period_id.0
                )));
            }
        }
        let mut rule = rule;
        if let Some(existing) = &existing {
            rule.created_at = existing.created_at;
        }
        tx.save_discount_rule(&rule).await?;
        tx.commit().await?;

        info!(
            event_name = "pricing.rule_saved",
            correlation_id = %caller.correlation_id,
            rule_id = %rule.id.0,
            rule_type = rule.kind.rule_type(),
            created = existing.is_none(),
            "discount rule saved"
        );
        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "pricing.rule_saved",
                    AuditCategory::Pricing,
                    AuditOutcome::Success,
                )
                .with_metadata("rule_id", rule.id.0.clone())
                .with_metadata("rule_type", rule.kind.rule_type())
                .with_metadata("priority", rule.priority.to_string()),
        );
        Ok(rule)
    }

    pub async fn set_enabled(
        &self,
        caller: &Caller,
        rule_id: &DiscountRuleId,
        enabled: bool,
    ) -> Result<DiscountRule, ApplicationError> {
        let mut tx = self.deps.store.begin().await?;
        let mut rule = tx
            .discount_rule(rule_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("discount rule", &rule_id.0))?;
        let period = load_period(&mut tx, &rule.period_id).await?;
        self.deps.gate.assert_organizer_access(caller, &period.organizer_id)?;

        if rule.enabled == enabled {
            return Ok(rule);
        }
        rule.enabled = enabled;
        tx.save_discount_rule(&rule).await?;
        tx.commit().await?;

        self.deps.emit(
            self.deps
                .audit_event(
                    caller,
                    "pricing.rule_toggled",
                    AuditCategory::Pricing,
                    AuditOutcome::Success,
                )
                .with_metadata("rule_id", rule.id.0.clone())
                .with_metadata("enabled", enabled.to_string()),
        );
        Ok(rule)
    }
}

async fn load_period<T: CommerceTx>(
    tx: &mut T,
    period_id: &CoursePeriodId,
) -> Result<CoursePeriod, ApplicationError> {
    tx.course_period(period_id)
        .await?
        .ok_or_else(|| ApplicationError::not_found("course period", &period_id.0))
}
