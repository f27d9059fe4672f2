//! Transactional orchestration of the commerce core.
//!
//! Each public operation checks authorization first, then runs its reads,
//! state checks and writes inside one store transaction, commits, and only
//! then emits audit events and best-effort notifications.

pub mod checkout;
pub mod fulfillment;
pub mod orders;
pub mod rules;
pub mod waitlist;

use std::sync::Arc;

use crate::access::{AuthorizationGate, Caller, RoleGate};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::domain::order::Order;
use crate::errors::ApplicationError;
use crate::notify::{NoopNotificationSender, NotificationSender};
use crate::pricing::{DeterministicPricingEngine, PricingEngine};
use crate::store::CommerceStore;

pub use checkout::{CheckoutOutcome, CheckoutService, WaitlistedItem};
pub use fulfillment::{FulfillmentOutcome, FulfillmentReceipt, FulfillmentService};
pub use orders::{OrderService, Reversal};
pub use rules::DiscountRuleService;
pub use waitlist::{ExpirySweep, WaitlistService};

pub const FREE_ORDER_PROVIDER_REF: &str = "free";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommerceSettings {
    pub invoice_prefix: String,
    pub credit_note_prefix: String,
    pub number_width: usize,
    pub default_offer_hours: u32,
}

impl Default for CommerceSettings {
    fn default() -> Self {
        Self {
            invoice_prefix: "INV".to_string(),
            credit_note_prefix: "CN".to_string(),
            number_width: 4,
            default_offer_hours: 48,
        }
    }
}

impl From<&AppConfig> for CommerceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            invoice_prefix: config.billing.invoice_prefix.clone(),
            credit_note_prefix: config.billing.credit_note_prefix.clone(),
            number_width: config.billing.number_width,
            default_offer_hours: config.waitlist.default_offer_hours,
        }
    }
}

/// Collaborators shared by every service.
pub struct ServiceDeps<S> {
    pub store: Arc<S>,
    pub gate: Arc<dyn AuthorizationGate>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSender>,
    pub clock: Arc<dyn Clock>,
    pub pricing: Arc<dyn PricingEngine>,
    pub settings: CommerceSettings,
}

impl<S> Clone for ServiceDeps<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gate: Arc::clone(&self.gate),
            audit: Arc::clone(&self.audit),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::clone(&self.clock),
            pricing: Arc::clone(&self.pricing),
            settings: self.settings.clone(),
        }
    }
}

impl<S: CommerceStore> ServiceDeps<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            gate: Arc::new(RoleGate),
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(NoopNotificationSender),
            clock: Arc::new(SystemClock),
            pricing: Arc::new(DeterministicPricingEngine),
            settings: CommerceSettings::default(),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: CommerceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub(crate) fn audit_event(
        &self,
        caller: &Caller,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(&caller.correlation_id, event_type, category, caller.actor(), outcome)
            .at(self.clock.now())
    }

    pub(crate) fn emit(&self, event: AuditEvent) {
        self.audit.emit(event);
    }
}

/// Purchasers may act on their own orders; organizer staff on any order of
/// their organizer. A missing order is reported the same way as a foreign
/// one unless the caller is an administrator.
pub(crate) fn authorize_order_access(
    gate: &dyn AuthorizationGate,
    caller: &Caller,
    order: Option<&Order>,
    order_id: &str,
) -> Result<(), ApplicationError> {
    match order {
        Some(order) if caller.owns(&order.purchaser_id) => Ok(()),
        Some(order) => gate.assert_organizer_access(caller, &order.organizer_id),
        None if caller.is_admin => Err(ApplicationError::not_found("order", order_id)),
        None => Err(ApplicationError::Unauthorized(format!(
            "caller `{}` may not act on order `{order_id}`",
            caller.person_id.0
        ))),
    }
}

/// All services over one store.
pub struct CommerceServices<S> {
    pub checkout: CheckoutService<S>,
    pub fulfillment: FulfillmentService<S>,
    pub waitlist: WaitlistService<S>,
    pub orders: OrderService<S>,
    pub rules: DiscountRuleService<S>,
}

impl<S: CommerceStore> CommerceServices<S> {
    pub fn new(deps: ServiceDeps<S>) -> Self {
        Self {
            checkout: CheckoutService::new(deps.clone()),
            fulfillment: FulfillmentService::new(deps.clone()),
            waitlist: WaitlistService::new(deps.clone()),
            orders: OrderService::new(deps.clone()),
            rules: DiscountRuleService::new(deps),
        }
    }
}
