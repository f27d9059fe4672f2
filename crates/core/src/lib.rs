pub mod access;
pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod pricing;
pub mod services;
pub mod store;

pub use access::{AuthorizationGate, Caller, RoleGate};
pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::cart::{Cart, CartItem, CartItemRef};
pub use domain::discount::{DiscountRule, DiscountRuleId, RuleBasis, RuleKind};
pub use domain::order::{Order, OrderId, OrderStatus, OrderType};
pub use domain::waitlist::{WaitlistEntry, WaitlistStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError, ValidationErrors};
pub use notify::{NotificationSender, TransactionalMessage};
pub use pricing::{PricedCart, PricingContext, PricingEngine, PricingSnapshot};
pub use services::{CommerceServices, CommerceSettings, ServiceDeps};
pub use store::{CommerceStore, CommerceTx};
