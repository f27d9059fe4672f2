use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub const ORDER_CONFIRMATION: &str = "order-confirmation";
pub const WAITLIST_OFFER: &str = "waitlist-offer";
pub const WAITLIST_DECLINED: &str = "waitlist-declined";
pub const ORDER_REFUNDED: &str = "order-refunded";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionalMessage {
    pub template_slug: String,
    pub recipient_email: String,
    pub variables: BTreeMap<String, String>,
}

impl TransactionalMessage {
    pub fn new(template_slug: &str, recipient_email: impl Into<String>) -> Self {
        Self {
            template_slug: template_slug.to_string(),
            recipient_email: recipient_email.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected by provider ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_transactional(
        &self,
        template_slug: &str,
        recipient_email: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError>;
}

/// Sends after the triggering transaction has committed. Failures are logged
/// and returned as `false`; they never propagate.
pub async fn dispatch_best_effort(
    sender: &dyn NotificationSender,
    message: &TransactionalMessage,
    correlation_id: &str,
) -> bool {
    if message.recipient_email.trim().is_empty() {
        debug!(
            event_name = "notification.skipped",
            correlation_id,
            template = %message.template_slug,
            "recipient has no email address"
        );
        return false;
    }

    match sender
        .send_transactional(&message.template_slug, &message.recipient_email, &message.variables)
        .await
    {
        Ok(()) => {
            debug!(
                event_name = "notification.sent",
                correlation_id,
                template = %message.template_slug,
                "transactional notification sent"
            );
            true
        }
        Err(error) => {
            warn!(
                event_name = "notification.send_failed",
                correlation_id,
                template = %message.template_slug,
                error = %error,
                "transactional notification failed; state change is kept"
            );
            false
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationSender;

#[async_trait]
impl NotificationSender for NoopNotificationSender {
    async fn send_transactional(
        &self,
        _template_slug: &str,
        _recipient_email: &str,
        _variables: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Keeps every message it is asked to send. Can be switched into a failing
/// mode to exercise the best-effort path.
#[derive(Clone, Default)]
pub struct RecordingNotificationSender {
    sent: Arc<Mutex<Vec<TransactionalMessage>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotificationSender {
    pub fn failing() -> Self {
        let sender = Self::default();
        sender.set_failing(true);
        sender
    }

    pub fn set_failing(&self, failing: bool) {
        match self.failing.lock() {
            Ok(mut flag) => *flag = failing,
            Err(poisoned) => *poisoned.into_inner() = failing,
        }
    }

    pub fn sent(&self) -> Vec<TransactionalMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_with_template(&self, template_slug: &str) -> Vec<TransactionalMessage> {
        self.sent().into_iter().filter(|message| message.template_slug == template_slug).collect()
    }

    fn is_failing(&self) -> bool {
        match self.failing.lock() {
            Ok(flag) => *flag,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send_transactional(
        &self,
        template_slug: &str,
        recipient_email: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError> {
        if self.is_failing() {
            return Err(NotificationError::Transport("recording sender set to fail".to_string()));
        }
        let message = TransactionalMessage {
            template_slug: template_slug.to_string(),
            recipient_email: recipient_email.to_string(),
            variables: variables.clone(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(())
    }
}
