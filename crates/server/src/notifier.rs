//! Transactional email over the notification provider's JSON API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use enrolla_core::config::NotificationsConfig;
use enrolla_core::notify::{NotificationError, NotificationSender};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notifications.endpoint is not set")]
    MissingEndpoint,
    #[error("could not build http client: {0}")]
    Client(#[source] reqwest::Error),
}

pub struct HttpNotificationSender {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    from_address: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    template: &'a str,
    to: &'a str,
    from: &'a str,
    variables: &'a BTreeMap<String, String>,
}

impl HttpNotificationSender {
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, NotifierError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or(NotifierError::MissingEndpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(NotifierError::Client)?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: config.api_key.clone(),
            from_address: config.from_address.clone(),
        })
    }

    fn request_body<'a>(
        &'a self,
        template_slug: &'a str,
        recipient_email: &'a str,
        variables: &'a BTreeMap<String, String>,
    ) -> SendRequest<'a> {
        SendRequest {
            template: template_slug,
            to: recipient_email,
            from: &self.from_address,
            variables,
        }
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    async fn send_transactional(
        &self,
        template_slug: &str,
        recipient_email: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), NotificationError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(template_slug, recipient_email, variables));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| NotificationError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotificationError::Rejected { status: status.as_u16(), body })
    }
}
