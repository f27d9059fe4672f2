//! Payment-provider callbacks. The provider signs the raw body with the
//! shared webhook secret and retries until it receives a 2xx.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use enrolla_core::access::Caller;
use enrolla_core::domain::order::OrderId;
use enrolla_core::services::FulfillmentOutcome;
use enrolla_core::store::CommerceStore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{application_error, correlation_id, rejection, ApiError, AppState};
use crate::signing::{self, SIGNATURE_HEADER};

#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub provider_ref: String,
    pub status: PaymentStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    pub correlation_id: String,
}

pub async fn payment_webhook<S: CommerceStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);

    let Some(secret) = &state.webhook_secret else {
        warn!(
            event_name = "payment.webhook_rejected",
            correlation_id = %correlation_id,
            reason = "webhook secret not configured",
            "payment webhook received but no secret is configured"
        );
        return Err(rejection(
            StatusCode::UNAUTHORIZED,
            "webhook secret not configured",
            &correlation_id,
        ));
    };

    let header = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    if let Err(error) = signing::verify(secret.expose_secret(), &body, header) {
        warn!(
            event_name = "payment.webhook_rejected",
            correlation_id = %correlation_id,
            reason = error.as_str(),
            "payment webhook signature check failed"
        );
        return Err(rejection(StatusCode::UNAUTHORIZED, error.as_str(), &correlation_id));
    }

    let notification: PaymentNotification = serde_json::from_slice(&body).map_err(|error| {
        rejection(
            StatusCode::BAD_REQUEST,
            &format!("invalid webhook payload: {error}"),
            &correlation_id,
        )
    })?;
    let order_id = OrderId(notification.order_id.trim().to_string());

    match notification.status {
        PaymentStatus::Succeeded => {}
        PaymentStatus::Failed | PaymentStatus::Unrecognized => {
            // The order stays unpaid; the purchaser can retry payment.
            info!(
                event_name = "payment.not_succeeded",
                correlation_id = %correlation_id,
                order_id = %order_id.0,
                provider_ref = %notification.provider_ref,
                status = ?notification.status,
                "payment webhook acknowledged without fulfillment"
            );
            return Ok(Json(WebhookResponse {
                status: "acknowledged",
                order_id: order_id.0,
                order_number: None,
                invoice_number: None,
                correlation_id,
            }));
        }
    }

    let caller = Caller::system("payment-webhook").with_correlation_id(correlation_id.clone());
    let outcome = state
        .services
        .fulfillment
        .fulfill_order(&caller, &order_id, &notification.provider_ref)
        .await
        .map_err(|error| {
            warn!(
                event_name = "payment.fulfillment_failed",
                correlation_id = %correlation_id,
                order_id = %order_id.0,
                error = %error,
                "payment webhook could not fulfill order"
            );
            application_error(error, &correlation_id)
        })?;

    let response = match outcome {
        FulfillmentOutcome::Fulfilled(receipt) => WebhookResponse {
            status: "fulfilled",
            order_id: receipt.order_id.0,
            order_number: Some(receipt.order_number),
            invoice_number: Some(receipt.invoice_number),
            correlation_id,
        },
        FulfillmentOutcome::AlreadyFulfilled { order_id, order_number } => WebhookResponse {
            status: "already_fulfilled",
            order_id: order_id.0,
            order_number,
            invoice_number: None,
            correlation_id,
        },
    };
    Ok(Json(response))
}
