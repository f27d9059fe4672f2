use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use constant_time_eq::constant_time_eq;
use enrolla_core::access::Caller;
use enrolla_core::store::CommerceStore;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::info;

use crate::api::{application_error, correlation_id, rejection, ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct ExpirySweepResponse {
    pub expired: usize,
    pub registration_ids: Vec<String>,
    pub correlation_id: String,
}

/// Triggered by an external scheduler; there is no in-process timer.
pub async fn expire_waitlist_offers<S: CommerceStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<ExpirySweepResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let authorized = match (&state.webhook_secret, provided) {
        (Some(secret), Some(token)) => {
            constant_time_eq(token.trim().as_bytes(), secret.expose_secret().as_bytes())
        }
        _ => false,
    };
    if !authorized {
        return Err(rejection(
            StatusCode::UNAUTHORIZED,
            "missing or invalid bearer token",
            &correlation_id,
        ));
    }

    let caller = Caller::system("waitlist-sweep").with_correlation_id(correlation_id.clone());
    let sweep = state
        .services
        .waitlist
        .expire_offers(&caller)
        .await
        .map_err(|error| application_error(error, &correlation_id))?;

    info!(
        event_name = "admin.waitlist_sweep_completed",
        correlation_id = %correlation_id,
        expired = sweep.count(),
        "waitlist expiry sweep completed"
    );

    Ok(Json(ExpirySweepResponse {
        expired: sweep.count(),
        registration_ids: sweep.expired.into_iter().map(|id| id.0).collect(),
        correlation_id,
    }))
}
