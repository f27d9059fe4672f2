use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use enrolla_core::errors::{ApplicationError, FieldError, InterfaceError};
use enrolla_core::services::CommerceServices;
use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Shared by the webhook and admin routes.
pub struct AppState<S> {
    pub services: Arc<CommerceServices<S>>,
    pub webhook_secret: Option<SecretString>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { services: Arc::clone(&self.services), webhook_secret: self.webhook_secret.clone() }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn rejection(status: StatusCode, detail: &str, correlation_id: &str) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: status.canonical_reason().unwrap_or("error").to_string(),
            detail: detail.to_string(),
            correlation_id: correlation_id.to_string(),
            fields: Vec::new(),
        }),
    )
}

pub fn application_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = error.into_interface(correlation_id);
    let error = interface.user_message().to_string();
    let (status, detail, fields) = match interface {
        InterfaceError::BadRequest { message, fields, .. } => {
            (StatusCode::BAD_REQUEST, message, fields)
        }
        InterfaceError::Forbidden { message, .. } => (StatusCode::FORBIDDEN, message, Vec::new()),
        InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, message, Vec::new()),
        InterfaceError::Conflict { message, .. } => (StatusCode::CONFLICT, message, Vec::new()),
        InterfaceError::ServiceUnavailable { message, .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, message, Vec::new())
        }
        InterfaceError::Internal { message, .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, message, Vec::new())
        }
    };

    (status, Json(ErrorBody { error, detail, correlation_id: correlation_id.to_string(), fields }))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use enrolla_core::errors::{ApplicationError, ValidationErrors};

    use super::{application_error, correlation_id, CORRELATION_ID_HEADER};

    #[test]
    fn correlation_id_is_taken_from_the_request_or_generated() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("req-42"));
        assert_eq!(correlation_id(&headers), "req-42");

        let generated = correlation_id(&HeaderMap::new());
        assert_eq!(generated.len(), 36);
    }

    #[test]
    fn application_errors_map_to_http_statuses() {
        let (status, body) =
            application_error(ApplicationError::not_found("order", "ord-9"), "req-1");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0.correlation_id, "req-1");
        assert!(body.0.detail.contains("ord-9"));

        let (status, _) =
            application_error(ApplicationError::Conflict("already cancelled".into()), "req-2");
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = application_error(
            ValidationErrors::single("provider_ref", "must not be blank").into(),
            "req-3",
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0.fields.len(), 1);
    }
}
