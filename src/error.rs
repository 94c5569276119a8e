use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error surface for every HTTP handler. Clients always receive
/// `{error, details?}` JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("rate limited")]
    RateLimited,
    #[error("database connection error")]
    Unavailable(String),
    #[error("database error")]
    Database(#[from] diesel::result::Error),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, None),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, None),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, None),
            ApiError::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, Some(e.clone())),
            ApiError::Database(e) => (StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())),
            ApiError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, Some(format!("{e:#}"))),
        };

        if status.is_server_error() {
            tracing::error!("request failed: {}", details.as_deref().unwrap_or("unknown"));
        }

        let mut body = json!({ "error": self.to_string() });
        if let Some(details) = details {
            body["details"] = json!(details);
        }

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::RateLimited) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("2"));
        }
        response
    }
}
