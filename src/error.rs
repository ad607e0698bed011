//! Error types for wax-enrich
//!
//! All handler failures are mapped to the JSON error contract
//! `{"success": false, "error": "..."}` plus a status code; rate-limit
//! denials additionally carry `resetAt` and the quota headers.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

/// API result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Quota exhausted for the caller's identity (429)
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, &message),
            ApiError::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
            }
            ApiError::RateLimited { reset_at } => {
                let reset = reset_at.to_rfc3339();
                let body = Json(json!({
                    "success": false,
                    "error": "Rate limit exceeded. Please try again later.",
                    "resetAt": reset,
                }));

                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
                if let Ok(value) = HeaderValue::from_str(&reset) {
                    headers.insert("x-ratelimit-reset", value);
                }
                response
            }
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = Json(json!({
        "success": false,
        "error": message,
    }));
    (status, body).into_response()
}
