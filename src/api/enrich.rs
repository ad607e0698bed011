//! POST /enrich
//!
//! Inbound surface of the enrichment pipeline. Derives the caller identity
//! from forwarded-for headers (best-effort, spoofable, used only as the
//! admission-control key), validates the query, and maps pipeline outcomes
//! onto the JSON contract.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::enrichment::{self, EnrichError, RecordView};
use crate::AppState;

/// POST /enrich request
#[derive(Debug, Deserialize)]
pub struct EnrichRequest {
    #[serde(default)]
    pub query: String,
}

/// POST /enrich success response
#[derive(Debug, Serialize)]
pub struct EnrichResponse {
    pub success: bool,
    pub record: RecordView,
    pub explanation: String,
}

/// POST /enrich
pub async fn enrich_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EnrichRequest>,
) -> ApiResult<Response> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let identity = client_identity(&headers);
    let enrichment = enrichment::enrich(&state, &identity, query).await?;

    let response = (
        [("x-ratelimit-remaining", enrichment.remaining.to_string())],
        Json(EnrichResponse {
            success: true,
            record: enrichment.record,
            explanation: enrichment.explanation,
        }),
    );

    Ok(response.into_response())
}

impl From<EnrichError> for ApiError {
    fn from(error: EnrichError) -> Self {
        match error {
            EnrichError::RateLimited { reset_at } => ApiError::RateLimited { reset_at },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Derive the caller identity: first hop of `x-forwarded-for`, then
/// `x-real-ip`, then `"unknown"`. Not a security boundary.
fn client_identity(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_hop) = forwarded.split(',').next() {
            let first_hop = first_hop.trim();
            if !first_hop.is_empty() {
                return first_hop.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    "unknown".to_string()
}

/// Build enrichment routes
pub fn enrich_routes() -> Router<AppState> {
    Router::new().route("/enrich", post(enrich_record))
}
