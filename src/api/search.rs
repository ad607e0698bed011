//! POST /search
//!
//! Un-enriched catalog search: forwards the query to Discogs and returns up
//! to 12 release summaries. An empty upstream result set is reported as
//! `success: false` with status 200, per the documented interface.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::services::discogs_client::SearchRelease;
use crate::AppState;

/// POST /search request
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}

/// One release summary in a search response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecordView {
    pub id: Option<u64>,
    pub resource_url: String,
    pub title: String,
    pub year: Option<String>,
    pub country: Option<String>,
    pub cover_image: Option<String>,
}

/// POST /search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<SearchRecordView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SearchRelease> for SearchRecordView {
    fn from(release: SearchRelease) -> Self {
        Self {
            id: release.id,
            resource_url: release.resource_url,
            title: release.title,
            year: release.year,
            country: release.country,
            cover_image: release.cover_image.or(release.thumb),
        }
    }
}

/// POST /search
pub async fn search_records(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let releases = state.discogs.search_releases(query).await.map_err(|e| {
        warn!(query = %query, error = %e, "Catalog search failed");
        ApiError::Internal("Search failed".to_string())
    })?;

    if releases.is_empty() {
        return Ok(Json(SearchResponse {
            success: false,
            records: None,
            error: Some("No results found".to_string()),
        }));
    }

    Ok(Json(SearchResponse {
        success: true,
        records: Some(releases.into_iter().map(SearchRecordView::from).collect()),
        error: None,
    }))
}

/// Build search routes
pub fn search_routes() -> Router<AppState> {
    Router::new().route("/search", post(search_records))
}
