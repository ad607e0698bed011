//! Record enrichment pipeline
//!
//! Linear orchestration: admission check → catalog search → detail fetch →
//! description generation. Stages run strictly in sequence because each
//! stage's output feeds the next; there is no retry and no partial result.
//! The admission check charges the caller's quota before any network I/O;
//! the three network stages run under one overall deadline, and on expiry
//! the in-flight call is dropped (aborting the request) rather than left to
//! run in the background.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::AppState;

use super::anthropic_client::AnthropicError;
use super::discogs_client::{DiscogsError, EnrichedRecord};

/// Enrichment pipeline errors
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Quota exhausted; recoverable by waiting until `reset_at`
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("{0}")]
    Catalog(#[from] DiscogsError),

    #[error("{0}")]
    Generation(#[from] AnthropicError),

    #[error("Enrichment timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Success projection returned to callers: an explicit allow-list of record
/// fields plus the generated explanation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub title: String,
    pub year: Option<String>,
    pub format: Vec<String>,
    pub cover_image: Option<String>,
    pub label: Option<String>,
    pub country: Option<String>,
    pub genre: Vec<String>,
    pub style: Vec<String>,
    pub want_count: Option<u64>,
    pub have_count: Option<u64>,
    pub lowest_price: Option<f64>,
    pub num_for_sale: Option<u32>,
}

impl From<&EnrichedRecord> for RecordView {
    fn from(record: &EnrichedRecord) -> Self {
        Self {
            title: record.title.clone(),
            year: record.year.clone(),
            format: record.format.clone(),
            cover_image: record.cover_image.clone(),
            label: record.label.first().cloned(),
            country: record.country.clone(),
            genre: record.genre.clone(),
            style: record.style.clone(),
            want_count: record.want,
            have_count: record.have,
            lowest_price: record.lowest_price,
            num_for_sale: record.num_for_sale,
        }
    }
}

/// Completed enrichment
#[derive(Debug)]
pub struct Enrichment {
    pub record: RecordView,
    pub explanation: String,
    /// Requests left in the caller's admission window
    pub remaining: u32,
}

/// Run the full enrichment pipeline for one request.
///
/// Failures are caught once here: each is logged with the caller identity
/// and the failing stage, recorded as the service's last error, and
/// propagated for the handler to map onto the HTTP contract.
pub async fn enrich(
    state: &AppState,
    identity: &str,
    query: &str,
) -> Result<Enrichment, EnrichError> {
    let decision = state.rate_limiter.check(identity);
    if !decision.allowed {
        let reset_at = decision.reset_at.unwrap_or_else(Utc::now);
        warn!(identity = %identity, reset_at = %reset_at, "Enrichment denied: rate limit exceeded");
        return Err(EnrichError::RateLimited { reset_at });
    }

    let deadline = state.config.deadline;
    let result = match tokio::time::timeout(deadline, run_stages(state, identity, query)).await {
        Ok(result) => result,
        Err(_) => Err(EnrichError::Timeout(deadline)),
    };

    match result {
        Ok((record, explanation)) => {
            info!(
                identity = %identity,
                title = %record.title,
                remaining = decision.remaining,
                "Enrichment complete"
            );
            Ok(Enrichment {
                record: RecordView::from(&record),
                explanation,
                remaining: decision.remaining,
            })
        }
        Err(error) => {
            let (stage, status) = failure_context(&error);
            warn!(
                identity = %identity,
                stage = stage,
                status = status,
                error = %error,
                "Enrichment failed"
            );
            let mut last_error = state.last_error.write().await;
            *last_error = Some(error.to_string());
            Err(error)
        }
    }
}

async fn run_stages(
    state: &AppState,
    identity: &str,
    query: &str,
) -> Result<(EnrichedRecord, String), EnrichError> {
    let summary = state.discogs.search(query).await?;
    info!(identity = %identity, title = %summary.title, "Catalog match found");

    let detail = state.discogs.release_details(&summary.resource_url).await?;
    let record = EnrichedRecord::merge(summary, detail);

    let explanation = state.anthropic.explain(&record).await?;

    Ok((record, explanation))
}

/// Failing stage and upstream status (where available) for diagnostics.
fn failure_context(error: &EnrichError) -> (&'static str, Option<u16>) {
    match error {
        EnrichError::RateLimited { .. } => ("admission", None),
        EnrichError::Catalog(DiscogsError::NoResults) => ("search", None),
        EnrichError::Catalog(DiscogsError::ApiStatus(status, _)) => ("catalog", Some(*status)),
        EnrichError::Catalog(_) => ("catalog", None),
        EnrichError::Generation(AnthropicError::ApiStatus(status, _)) => {
            ("generation", Some(*status))
        }
        EnrichError::Generation(_) => ("generation", None),
        EnrichError::Timeout(_) => ("deadline", None),
    }
}
