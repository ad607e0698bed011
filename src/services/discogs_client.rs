//! Discogs catalog client
//!
//! Wraps the two catalog endpoints the enrichment pipeline needs: free-text
//! release search and release detail fetch by resource URL. The access token
//! is server-held configuration, appended to outbound requests as a query
//! parameter and never echoed to callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DISCOGS_BASE_URL: &str = "https://api.discogs.com";
const USER_AGENT: &str = "WaxEnrich/0.1.0 +https://github.com/wax-enrich/wax-enrich";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Results returned per search page (and the cap on the search endpoint)
pub const SEARCH_PAGE_SIZE: usize = 12;

/// Discogs client errors
#[derive(Debug, Error)]
pub enum DiscogsError {
    #[error("Network error: {0}")]
    Network(String),

    /// Search matched nothing; the caller should rephrase the query
    #[error("No results found")]
    NoResults,

    #[error("Catalog API error {0}: {1}")]
    ApiStatus(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One release summary from a catalog search
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRelease {
    pub id: Option<u64>,
    /// Locator for the full release detail
    pub resource_url: String,
    pub title: String,
    /// Search results carry the year as a string
    pub year: Option<String>,
    pub country: Option<String>,
    pub cover_image: Option<String>,
    pub thumb: Option<String>,
    #[serde(default)]
    pub label: Vec<String>,
    #[serde(default)]
    pub format: Vec<String>,
    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub style: Vec<String>,
    pub catno: Option<String>,
}

/// Full release detail fetched via `resource_url`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseDetail {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub country: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    pub lowest_price: Option<f64>,
    pub num_for_sale: Option<u32>,
    pub community: Option<CommunityStats>,
}

/// Collector want/have counts for a release
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CommunityStats {
    pub want: u64,
    pub have: u64,
}

/// Search summary merged with release detail; the unit handed to the
/// text-generation stage. Detail fields take precedence on collision.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub title: String,
    pub year: Option<String>,
    pub country: Option<String>,
    pub label: Vec<String>,
    pub format: Vec<String>,
    pub catno: Option<String>,
    pub genre: Vec<String>,
    pub style: Vec<String>,
    pub cover_image: Option<String>,
    pub want: Option<u64>,
    pub have: Option<u64>,
    pub lowest_price: Option<f64>,
    pub num_for_sale: Option<u32>,
}

impl EnrichedRecord {
    /// Merge a search summary with its release detail. Fields present in the
    /// detail overwrite the summary's values; label, format, catalog number
    /// and cover art only exist on the summary side.
    pub fn merge(summary: SearchRelease, detail: ReleaseDetail) -> Self {
        Self {
            title: detail.title.unwrap_or(summary.title),
            year: detail.year.map(|y| y.to_string()).or(summary.year),
            country: detail.country.or(summary.country),
            label: summary.label,
            format: summary.format,
            catno: summary.catno,
            genre: if detail.genres.is_empty() {
                summary.genre
            } else {
                detail.genres
            },
            style: if detail.styles.is_empty() {
                summary.style
            } else {
                detail.styles
            },
            cover_image: summary.cover_image.or(summary.thumb),
            want: detail.community.map(|c| c.want),
            have: detail.community.map(|c| c.have),
            lowest_price: detail.lowest_price,
            num_for_sale: detail.num_for_sale,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchRelease>,
}

/// Discogs API client
pub struct DiscogsClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
}

impl DiscogsClient {
    pub fn new(token: String) -> Result<Self, DiscogsError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DiscogsError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: DISCOGS_BASE_URL.to_string(),
            token,
        })
    }

    /// Override the API base URL (stub servers in tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Search the catalog and take the best (first) release match.
    ///
    /// No ranking or disambiguation beyond upstream ordering; known
    /// limitation of the search contract.
    pub async fn search(&self, query: &str) -> Result<SearchRelease, DiscogsError> {
        let mut results = self.search_releases(query).await?;
        if results.is_empty() {
            return Err(DiscogsError::NoResults);
        }
        Ok(results.remove(0))
    }

    /// Search the catalog, returning up to [`SEARCH_PAGE_SIZE`] release
    /// summaries. An empty result set is returned as-is; the caller decides
    /// whether that is an error.
    pub async fn search_releases(&self, query: &str) -> Result<Vec<SearchRelease>, DiscogsError> {
        let url = format!("{}/database/search", self.base_url);
        let per_page = SEARCH_PAGE_SIZE.to_string();

        debug!(query = %query, "Searching Discogs catalog");

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("q", query),
                ("type", "release"),
                ("token", self.token.as_str()),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DiscogsError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DiscogsError::ApiStatus(status.as_u16(), error_text));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| DiscogsError::Parse(e.to_string()))?;

        let mut results = payload.results;
        results.truncate(SEARCH_PAGE_SIZE);

        debug!(query = %query, results = results.len(), "Catalog search complete");
        Ok(results)
    }

    /// Fetch full release detail via the locator returned by search.
    pub async fn release_details(&self, resource_url: &str) -> Result<ReleaseDetail, DiscogsError> {
        debug!(resource_url = %resource_url, "Fetching release detail");

        let response = self
            .http_client
            .get(resource_url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await
            .map_err(|e| DiscogsError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DiscogsError::ApiStatus(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| DiscogsError::Parse(e.to_string()))
    }
}
