//! Anthropic Messages API client
//!
//! Turns an enriched catalog record into a short collector-oriented
//! description. The prompt embeds the record's metadata, a deterministic
//! demand classification, and a pricing clause; the response's text blocks
//! are concatenated in order (tool-use blocks are skipped).
//!
//! Generation policy: the web-search tool is granted only when enabled in
//! configuration. With the tool, the prompt asks for a slightly longer
//! description sourced from music-review sites; without it, a plain 2-4
//! sentence description. Errors are propagated unmodified; this stage never
//! retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::discogs_client::EnrichedRecord;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";
const WEB_SEARCH_MAX_USES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(40);

/// Default generation model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic client errors
#[derive(Debug, Error)]
pub enum AnthropicError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Generation API error {0}: {1}")]
    ApiStatus(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<MessageParam<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolParam<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageParam<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ToolParam<'a> {
    #[serde(rename = "type")]
    tool_type: &'a str,
    name: &'a str,
    max_uses: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// One content block of a Messages response. Only text blocks contribute to
/// the extracted explanation; tool-use and other block types are skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Anthropic Messages API client
pub struct AnthropicClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    web_search: bool,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Result<Self, AnthropicError> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AnthropicError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key,
            model,
            max_tokens: 1024,
            web_search: false,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Grant the generator the web-search tool
    pub fn with_web_search(mut self, web_search: bool) -> Self {
        self.web_search = web_search;
        self
    }

    /// Override the API base URL (stub servers in tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Generate a collector-oriented description for `record`.
    pub async fn explain(&self, record: &EnrichedRecord) -> Result<String, AnthropicError> {
        let prompt = build_prompt(record, self.web_search);
        let tools = if self.web_search {
            vec![ToolParam {
                tool_type: WEB_SEARCH_TOOL_TYPE,
                name: "web_search",
                max_uses: WEB_SEARCH_MAX_USES,
            }]
        } else {
            Vec::new()
        };

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![MessageParam {
                role: "user",
                content: prompt,
            }],
            tools,
        };

        debug!(model = %self.model, web_search = self.web_search, "Requesting record description");

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnthropicError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnthropicError::ApiStatus(status.as_u16(), error_text));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AnthropicError::Parse(e.to_string()))?;

        Ok(collect_text(&payload.content))
    }
}

/// Concatenate all text blocks in response order, skipping non-text blocks.
fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect()
}

/// Classify collector demand from want/have counts.
///
/// Thresholds are part of the external contract: `want > have` is high
/// demand, `want > have * 0.5` is moderate, anything else is relatively
/// available.
pub fn demand_label(want: u64, have: u64) -> &'static str {
    if want > have {
        "high demand"
    } else if want as f64 > have as f64 * 0.5 {
        "moderate demand"
    } else {
        "relatively available"
    }
}

/// Marketplace pricing clause for the prompt.
fn pricing_clause(record: &EnrichedRecord) -> String {
    match record.lowest_price {
        Some(price) => format!(
            "currently listed from ${:.2} with {} copies for sale",
            price,
            record.num_for_sale.unwrap_or(0)
        ),
        None => "not currently available on the marketplace".to_string(),
    }
}

fn build_prompt(record: &EnrichedRecord, web_search: bool) -> String {
    let demand = demand_label(record.want.unwrap_or(0), record.have.unwrap_or(0));
    let pricing = pricing_clause(record);

    let mut prompt = format!(
        "You are a knowledgeable vinyl record dealer. Describe this record for a potential buyer:\n\
         \n\
         Title: {}\n\
         Year: {}\n\
         Label: {}\n\
         Format: {}\n\
         Country: {}\n\
         Catalog number: {}\n\
         Genre: {}\n\
         Style: {}\n\
         Collector demand: {}\n\
         Marketplace: {}\n",
        record.title,
        record.year.as_deref().unwrap_or("Unknown"),
        record.label.first().map(String::as_str).unwrap_or("Unknown"),
        join_or_unknown(&record.format),
        record.country.as_deref().unwrap_or("Unknown"),
        record.catno.as_deref().unwrap_or("Unknown"),
        join_or_unknown(&record.genre),
        join_or_unknown(&record.style),
        demand,
        pricing,
    );

    if web_search {
        prompt.push_str(
            "\nIf you are not familiar with this release, use web search to consult \
             music review sources. Write a 3-4 sentence description covering the \
             record's sonic character, its genre placement, the label's reputation, \
             and the pressing's rarity and collectibility.",
        );
    } else {
        prompt.push_str(
            "\nWrite a short 2-4 sentence description covering the record's sonic \
             character, its genre placement, and its collectibility.",
        );
    }

    prompt
}

fn join_or_unknown(values: &[String]) -> String {
    if values.is_empty() {
        "Unknown".to_string()
    } else {
        values.join(", ")
    }
}
