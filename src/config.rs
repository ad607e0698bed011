//! Configuration resolution for wax-enrich
//!
//! Two-tier resolution with ENV → TOML priority. Both upstream credentials
//! (Discogs token, Anthropic API key) are required; startup fails with an
//! actionable message when either is missing, rather than surfacing an
//! opaque downstream failure on the first request.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::anthropic_client::DEFAULT_MODEL;

/// Default requests admitted per identity per window
pub const DEFAULT_MAX_REQUESTS: u32 = 10;
/// Default admission window (1 hour)
pub const DEFAULT_WINDOW_SECS: u64 = 3600;
/// Default overall pipeline deadline (three sequential upstream calls)
pub const DEFAULT_DEADLINE_SECS: u64 = 45;
/// Upper bound on the admission window (one year); keeps the window
/// representable for reset-time arithmetic
pub const MAX_WINDOW_SECS: u64 = 31_536_000;
/// Default generation token budget
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Discogs personal access token (server-held, never echoed to callers)
    pub discogs_token: String,
    /// Anthropic API key (server-held)
    pub anthropic_api_key: String,
    /// Generation model identifier
    pub model: String,
    /// Generation token budget
    pub max_tokens: u32,
    /// Generation policy: grant the web-search tool to the generator
    pub web_search: bool,
    /// Requests admitted per identity per window
    pub max_requests: u32,
    /// Admission window duration
    pub window: Duration,
    /// Overall enrichment pipeline deadline
    pub deadline: Duration,
}

/// TOML fallback tier (`wax-enrich.toml`)
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub discogs_token: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub web_search: Option<bool>,
    pub rate_limit_max_requests: Option<u32>,
    pub rate_limit_window_secs: Option<u64>,
    pub deadline_secs: Option<u64>,
}

impl AppConfig {
    /// Resolve configuration from the process environment plus an optional
    /// TOML file.
    pub fn resolve(toml_path: &Path) -> Result<Self, ConfigError> {
        let toml_config = load_toml(toml_path)?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::resolve_from(&env, &toml_config)
    }

    /// Pure resolution against an explicit environment map (testable without
    /// mutating process-global state).
    pub fn resolve_from(
        env: &HashMap<String, String>,
        toml_config: &TomlConfig,
    ) -> Result<Self, ConfigError> {
        let discogs_token = resolve_credential(
            "Discogs token",
            "DISCOGS_TOKEN",
            env.get("DISCOGS_TOKEN"),
            toml_config.discogs_token.as_ref(),
            "discogs_token",
            "https://www.discogs.com/settings/developers",
        )?;

        let anthropic_api_key = resolve_credential(
            "Anthropic API key",
            "ANTHROPIC_API_KEY",
            env.get("ANTHROPIC_API_KEY"),
            toml_config.anthropic_api_key.as_ref(),
            "anthropic_api_key",
            "https://console.anthropic.com/settings/keys",
        )?;

        let model = env
            .get("WAX_ENRICH_MODEL")
            .cloned()
            .or_else(|| toml_config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = resolve_number(
            env.get("WAX_ENRICH_MAX_TOKENS"),
            toml_config.max_tokens,
            DEFAULT_MAX_TOKENS,
            "WAX_ENRICH_MAX_TOKENS",
        )?;

        let web_search = match env.get("WAX_ENRICH_WEB_SEARCH").map(String::as_str) {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "WAX_ENRICH_WEB_SEARCH".to_string(),
                    message: format!("expected true/false, got {:?}", other),
                })
            }
            None => toml_config.web_search.unwrap_or(false),
        };

        let max_requests = resolve_number(
            env.get("WAX_ENRICH_RATE_LIMIT_MAX"),
            toml_config.rate_limit_max_requests,
            DEFAULT_MAX_REQUESTS,
            "WAX_ENRICH_RATE_LIMIT_MAX",
        )?;
        if max_requests == 0 {
            return Err(ConfigError::Invalid {
                key: "WAX_ENRICH_RATE_LIMIT_MAX".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        let window_secs = resolve_number(
            env.get("WAX_ENRICH_RATE_LIMIT_WINDOW_SECS"),
            toml_config.rate_limit_window_secs,
            DEFAULT_WINDOW_SECS,
            "WAX_ENRICH_RATE_LIMIT_WINDOW_SECS",
        )?;
        if window_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "WAX_ENRICH_RATE_LIMIT_WINDOW_SECS".to_string(),
                message: "must be a positive number of seconds".to_string(),
            });
        }
        if window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid {
                key: "WAX_ENRICH_RATE_LIMIT_WINDOW_SECS".to_string(),
                message: format!("must be at most {} seconds (one year)", MAX_WINDOW_SECS),
            });
        }

        let deadline_secs = resolve_number(
            env.get("WAX_ENRICH_DEADLINE_SECS"),
            toml_config.deadline_secs,
            DEFAULT_DEADLINE_SECS,
            "WAX_ENRICH_DEADLINE_SECS",
        )?;

        Ok(AppConfig {
            discogs_token,
            anthropic_api_key,
            model,
            max_tokens,
            web_search,
            max_requests,
            window: Duration::from_secs(window_secs),
            deadline: Duration::from_secs(deadline_secs),
        })
    }
}

/// Validate a credential value (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn load_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;

    info!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Resolve one credential with ENV → TOML priority.
///
/// Warns if the credential is present in multiple sources (potential
/// misconfiguration) and uses the environment value.
fn resolve_credential(
    label: &str,
    env_var: &str,
    env_value: Option<&String>,
    toml_value: Option<&String>,
    toml_key: &str,
    obtain_url: &str,
) -> Result<String, ConfigError> {
    let env_value = env_value.filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in multiple sources: environment, TOML. Using environment (highest priority).",
            label
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Ok(value.clone());
    }

    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", label);
        return Ok(value.clone());
    }

    Err(ConfigError::Missing(format!(
        "{} not configured. Please configure using one of:\n\
         1. Environment: {}=your-key-here\n\
         2. TOML config: wax-enrich.toml ({} = \"your-key\")\n\
         \n\
         Obtain a key at: {}",
        label, env_var, toml_key, obtain_url
    )))
}

fn resolve_number<T>(
    env_value: Option<&String>,
    toml_value: Option<T>,
    default: T,
    key: &str,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env_value {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(toml_value.unwrap_or(default)),
    }
}
