//! Core services: admission control, upstream clients, and the enrichment
//! pipeline that composes them.

pub mod anthropic_client;
pub mod discogs_client;
pub mod enrichment;
pub mod rate_limiter;
