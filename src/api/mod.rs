//! HTTP API handlers for wax-enrich

pub mod enrich;
pub mod health;
pub mod search;

pub use enrich::enrich_routes;
pub use health::health_routes;
pub use search::search_routes;
