//! HTTP surface over ingestion, catalog maintenance and table exports

pub mod routes;
pub mod types;

pub use routes::{AppState, ErrorResponse, api_routes};
