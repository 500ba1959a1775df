//! Mapobjects Server Library
//!
//! Segmented objects of plate/well/site imaging experiments: polygon
//! extraction from label images, containment queries against reference
//! regions and streamed value tables. Exported for integration tests and
//! external tooling.

pub mod api;
pub mod config;
pub mod geometry;
pub mod ingest;
pub mod layout;
pub mod model;
pub mod partition;
pub mod query;
pub mod store;
pub mod table;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use api::{AppState, api_routes};
pub use model::MapobjectError;
pub use store::{MapobjectStore, MemoryStore};
