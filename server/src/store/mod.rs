//! Storage collaborator
//!
//! The query engine and ingestion talk to storage only through the
//! `MapobjectStore` trait. `MemoryStore` keeps everything in process.

pub mod index;
pub mod memory;
pub mod service;
pub mod types;

pub use memory::MemoryStore;
pub use service::MapobjectStore;
pub use types::{CoveredSegmentation, PendingSegmentation, WriteSummary};
