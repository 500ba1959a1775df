//! Ingestion of segmentations, feature values and label results

pub mod service;
pub mod types;

pub use service::IngestService;
pub use types::{FeatureValueBatch, LabelResultRequest, Reconstruction};
