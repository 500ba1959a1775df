//! Mapobject data model
//!
//! Records shared by the store, query engine, table assembler and ingestion.

pub mod label_result;
pub mod types;
pub mod values;

pub use label_result::{Attributes, LabelResult, LabelResultKind, summarize};
pub use types::{
    Feature, FeatureId, LabelResultId, LayerId, Mapobject, MapobjectError, MapobjectId,
    MapobjectSegmentation, MapobjectType, MapobjectTypeId, Plate, PlateId, ReferenceInstance,
    ReferenceKind, SegmentationLayer, Site, SiteId, ValueKind, ValueRecord, Well, WellId,
};
pub use values::SparseValues;
