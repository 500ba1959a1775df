//! Records exchanged with the storage collaborator

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Polygon};
use crate::model::{MapobjectId, MapobjectSegmentation};

/// Segmentation selected by a containment predicate
#[derive(Debug, Clone, PartialEq)]
pub struct CoveredSegmentation {
    pub segmentation: MapobjectSegmentation,
    /// Segmentation intersects the boundary of the reference polygon
    pub is_border: bool,
}

/// Segmentation waiting to be written. `mapobject_id` is set when the label
/// continues an existing mapobject; otherwise a new mapobject is created.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSegmentation {
    pub label: u32,
    pub polygon: Polygon,
    pub centroid: Point,
    pub mapobject_id: Option<MapobjectId>,
}

/// Outcome of writing a batch of segmentations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub created: usize,
    pub reused: usize,
}
