//! Mapobject data model and the crate-wide error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{GeometryError, Offset, Point, Polygon};
use crate::partition::PartitionKey;

use super::values::SparseValues;

pub type MapobjectId = u64;
pub type MapobjectTypeId = u64;
pub type LayerId = u64;
pub type FeatureId = u64;
pub type LabelResultId = u64;
pub type PlateId = u64;
pub type WellId = u64;
pub type SiteId = u64;

/// Errors surfaced by resolution, querying, assembly and ingestion
#[derive(Debug, Error)]
pub enum MapobjectError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Geometry error: {0}")]
    Geometry(GeometryError),

    #[error("Label {label} already exists in segmentation layer {layer_id} of partition {partition}")]
    Conflict {
        label: u32,
        layer_id: LayerId,
        partition: PartitionKey,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MapobjectError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            MapobjectError::MalformedInput(_) => "malformed_input",
            MapobjectError::NotFound(_) => "not_found",
            MapobjectError::Geometry(_) => "geometry_error",
            MapobjectError::Conflict { .. } => "conflict",
            MapobjectError::Storage(_) => "storage_error",
        }
    }
}

impl From<GeometryError> for MapobjectError {
    fn from(e: GeometryError) -> Self {
        match e {
            GeometryError::Overlap { .. }
            | GeometryError::ShapeMismatch { .. }
            | GeometryError::BackgroundLabel => MapobjectError::MalformedInput(e.to_string()),
            other => MapobjectError::Geometry(other),
        }
    }
}

/// Granularity of the region a mapobject type is always contained within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    Plate,
    Well,
    Site,
}

impl ReferenceKind {
    /// Higher is finer
    fn rank(self) -> u8 {
        match self {
            ReferenceKind::Plate => 0,
            ReferenceKind::Well => 1,
            ReferenceKind::Site => 2,
        }
    }

    /// True when `self` covers a larger region than `other`
    pub fn is_coarser_than(self, other: ReferenceKind) -> bool {
        self.rank() < other.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::Plate => "Plate",
            ReferenceKind::Well => "Well",
            ReferenceKind::Site => "Site",
        }
    }
}

impl std::str::FromStr for ReferenceKind {
    type Err = MapobjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plate" => Ok(ReferenceKind::Plate),
            "well" => Ok(ReferenceKind::Well),
            "site" => Ok(ReferenceKind::Site),
            _ => Err(MapobjectError::MalformedInput(format!(
                "unknown reference type \"{}\"",
                s
            ))),
        }
    }
}

/// A class of objects (e.g. "Cells"), anchored at a reference granularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapobjectType {
    pub id: MapobjectTypeId,
    pub name: String,
    pub reference_kind: ReferenceKind,
    /// Static types describe the plates, wells and sites themselves
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapobject {
    pub id: MapobjectId,
    pub mapobject_type_id: MapobjectTypeId,
    pub partition_key: PartitionKey,
    /// Plate, well or site id for objects of static types
    pub ref_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentationLayer {
    pub id: LayerId,
    pub mapobject_type_id: MapobjectTypeId,
    pub tpoint: u32,
    pub zplane: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapobjectSegmentation {
    pub mapobject_id: MapobjectId,
    pub segmentation_layer_id: LayerId,
    pub partition_key: PartitionKey,
    pub label: u32,
    pub polygon: Polygon,
    pub centroid: Point,
}

/// Named numeric attribute of a mapobject type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub name: String,
    pub mapobject_type_id: MapobjectTypeId,
}

/// Which value table a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Feature,
    Label,
}

/// Sparse values of one object at one time point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub partition_key: PartitionKey,
    pub mapobject_id: MapobjectId,
    pub tpoint: u32,
    pub values: SparseValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub id: PlateId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub id: WellId,
    pub plate_id: PlateId,
    pub name: String,
    pub offset: Offset,
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub well_id: WellId,
    /// Row position within the well
    pub y: u32,
    /// Column position within the well
    pub x: u32,
    pub offset: Offset,
    pub height: usize,
    pub width: usize,
}

/// Plate, well or site used as the containment boundary of a query
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceInstance {
    Plate(Plate),
    Well { plate: Plate, well: Well },
    Site { plate: Plate, well: Well, site: Site },
}

impl ReferenceInstance {
    pub fn kind(&self) -> ReferenceKind {
        match self {
            ReferenceInstance::Plate(_) => ReferenceKind::Plate,
            ReferenceInstance::Well { .. } => ReferenceKind::Well,
            ReferenceInstance::Site { .. } => ReferenceKind::Site,
        }
    }

    /// Id of the plate, well or site itself
    pub fn ref_id(&self) -> u64 {
        match self {
            ReferenceInstance::Plate(plate) => plate.id,
            ReferenceInstance::Well { well, .. } => well.id,
            ReferenceInstance::Site { site, .. } => site.id,
        }
    }

    pub fn plate(&self) -> &Plate {
        match self {
            ReferenceInstance::Plate(plate) => plate,
            ReferenceInstance::Well { plate, .. } | ReferenceInstance::Site { plate, .. } => plate,
        }
    }

    pub fn well(&self) -> Option<&Well> {
        match self {
            ReferenceInstance::Plate(_) => None,
            ReferenceInstance::Well { well, .. } | ReferenceInstance::Site { well, .. } => {
                Some(well)
            }
        }
    }

    pub fn site(&self) -> Option<&Site> {
        match self {
            ReferenceInstance::Site { site, .. } => Some(site),
            _ => None,
        }
    }

    /// Top-left corner of the instance's image in the global frame
    pub fn offset(&self) -> Option<Offset> {
        match self {
            ReferenceInstance::Plate(_) => None,
            ReferenceInstance::Well { well, .. } => Some(well.offset),
            ReferenceInstance::Site { site, .. } => Some(site.offset),
        }
    }

    /// Image size as (height, width)
    pub fn image_size(&self) -> Option<(usize, usize)> {
        match self {
            ReferenceInstance::Plate(_) => None,
            ReferenceInstance::Well { well, .. } => Some((well.height, well.width)),
            ReferenceInstance::Site { site, .. } => Some((site.height, site.width)),
        }
    }

    /// Short human-readable description for logs
    pub fn describe(&self) -> String {
        match self {
            ReferenceInstance::Plate(plate) => format!("plate \"{}\"", plate.name),
            ReferenceInstance::Well { plate, well } => {
                format!("well \"{}\" of plate \"{}\"", well.name, plate.name)
            }
            ReferenceInstance::Site { plate, well, site } => format!(
                "site (y={}, x={}) of well \"{}\" of plate \"{}\"",
                site.y, site.x, well.name, plate.name
            ),
        }
    }
}
