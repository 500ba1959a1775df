//! Partitioning of objects by owning well
//!
//! Every mapobject, segmentation and value record carries the id of the well
//! it belongs to. No query or write crosses that boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{
    MapobjectError, MapobjectSegmentation, Mapobject, ReferenceInstance, Site, ValueRecord, Well,
};

/// Sharding key: id of the owning well
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(pub u64);

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assignment and validation rules for partition keys
pub struct PartitionScheme;

impl PartitionScheme {
    pub fn for_well(well: &Well) -> PartitionKey {
        PartitionKey(well.id)
    }

    pub fn for_site(site: &Site) -> PartitionKey {
        PartitionKey(site.well_id)
    }

    /// Partition of a well or site instance. A plate spans many wells and
    /// therefore has no single partition.
    pub fn for_instance(instance: &ReferenceInstance) -> Result<PartitionKey, MapobjectError> {
        match instance {
            ReferenceInstance::Well { well, .. } => Ok(Self::for_well(well)),
            ReferenceInstance::Site { site, .. } => Ok(Self::for_site(site)),
            ReferenceInstance::Plate(plate) => Err(MapobjectError::MalformedInput(format!(
                "plate \"{}\" spans multiple partitions; select a well or site",
                plate.name
            ))),
        }
    }

    /// A segmentation must live in the same partition as its mapobject
    pub fn validate_segmentation(
        segmentation: &MapobjectSegmentation,
        mapobject: &Mapobject,
    ) -> Result<(), MapobjectError> {
        if segmentation.mapobject_id != mapobject.id {
            return Err(MapobjectError::MalformedInput(format!(
                "segmentation references mapobject {} but was checked against {}",
                segmentation.mapobject_id, mapobject.id
            )));
        }
        if segmentation.partition_key != mapobject.partition_key {
            return Err(MapobjectError::MalformedInput(format!(
                "segmentation of mapobject {} is in partition {} but the mapobject is in {}",
                mapobject.id, segmentation.partition_key, mapobject.partition_key
            )));
        }
        Ok(())
    }

    /// A value record must live in the same partition as its mapobject
    pub fn validate_value(record: &ValueRecord, mapobject: &Mapobject) -> Result<(), MapobjectError> {
        if record.partition_key != mapobject.partition_key {
            return Err(MapobjectError::MalformedInput(format!(
                "values of mapobject {} are in partition {} but the mapobject is in {}",
                mapobject.id, record.partition_key, mapobject.partition_key
            )));
        }
        Ok(())
    }
}
