//! MapobjectStore trait definition

use async_trait::async_trait;

use crate::geometry::{Offset, Polygon};
use crate::model::{
    Attributes, Feature, FeatureId, LabelResult, LabelResultKind, LayerId,
    MapobjectError, MapobjectId, MapobjectSegmentation, MapobjectType, MapobjectTypeId, Plate,
    PlateId, ReferenceKind, SegmentationLayer, Site, SparseValues, ValueKind, ValueRecord, Well,
    WellId,
};
use crate::partition::PartitionKey;

use super::types::{CoveredSegmentation, PendingSegmentation, WriteSummary};

/// Storage collaborator for mapobjects, their catalogs and the acquisition
/// hierarchy. Implementations own the spatial predicates and the transaction
/// scope of every call.
#[async_trait]
pub trait MapobjectStore: Send + Sync {
    // -- catalog --------------------------------------------------------

    async fn create_mapobject_type(
        &self,
        name: &str,
        reference_kind: ReferenceKind,
    ) -> Result<MapobjectType, MapobjectError>;

    async fn list_mapobject_types(&self) -> Result<Vec<MapobjectType>, MapobjectError>;

    async fn get_mapobject_type(
        &self,
        id: MapobjectTypeId,
    ) -> Result<MapobjectType, MapobjectError>;

    /// Static reference type for a granularity (e.g. the "Sites" type)
    async fn reference_type(&self, kind: ReferenceKind) -> Result<MapobjectType, MapobjectError>;

    /// Remove a type with its mapobjects, segmentations, layers, features,
    /// label results and values
    async fn delete_mapobject_type(&self, id: MapobjectTypeId) -> Result<(), MapobjectError>;

    /// Layers of a type in ascending id order
    async fn list_layers(
        &self,
        mapobject_type_id: MapobjectTypeId,
    ) -> Result<Vec<SegmentationLayer>, MapobjectError>;

    /// Features of a type in ascending id order
    async fn list_features(
        &self,
        mapobject_type_id: MapobjectTypeId,
    ) -> Result<Vec<Feature>, MapobjectError>;

    /// Features for `names`, in the order given, creating missing ones
    async fn get_or_create_features(
        &self,
        mapobject_type_id: MapobjectTypeId,
        names: &[String],
    ) -> Result<Vec<Feature>, MapobjectError>;

    async fn rename_feature(&self, id: FeatureId, name: &str) -> Result<Feature, MapobjectError>;

    /// Remove a feature and drop its key from every value map
    async fn delete_feature(&self, id: FeatureId) -> Result<(), MapobjectError>;

    /// Label results of a type in ascending id order
    async fn list_label_results(
        &self,
        mapobject_type_id: MapobjectTypeId,
    ) -> Result<Vec<LabelResult>, MapobjectError>;

    /// Register a label result together with one value per mapobject at
    /// `tpoint`, all or nothing. Every mapobject must be of the given type.
    async fn create_label_result(
        &self,
        mapobject_type_id: MapobjectTypeId,
        name: &str,
        kind: LabelResultKind,
        attributes: Attributes,
        tpoint: u32,
        values: &[(MapobjectId, f64)],
    ) -> Result<LabelResult, MapobjectError>;

    // -- acquisition hierarchy -------------------------------------------

    async fn register_plate(&self, name: &str) -> Result<Plate, MapobjectError>;

    /// Register a well and its reference object
    async fn register_well(
        &self,
        plate_id: PlateId,
        name: &str,
        offset: Offset,
        height: usize,
        width: usize,
    ) -> Result<Well, MapobjectError>;

    /// Register a site and its reference object
    async fn register_site(
        &self,
        well_id: WellId,
        y: u32,
        x: u32,
        offset: Offset,
        height: usize,
        width: usize,
    ) -> Result<Site, MapobjectError>;

    async fn find_plate(&self, name: &str) -> Result<Option<Plate>, MapobjectError>;

    async fn find_well(&self, plate_id: PlateId, name: &str)
    -> Result<Option<Well>, MapobjectError>;

    async fn find_site(&self, well_id: WellId, y: u32, x: u32)
    -> Result<Option<Site>, MapobjectError>;

    async fn list_plates(&self) -> Result<Vec<Plate>, MapobjectError>;

    async fn list_wells(&self, plate_id: PlateId) -> Result<Vec<Well>, MapobjectError>;

    async fn list_sites(&self, well_id: WellId) -> Result<Vec<Site>, MapobjectError>;

    /// Outline of the reference object for a well or site
    async fn reference_polygon(
        &self,
        kind: ReferenceKind,
        ref_id: u64,
    ) -> Result<Polygon, MapobjectError>;

    // -- objects and segmentations -----------------------------------------

    /// Segmentations in `partition` and `layer_ids` covered by `reference`.
    /// No ordering is guaranteed.
    async fn covered_segmentations(
        &self,
        partition: PartitionKey,
        layer_ids: &[LayerId],
        reference: &Polygon,
    ) -> Result<Vec<CoveredSegmentation>, MapobjectError>;

    /// Segmentations of any layer of `mapobject_type_id` in `partition`
    /// carrying one of `labels`
    async fn segmentations_with_labels(
        &self,
        partition: PartitionKey,
        mapobject_type_id: MapobjectTypeId,
        labels: &[u32],
    ) -> Result<Vec<MapobjectSegmentation>, MapobjectError>;

    /// Write a batch into the (tpoint, zplane) layer of a type within one
    /// partition, creating the layer with it. All or nothing: fails with a
    /// conflict if a label is already taken in that layer.
    async fn insert_segmentations(
        &self,
        partition: PartitionKey,
        mapobject_type_id: MapobjectTypeId,
        tpoint: u32,
        zplane: u32,
        pending: Vec<PendingSegmentation>,
    ) -> Result<WriteSummary, MapobjectError>;

    // -- values -----------------------------------------------------------

    /// Value maps for `keys` (mapobject, tpoint), aligned with `keys`
    async fn fetch_values(
        &self,
        kind: ValueKind,
        partition: PartitionKey,
        keys: &[(MapobjectId, u32)],
    ) -> Result<Vec<Option<SparseValues>>, MapobjectError>;

    /// Merge a batch of value records, all or nothing. Every key of every
    /// record must be registered for the record's mapobject type.
    async fn ingest_values(
        &self,
        kind: ValueKind,
        records: Vec<ValueRecord>,
    ) -> Result<usize, MapobjectError>;
}
