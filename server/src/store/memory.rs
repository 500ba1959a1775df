//! In-memory mapobject store
//!
//! All tables live behind one `RwLock`. Each partition keeps its own R-tree
//! over segmentation bounding boxes; exact predicates run after the read lock
//! is released. Writers to the same partition are serialised by a mutex held
//! in a `DashMap`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::geometry::{Offset, PlanarPredicate, Point, Polygon, SpatialPredicate};
use crate::model::{
    Attributes, Feature, FeatureId, LabelResult, LabelResultId, LabelResultKind, LayerId,
    Mapobject, MapobjectError, MapobjectId, MapobjectSegmentation, MapobjectType,
    MapobjectTypeId, Plate, PlateId, ReferenceKind, SegmentationLayer, Site, SiteId,
    SparseValues, ValueKind, ValueRecord, Well, WellId,
};
use crate::partition::{PartitionKey, PartitionScheme};

use super::index::{SegmentationEntry, SegmentationIndex};
use super::service::MapobjectStore;
use super::types::{CoveredSegmentation, PendingSegmentation, WriteSummary};

const WELL_TYPE_NAME: &str = "Wells";
const SITE_TYPE_NAME: &str = "Sites";

#[derive(Default)]
struct IdCounters {
    plate: u64,
    well: u64,
    site: u64,
    mapobject_type: u64,
    layer: u64,
    feature: u64,
    label_result: u64,
    mapobject: u64,
}

fn next_id(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

#[derive(Default)]
struct PartitionData {
    /// Keyed by (layer, label); a label is unique within one layer
    segmentations: HashMap<(LayerId, u32), MapobjectSegmentation>,
    index: SegmentationIndex,
    feature_values: HashMap<(MapobjectId, u32), SparseValues>,
    label_values: HashMap<(MapobjectId, u32), SparseValues>,
}

impl PartitionData {
    fn values(&self, kind: ValueKind) -> &HashMap<(MapobjectId, u32), SparseValues> {
        match kind {
            ValueKind::Feature => &self.feature_values,
            ValueKind::Label => &self.label_values,
        }
    }

    fn values_mut(&mut self, kind: ValueKind) -> &mut HashMap<(MapobjectId, u32), SparseValues> {
        match kind {
            ValueKind::Feature => &mut self.feature_values,
            ValueKind::Label => &mut self.label_values,
        }
    }

    fn insert_segmentation(&mut self, segmentation: MapobjectSegmentation) {
        if let Some(entry) = SegmentationEntry::new(
            segmentation.segmentation_layer_id,
            segmentation.label,
            &segmentation.polygon,
        ) {
            self.index.insert(entry);
        }
        self.segmentations.insert(
            (segmentation.segmentation_layer_id, segmentation.label),
            segmentation,
        );
    }
}

#[derive(Default)]
struct StoreState {
    ids: IdCounters,
    plates: IndexMap<PlateId, Plate>,
    wells: IndexMap<WellId, Well>,
    sites: IndexMap<SiteId, Site>,
    types: IndexMap<MapobjectTypeId, MapobjectType>,
    layers: IndexMap<LayerId, SegmentationLayer>,
    features: IndexMap<FeatureId, Feature>,
    label_results: IndexMap<LabelResultId, LabelResult>,
    mapobjects: HashMap<MapobjectId, Mapobject>,
    /// (kind, well or site id) -> reference mapobject
    references: HashMap<(ReferenceKind, u64), MapobjectId>,
    partitions: HashMap<PartitionKey, PartitionData>,
}

impl StoreState {
    fn mapobject_type(&self, id: MapobjectTypeId) -> Result<&MapobjectType, MapobjectError> {
        self.types
            .get(&id)
            .ok_or_else(|| MapobjectError::NotFound(format!("mapobject type {}", id)))
    }

    fn static_type(&mut self, kind: ReferenceKind) -> MapobjectTypeId {
        if let Some(t) = self
            .types
            .values()
            .find(|t| t.is_static && t.reference_kind == kind)
        {
            return t.id;
        }
        let id = next_id(&mut self.ids.mapobject_type);
        let name = match kind {
            ReferenceKind::Site => SITE_TYPE_NAME,
            _ => WELL_TYPE_NAME,
        };
        self.types.insert(
            id,
            MapobjectType {
                id,
                name: name.to_string(),
                reference_kind: kind,
                is_static: true,
            },
        );
        id
    }

    fn find_layer(
        &self,
        mapobject_type_id: MapobjectTypeId,
        tpoint: u32,
        zplane: u32,
    ) -> Option<SegmentationLayer> {
        self.layers
            .values()
            .find(|l| {
                l.mapobject_type_id == mapobject_type_id && l.tpoint == tpoint && l.zplane == zplane
            })
            .copied()
    }

    fn layer(&mut self, mapobject_type_id: MapobjectTypeId, tpoint: u32, zplane: u32) -> SegmentationLayer {
        if let Some(layer) = self.find_layer(mapobject_type_id, tpoint, zplane) {
            return layer;
        }
        let layer = SegmentationLayer {
            id: next_id(&mut self.ids.layer),
            mapobject_type_id,
            tpoint,
            zplane,
        };
        self.layers.insert(layer.id, layer);
        layer
    }

    /// Create the static mapobject outlining a well or site
    fn insert_reference(
        &mut self,
        kind: ReferenceKind,
        ref_id: u64,
        partition_key: PartitionKey,
        polygon: Polygon,
    ) {
        let type_id = self.static_type(kind);
        let layer = self.layer(type_id, 0, 0);
        let id = next_id(&mut self.ids.mapobject);
        self.mapobjects.insert(
            id,
            Mapobject {
                id,
                mapobject_type_id: type_id,
                partition_key,
                ref_id: Some(ref_id),
            },
        );

        let partition = self.partitions.entry(partition_key).or_default();
        let label = partition
            .segmentations
            .keys()
            .filter(|(layer_id, _)| *layer_id == layer.id)
            .count() as u32
            + 1;
        let centroid = polygon.centroid().unwrap_or(Point::new(0.0, 0.0));
        partition.insert_segmentation(MapobjectSegmentation {
            mapobject_id: id,
            segmentation_layer_id: layer.id,
            partition_key,
            label,
            polygon,
            centroid,
        });
        self.references.insert((kind, ref_id), id);
    }

    fn value_catalog(&self, kind: ValueKind, mapobject_type_id: MapobjectTypeId) -> HashSet<u64> {
        match kind {
            ValueKind::Feature => self
                .features
                .values()
                .filter(|f| f.mapobject_type_id == mapobject_type_id)
                .map(|f| f.id)
                .collect(),
            ValueKind::Label => self
                .label_results
                .values()
                .filter(|r| r.mapobject_type_id == mapobject_type_id)
                .map(|r| r.id)
                .collect(),
        }
    }
}

/// Store holding every table in memory
pub struct MemoryStore {
    state: RwLock<StoreState>,
    partition_locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
    predicate: Arc<dyn SpatialPredicate>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store using exact planar predicates
    pub fn new() -> Self {
        Self::with_predicate(Arc::new(PlanarPredicate))
    }

    pub fn with_predicate(predicate: Arc<dyn SpatialPredicate>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            partition_locks: DashMap::new(),
            predicate,
        }
    }

    fn partition_lock(&self, partition: PartitionKey) -> Arc<Mutex<()>> {
        self.partition_locks.entry(partition).or_default().clone()
    }
}

#[async_trait]
impl MapobjectStore for MemoryStore {
    async fn create_mapobject_type(
        &self,
        name: &str,
        reference_kind: ReferenceKind,
    ) -> Result<MapobjectType, MapobjectError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MapobjectError::MalformedInput(
                "mapobject type name must not be empty".into(),
            ));
        }
        let mut state = self.state.write().await;
        if state.types.values().any(|t| t.name == name) {
            return Err(MapobjectError::MalformedInput(format!(
                "mapobject type \"{}\" already exists",
                name
            )));
        }
        let mapobject_type = MapobjectType {
            id: next_id(&mut state.ids.mapobject_type),
            name: name.to_string(),
            reference_kind,
            is_static: false,
        };
        state.types.insert(mapobject_type.id, mapobject_type.clone());
        info!(
            "Created mapobject type \"{}\" ({}) anchored at {}",
            mapobject_type.name,
            mapobject_type.id,
            reference_kind.as_str()
        );
        Ok(mapobject_type)
    }

    async fn list_mapobject_types(&self) -> Result<Vec<MapobjectType>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state.types.values().cloned().collect())
    }

    async fn get_mapobject_type(
        &self,
        id: MapobjectTypeId,
    ) -> Result<MapobjectType, MapobjectError> {
        let state = self.state.read().await;
        state.mapobject_type(id).cloned()
    }

    async fn reference_type(&self, kind: ReferenceKind) -> Result<MapobjectType, MapobjectError> {
        let state = self.state.read().await;
        state
            .types
            .values()
            .find(|t| t.is_static && t.reference_kind == kind)
            .cloned()
            .ok_or_else(|| {
                MapobjectError::NotFound(format!("no reference objects for {}", kind.as_str()))
            })
    }

    async fn delete_mapobject_type(&self, id: MapobjectTypeId) -> Result<(), MapobjectError> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        let mapobject_type = state.mapobject_type(id)?;
        if mapobject_type.is_static {
            return Err(MapobjectError::MalformedInput(format!(
                "mapobject type \"{}\" describes the acquisition layout and cannot be deleted",
                mapobject_type.name
            )));
        }

        let layer_ids: HashSet<LayerId> = state
            .layers
            .values()
            .filter(|l| l.mapobject_type_id == id)
            .map(|l| l.id)
            .collect();
        let mapobject_ids: HashSet<MapobjectId> = state
            .mapobjects
            .values()
            .filter(|m| m.mapobject_type_id == id)
            .map(|m| m.id)
            .collect();

        state.layers.retain(|_, l| l.mapobject_type_id != id);
        state.features.retain(|_, f| f.mapobject_type_id != id);
        state.label_results.retain(|_, r| r.mapobject_type_id != id);
        state.mapobjects.retain(|_, m| m.mapobject_type_id != id);
        for partition in state.partitions.values_mut() {
            partition
                .segmentations
                .retain(|(layer_id, _), _| !layer_ids.contains(layer_id));
            partition.index.retain(|e| !layer_ids.contains(&e.layer_id));
            partition
                .feature_values
                .retain(|(mapobject_id, _), _| !mapobject_ids.contains(mapobject_id));
            partition
                .label_values
                .retain(|(mapobject_id, _), _| !mapobject_ids.contains(mapobject_id));
        }
        state.types.shift_remove(&id);

        info!(
            "Deleted mapobject type {} with {} mapobjects and {} layers",
            id,
            mapobject_ids.len(),
            layer_ids.len()
        );
        Ok(())
    }

    async fn list_layers(
        &self,
        mapobject_type_id: MapobjectTypeId,
    ) -> Result<Vec<SegmentationLayer>, MapobjectError> {
        let state = self.state.read().await;
        state.mapobject_type(mapobject_type_id)?;
        let mut layers: Vec<SegmentationLayer> = state
            .layers
            .values()
            .filter(|l| l.mapobject_type_id == mapobject_type_id)
            .copied()
            .collect();
        layers.sort_by_key(|l| l.id);
        Ok(layers)
    }

    async fn list_features(
        &self,
        mapobject_type_id: MapobjectTypeId,
    ) -> Result<Vec<Feature>, MapobjectError> {
        let state = self.state.read().await;
        state.mapobject_type(mapobject_type_id)?;
        let mut features: Vec<Feature> = state
            .features
            .values()
            .filter(|f| f.mapobject_type_id == mapobject_type_id)
            .cloned()
            .collect();
        features.sort_by_key(|f| f.id);
        Ok(features)
    }

    async fn get_or_create_features(
        &self,
        mapobject_type_id: MapobjectTypeId,
        names: &[String],
    ) -> Result<Vec<Feature>, MapobjectError> {
        let mut state = self.state.write().await;
        state.mapobject_type(mapobject_type_id)?;

        let mut features = Vec::with_capacity(names.len());
        for name in names {
            let existing = state
                .features
                .values()
                .find(|f| f.mapobject_type_id == mapobject_type_id && &f.name == name)
                .cloned();
            let feature = match existing {
                Some(feature) => feature,
                None => {
                    let feature = Feature {
                        id: next_id(&mut state.ids.feature),
                        name: name.clone(),
                        mapobject_type_id,
                    };
                    debug!("Created feature \"{}\" ({})", feature.name, feature.id);
                    state.features.insert(feature.id, feature.clone());
                    feature
                }
            };
            features.push(feature);
        }
        Ok(features)
    }

    async fn rename_feature(&self, id: FeatureId, name: &str) -> Result<Feature, MapobjectError> {
        let mut state = self.state.write().await;
        let mapobject_type_id = state
            .features
            .get(&id)
            .map(|f| f.mapobject_type_id)
            .ok_or_else(|| MapobjectError::NotFound(format!("feature {}", id)))?;
        if state
            .features
            .values()
            .any(|f| f.id != id && f.mapobject_type_id == mapobject_type_id && f.name == name)
        {
            return Err(MapobjectError::MalformedInput(format!(
                "feature \"{}\" already exists",
                name
            )));
        }
        let feature = state
            .features
            .get_mut(&id)
            .ok_or_else(|| MapobjectError::NotFound(format!("feature {}", id)))?;
        feature.name = name.to_string();
        Ok(feature.clone())
    }

    async fn delete_feature(&self, id: FeatureId) -> Result<(), MapobjectError> {
        let mut state = self.state.write().await;
        if state.features.shift_remove(&id).is_none() {
            return Err(MapobjectError::NotFound(format!("feature {}", id)));
        }
        for partition in state.partitions.values_mut() {
            for values in partition.feature_values.values_mut() {
                values.remove(id);
            }
        }
        Ok(())
    }

    async fn list_label_results(
        &self,
        mapobject_type_id: MapobjectTypeId,
    ) -> Result<Vec<LabelResult>, MapobjectError> {
        let state = self.state.read().await;
        state.mapobject_type(mapobject_type_id)?;
        let mut results: Vec<LabelResult> = state
            .label_results
            .values()
            .filter(|r| r.mapobject_type_id == mapobject_type_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| r.id);
        Ok(results)
    }

    async fn create_label_result(
        &self,
        mapobject_type_id: MapobjectTypeId,
        name: &str,
        kind: LabelResultKind,
        attributes: Attributes,
        tpoint: u32,
        values: &[(MapobjectId, f64)],
    ) -> Result<LabelResult, MapobjectError> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        state.mapobject_type(mapobject_type_id)?;

        let mut partitions = Vec::with_capacity(values.len());
        for &(id, _) in values {
            let mapobject = state
                .mapobjects
                .get(&id)
                .ok_or_else(|| MapobjectError::NotFound(format!("mapobject {}", id)))?;
            if mapobject.mapobject_type_id != mapobject_type_id {
                return Err(MapobjectError::MalformedInput(format!(
                    "mapobject {} is not of type {}",
                    id, mapobject_type_id
                )));
            }
            partitions.push(mapobject.partition_key);
        }

        let result = LabelResult {
            id: next_id(&mut state.ids.label_result),
            name: name.to_string(),
            mapobject_type_id,
            kind,
            attributes,
        };
        state.label_results.insert(result.id, result.clone());
        for (&(mapobject_id, value), partition) in values.iter().zip(partitions) {
            state
                .partitions
                .entry(partition)
                .or_default()
                .label_values
                .entry((mapobject_id, tpoint))
                .or_default()
                .insert(result.id, value);
        }
        debug!(
            "Created label result \"{}\" ({}) with {} values",
            result.name,
            result.id,
            values.len()
        );
        Ok(result)
    }

    async fn register_plate(&self, name: &str) -> Result<Plate, MapobjectError> {
        let mut state = self.state.write().await;
        if state.plates.values().any(|p| p.name == name) {
            return Err(MapobjectError::MalformedInput(format!(
                "plate \"{}\" already exists",
                name
            )));
        }
        let plate = Plate {
            id: next_id(&mut state.ids.plate),
            name: name.to_string(),
        };
        state.plates.insert(plate.id, plate.clone());
        Ok(plate)
    }

    async fn register_well(
        &self,
        plate_id: PlateId,
        name: &str,
        offset: Offset,
        height: usize,
        width: usize,
    ) -> Result<Well, MapobjectError> {
        let mut state = self.state.write().await;
        if !state.plates.contains_key(&plate_id) {
            return Err(MapobjectError::NotFound(format!("plate {}", plate_id)));
        }
        if height == 0 || width == 0 {
            return Err(MapobjectError::MalformedInput(format!(
                "well \"{}\" has an empty extent",
                name
            )));
        }
        if state
            .wells
            .values()
            .any(|w| w.plate_id == plate_id && w.name == name)
        {
            return Err(MapobjectError::MalformedInput(format!(
                "well \"{}\" already exists",
                name
            )));
        }

        let well = Well {
            id: next_id(&mut state.ids.well),
            plate_id,
            name: name.to_string(),
            offset,
            height,
            width,
        };
        state.wells.insert(well.id, well.clone());
        state.insert_reference(
            ReferenceKind::Well,
            well.id,
            PartitionScheme::for_well(&well),
            Polygon::rectangle(offset, height, width),
        );
        Ok(well)
    }

    async fn register_site(
        &self,
        well_id: WellId,
        y: u32,
        x: u32,
        offset: Offset,
        height: usize,
        width: usize,
    ) -> Result<Site, MapobjectError> {
        let mut state = self.state.write().await;
        let well = state
            .wells
            .get(&well_id)
            .cloned()
            .ok_or_else(|| MapobjectError::NotFound(format!("well {}", well_id)))?;
        if height == 0 || width == 0 {
            return Err(MapobjectError::MalformedInput(format!(
                "site (y={}, x={}) has an empty extent",
                y, x
            )));
        }
        let inside_well = offset.y >= well.offset.y
            && offset.x >= well.offset.x
            && offset.y + height as i64 <= well.offset.y + well.height as i64
            && offset.x + width as i64 <= well.offset.x + well.width as i64;
        if !inside_well {
            return Err(MapobjectError::MalformedInput(format!(
                "site (y={}, x={}) extends beyond well \"{}\"",
                y, x, well.name
            )));
        }
        if state
            .sites
            .values()
            .any(|s| s.well_id == well_id && s.y == y && s.x == x)
        {
            return Err(MapobjectError::MalformedInput(format!(
                "site (y={}, x={}) already exists in well \"{}\"",
                y, x, well.name
            )));
        }

        let site = Site {
            id: next_id(&mut state.ids.site),
            well_id,
            y,
            x,
            offset,
            height,
            width,
        };
        state.sites.insert(site.id, site.clone());
        state.insert_reference(
            ReferenceKind::Site,
            site.id,
            PartitionScheme::for_site(&site),
            Polygon::rectangle(offset, height, width),
        );
        Ok(site)
    }

    async fn find_plate(&self, name: &str) -> Result<Option<Plate>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state.plates.values().find(|p| p.name == name).cloned())
    }

    async fn find_well(
        &self,
        plate_id: PlateId,
        name: &str,
    ) -> Result<Option<Well>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state
            .wells
            .values()
            .find(|w| w.plate_id == plate_id && w.name == name)
            .cloned())
    }

    async fn find_site(
        &self,
        well_id: WellId,
        y: u32,
        x: u32,
    ) -> Result<Option<Site>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state
            .sites
            .values()
            .find(|s| s.well_id == well_id && s.y == y && s.x == x)
            .cloned())
    }

    async fn list_plates(&self) -> Result<Vec<Plate>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state.plates.values().cloned().collect())
    }

    async fn list_wells(&self, plate_id: PlateId) -> Result<Vec<Well>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state
            .wells
            .values()
            .filter(|w| w.plate_id == plate_id)
            .cloned()
            .collect())
    }

    async fn list_sites(&self, well_id: WellId) -> Result<Vec<Site>, MapobjectError> {
        let state = self.state.read().await;
        Ok(state
            .sites
            .values()
            .filter(|s| s.well_id == well_id)
            .cloned()
            .collect())
    }

    async fn reference_polygon(
        &self,
        kind: ReferenceKind,
        ref_id: u64,
    ) -> Result<Polygon, MapobjectError> {
        let state = self.state.read().await;
        let not_found =
            || MapobjectError::NotFound(format!("reference object for {} {}", kind.as_str(), ref_id));

        let mapobject_id = state.references.get(&(kind, ref_id)).ok_or_else(not_found)?;
        let mapobject = state.mapobjects.get(mapobject_id).ok_or_else(not_found)?;
        state
            .partitions
            .get(&mapobject.partition_key)
            .and_then(|p| {
                p.segmentations
                    .values()
                    .find(|s| s.mapobject_id == mapobject.id)
            })
            .map(|s| s.polygon.clone())
            .ok_or_else(not_found)
    }

    async fn covered_segmentations(
        &self,
        partition: PartitionKey,
        layer_ids: &[LayerId],
        reference: &Polygon,
    ) -> Result<Vec<CoveredSegmentation>, MapobjectError> {
        let candidates: Vec<MapobjectSegmentation> = {
            let state = self.state.read().await;
            match state.partitions.get(&partition) {
                Some(data) => data
                    .index
                    .candidates_within(reference)
                    .into_iter()
                    .filter(|e| layer_ids.contains(&e.layer_id))
                    .filter_map(|e| data.segmentations.get(&(e.layer_id, e.label)).cloned())
                    .collect(),
                None => Vec::new(),
            }
        };

        let candidate_count = candidates.len();
        let predicate = self.predicate.clone();
        let reference = reference.clone();
        let covered = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .filter(|s| predicate.covered_by(&s.polygon, &reference))
                .map(|s| {
                    let is_border = predicate.intersects_boundary(&s.polygon, &reference);
                    CoveredSegmentation {
                        segmentation: s,
                        is_border,
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| MapobjectError::Storage(format!("containment task failed: {}", e)))?;

        debug!(
            "Partition {}: {} of {} candidates covered by reference",
            partition,
            covered.len(),
            candidate_count
        );
        Ok(covered)
    }

    async fn segmentations_with_labels(
        &self,
        partition: PartitionKey,
        mapobject_type_id: MapobjectTypeId,
        labels: &[u32],
    ) -> Result<Vec<MapobjectSegmentation>, MapobjectError> {
        let state = self.state.read().await;
        let layer_ids: HashSet<LayerId> = state
            .layers
            .values()
            .filter(|l| l.mapobject_type_id == mapobject_type_id)
            .map(|l| l.id)
            .collect();
        let labels: HashSet<u32> = labels.iter().copied().collect();

        let Some(data) = state.partitions.get(&partition) else {
            return Ok(Vec::new());
        };
        let mut found: Vec<MapobjectSegmentation> = data
            .segmentations
            .iter()
            .filter(|((layer_id, label), _)| layer_ids.contains(layer_id) && labels.contains(label))
            .map(|(_, s)| s.clone())
            .collect();
        found.sort_by_key(|s| (s.mapobject_id, s.segmentation_layer_id));
        Ok(found)
    }

    async fn insert_segmentations(
        &self,
        partition: PartitionKey,
        mapobject_type_id: MapobjectTypeId,
        tpoint: u32,
        zplane: u32,
        mut pending: Vec<PendingSegmentation>,
    ) -> Result<WriteSummary, MapobjectError> {
        let lock = self.partition_lock(partition);
        let _guard = lock.lock().await;

        let mut state = self.state.write().await;
        let state = &mut *state;
        state.mapobject_type(mapobject_type_id)?;

        // Ids are taken only after the whole batch validates
        let existing_layer = state.find_layer(mapobject_type_id, tpoint, zplane);
        let layer_id = existing_layer.map_or(state.ids.layer + 1, |l| l.id);
        let mut next_mapobject = state.ids.mapobject;

        pending.sort_by_key(|p| p.label);
        let existing = state.partitions.get(&partition);
        for (i, p) in pending.iter().enumerate() {
            let taken = existing_layer.is_some()
                && existing.is_some_and(|d| d.segmentations.contains_key(&(layer_id, p.label)));
            let repeated = i > 0 && pending[i - 1].label == p.label;
            if taken || repeated {
                return Err(MapobjectError::Conflict {
                    label: p.label,
                    layer_id,
                    partition,
                });
            }
        }

        let mut staged: Vec<(MapobjectSegmentation, Option<Mapobject>)> =
            Vec::with_capacity(pending.len());
        for p in pending {
            let (mapobject, created) = match p.mapobject_id {
                Some(id) => {
                    let mapobject = state
                        .mapobjects
                        .get(&id)
                        .cloned()
                        .ok_or_else(|| MapobjectError::NotFound(format!("mapobject {}", id)))?;
                    if mapobject.mapobject_type_id != mapobject_type_id {
                        return Err(MapobjectError::MalformedInput(format!(
                            "label {} cannot continue mapobject {} of another type",
                            p.label, id
                        )));
                    }
                    (mapobject, false)
                }
                None => {
                    next_mapobject += 1;
                    let mapobject = Mapobject {
                        id: next_mapobject,
                        mapobject_type_id,
                        partition_key: partition,
                        ref_id: None,
                    };
                    (mapobject, true)
                }
            };
            let segmentation = MapobjectSegmentation {
                mapobject_id: mapobject.id,
                segmentation_layer_id: layer_id,
                partition_key: partition,
                label: p.label,
                polygon: p.polygon,
                centroid: p.centroid,
            };
            PartitionScheme::validate_segmentation(&segmentation, &mapobject)?;
            staged.push((segmentation, created.then_some(mapobject)));
        }

        // Validation passed; nothing below can fail
        let layer = state.layer(mapobject_type_id, tpoint, zplane);
        debug_assert_eq!(layer.id, layer_id);
        state.ids.mapobject = next_mapobject;

        let mut summary = WriteSummary::default();
        for (segmentation, created) in staged {
            match created {
                Some(mapobject) => {
                    state.mapobjects.insert(mapobject.id, mapobject);
                    summary.created += 1;
                }
                None => summary.reused += 1,
            }
            state
                .partitions
                .entry(partition)
                .or_default()
                .insert_segmentation(segmentation);
        }

        debug!(
            "Partition {}, layer {}: created {} and reused {} mapobjects",
            partition, layer.id, summary.created, summary.reused
        );
        Ok(summary)
    }

    async fn fetch_values(
        &self,
        kind: ValueKind,
        partition: PartitionKey,
        keys: &[(MapobjectId, u32)],
    ) -> Result<Vec<Option<SparseValues>>, MapobjectError> {
        let state = self.state.read().await;
        let Some(data) = state.partitions.get(&partition) else {
            return Ok(vec![None; keys.len()]);
        };
        let values = data.values(kind);
        Ok(keys.iter().map(|key| values.get(key).cloned()).collect())
    }

    async fn ingest_values(
        &self,
        kind: ValueKind,
        records: Vec<ValueRecord>,
    ) -> Result<usize, MapobjectError> {
        let mut state = self.state.write().await;
        let state = &mut *state;

        let mut catalogs: HashMap<MapobjectTypeId, HashSet<u64>> = HashMap::new();
        for record in &records {
            let mapobject = state.mapobjects.get(&record.mapobject_id).ok_or_else(|| {
                MapobjectError::NotFound(format!("mapobject {}", record.mapobject_id))
            })?;
            PartitionScheme::validate_value(record, mapobject)?;
            let catalog = catalogs
                .entry(mapobject.mapobject_type_id)
                .or_insert_with(|| state.value_catalog(kind, mapobject.mapobject_type_id));
            if let Some(key) = record.values.keys().find(|k| !catalog.contains(k)) {
                return Err(MapobjectError::MalformedInput(format!(
                    "value key {} is not registered for mapobject type {}",
                    key, mapobject.mapobject_type_id
                )));
            }
        }

        let count = records.len();
        for record in records {
            state
                .partitions
                .entry(record.partition_key)
                .or_default()
                .values_mut(kind)
                .entry((record.mapobject_id, record.tpoint))
                .or_default()
                .extend(record.values);
        }
        debug!("Ingested {} {:?} value records", count, kind);
        Ok(count)
    }
}
