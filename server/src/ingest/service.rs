//! Segmentation and value ingestion
//!
//! Segmentations are written in two phases. The read phase extracts polygons,
//! detects label conflicts and finds mapobjects that a label continues from
//! another time point or z-plane. The write phase hands the batch to the store,
//! which re-checks label uniqueness under the partition lock and commits the
//! layer and every new mapobject with its segmentation at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::config::IngestConfig;
use crate::geometry::predicates::{Location, locate};
use crate::geometry::{ExtractedObject, PolygonCodec, Raster};
use crate::model::{
    LabelResult, MapobjectError, MapobjectId, MapobjectTypeId, SegmentationLayer, ValueKind,
    ValueRecord, summarize,
};
use crate::query::{
    ContainmentQuery, ContainmentQueryEngine, ReferenceResolver, ReferenceSelector,
    ResolvedReference,
};
use crate::store::{MapobjectStore, PendingSegmentation, WriteSummary};

use super::types::{FeatureValueBatch, LabelResultRequest, Reconstruction};

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn MapobjectStore>,
    resolver: ReferenceResolver,
    engine: ContainmentQueryEngine,
    codec: PolygonCodec,
    limits: IngestConfig,
}

impl IngestService {
    pub fn new(store: Arc<dyn MapobjectStore>, limits: IngestConfig) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            engine: ContainmentQueryEngine::new(store.clone()),
            codec: PolygonCodec::new(),
            store,
            limits,
        }
    }

    /// Extract the objects of a label image taken at one well or site and
    /// store them as segmentations of `mapobject_type_id`
    pub async fn add_segmentations(
        &self,
        mapobject_type_id: MapobjectTypeId,
        selector: &ReferenceSelector,
        tpoint: u32,
        zplane: u32,
        raster: &Raster,
    ) -> Result<WriteSummary, MapobjectError> {
        selector.site_position()?;
        let start = Instant::now();
        let (height, width) = raster.shape();
        if height.saturating_mul(width) > self.limits.max_raster_pixels {
            return Err(MapobjectError::MalformedInput(format!(
                "raster of {}x{} pixels exceeds the limit of {} pixels",
                height, width, self.limits.max_raster_pixels
            )));
        }

        let mapobject_type = self.store.get_mapobject_type(mapobject_type_id).await?;
        if mapobject_type.is_static {
            return Err(MapobjectError::MalformedInput(format!(
                "segmentations of static mapobject type \"{}\" cannot be added",
                mapobject_type.name
            )));
        }
        let reference = self.resolver.resolve(&mapobject_type, selector).await?;
        let (expected_height, expected_width) = reference_extent(&reference)?;
        raster.ensure_shape(expected_height, expected_width)?;

        let offset = reference.instance.offset().unwrap_or_default();
        let codec = self.codec;
        let owned = raster.clone();
        let extracted = tokio::task::spawn_blocking(move || codec.extract(&owned, offset))
            .await
            .map_err(|e| MapobjectError::Storage(format!("extraction task failed: {}", e)))??;

        let layer = self
            .store
            .list_layers(mapobject_type_id)
            .await?
            .into_iter()
            .find(|l| l.tpoint == tpoint && l.zplane == zplane);
        let pending = self
            .plan_segmentations(&reference, mapobject_type_id, layer.as_ref(), extracted)
            .await?;

        let count = pending.len();
        let summary = self
            .store
            .insert_segmentations(reference.partition_key, mapobject_type_id, tpoint, zplane, pending)
            .await?;

        counter!("mapobjects_segmentations_ingested_total").increment(count as u64);
        histogram!("mapobjects_segmentation_ingest_duration_seconds").record(start.elapsed());
        info!(
            "Added {} segmentations of \"{}\" at {} (t={}, z={}): {} created, {} reused",
            count,
            mapobject_type.name,
            reference.instance.describe(),
            tpoint,
            zplane,
            summary.created,
            summary.reused
        );
        Ok(summary)
    }

    /// Read phase: a label already stored in the target layer is a conflict; a
    /// label stored in another layer continues that mapobject when its centroid
    /// lies within the reference region. `layer` is `None` until the first
    /// batch at this time point and z-plane is written.
    async fn plan_segmentations(
        &self,
        reference: &ResolvedReference,
        mapobject_type_id: MapobjectTypeId,
        layer: Option<&SegmentationLayer>,
        extracted: Vec<ExtractedObject>,
    ) -> Result<Vec<PendingSegmentation>, MapobjectError> {
        let labels: Vec<u32> = extracted.iter().map(|o| o.label).collect();
        let existing = self
            .store
            .segmentations_with_labels(reference.partition_key, mapobject_type_id, &labels)
            .await?;

        let mut continued: HashMap<u32, MapobjectId> = HashMap::new();
        for segmentation in existing {
            if let Some(layer) = layer
                && segmentation.segmentation_layer_id == layer.id
            {
                return Err(MapobjectError::Conflict {
                    label: segmentation.label,
                    layer_id: layer.id,
                    partition: reference.partition_key,
                });
            }
            if locate(segmentation.centroid, &reference.polygon) != Location::Outside {
                continued
                    .entry(segmentation.label)
                    .or_insert(segmentation.mapobject_id);
            }
        }
        debug!(
            "{} of {} labels continue existing mapobjects",
            continued.len(),
            labels.len()
        );

        Ok(extracted
            .into_iter()
            .map(|object| PendingSegmentation {
                mapobject_id: continued.get(&object.label).copied(),
                label: object.label,
                polygon: object.polygon,
                centroid: object.centroid,
            })
            .collect())
    }

    /// Rebuild the label image of one well or site from stored polygons
    pub async fn get_segmentations(
        &self,
        mapobject_type_id: MapobjectTypeId,
        selector: &ReferenceSelector,
        tpoint: u32,
        zplane: u32,
    ) -> Result<Reconstruction, MapobjectError> {
        selector.site_position()?;
        let mapobject_type = self.store.get_mapobject_type(mapobject_type_id).await?;
        let reference = self.resolver.resolve(&mapobject_type, selector).await?;
        let layers: Vec<SegmentationLayer> = self
            .store
            .list_layers(mapobject_type_id)
            .await?
            .into_iter()
            .filter(|l| l.tpoint == tpoint && l.zplane == zplane)
            .collect();
        if layers.is_empty() {
            return Err(MapobjectError::NotFound(format!(
                "segmentation layer of \"{}\" at t={}, z={}",
                mapobject_type.name, tpoint, zplane
            )));
        }

        let objects = self
            .engine
            .query(ContainmentQuery::new(&reference, &layers))
            .await?;
        let (height, width) = reference_extent(&reference)?;
        let offset = reference.instance.offset().unwrap_or_default();
        let raster = self.codec.rasterize(
            objects.iter().map(|o| (o.label, &o.polygon)),
            offset,
            height,
            width,
        )?;
        debug!(
            "Reconstructed {} objects of \"{}\" at {}",
            objects.len(),
            mapobject_type.name,
            reference.instance.describe()
        );
        Ok(Reconstruction { offset, raster })
    }

    /// `get_segmentations` encoded as a 16-bit grayscale PNG
    pub async fn get_segmentations_png(
        &self,
        mapobject_type_id: MapobjectTypeId,
        selector: &ReferenceSelector,
        tpoint: u32,
        zplane: u32,
    ) -> Result<Vec<u8>, MapobjectError> {
        let reconstruction = self
            .get_segmentations(mapobject_type_id, selector, tpoint, zplane)
            .await?;
        Ok(self.codec.encode_png(&reconstruction.raster)?)
    }

    /// Attach feature values to the labeled objects of one well or site.
    /// Returns the number of value maps written.
    pub async fn add_feature_values(
        &self,
        mapobject_type_id: MapobjectTypeId,
        selector: &ReferenceSelector,
        tpoint: u32,
        batch: &FeatureValueBatch,
    ) -> Result<usize, MapobjectError> {
        selector.site_position()?;
        batch.validate_shape().map_err(MapobjectError::MalformedInput)?;
        self.check_batch_size(batch.labels.len())?;

        let mapobject_type = self.store.get_mapobject_type(mapobject_type_id).await?;
        let reference = self.resolver.resolve(&mapobject_type, selector).await?;
        let layers: Vec<SegmentationLayer> = self
            .store
            .list_layers(mapobject_type_id)
            .await?
            .into_iter()
            .filter(|l| l.tpoint == tpoint)
            .collect();

        let objects = self
            .engine
            .query_or_empty(ContainmentQuery::new(&reference, &layers).with_labels(&batch.labels))
            .await?;
        let mut by_label: HashMap<u32, MapobjectId> = HashMap::new();
        for object in &objects {
            by_label.entry(object.label).or_insert(object.mapobject_id);
        }
        let mapobject_ids = batch
            .labels
            .iter()
            .map(|label| {
                by_label.get(label).copied().ok_or_else(|| {
                    MapobjectError::NotFound(format!(
                        "mapobject with label {} at {} (t={})",
                        label,
                        reference.instance.describe(),
                        tpoint
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let features = self
            .store
            .get_or_create_features(mapobject_type_id, &batch.names)
            .await?;
        let records: Vec<ValueRecord> = mapobject_ids
            .into_iter()
            .zip(&batch.values)
            .map(|(mapobject_id, row)| ValueRecord {
                partition_key: reference.partition_key,
                mapobject_id,
                tpoint,
                values: features.iter().map(|f| f.id).zip(row.iter().copied()).collect(),
            })
            .collect();

        let written = self.store.ingest_values(ValueKind::Feature, records).await?;
        info!(
            "Added {} feature values for {} objects of \"{}\" at {}",
            batch.names.len(),
            written,
            mapobject_type.name,
            reference.instance.describe()
        );
        Ok(written)
    }

    /// Create a label result and store one value per mapobject
    pub async fn add_label_result(
        &self,
        mapobject_type_id: MapobjectTypeId,
        request: &LabelResultRequest,
    ) -> Result<LabelResult, MapobjectError> {
        if request.mapobject_ids.len() != request.values.len() {
            return Err(MapobjectError::MalformedInput(format!(
                "{} values given for {} mapobjects",
                request.values.len(),
                request.mapobject_ids.len()
            )));
        }
        self.check_batch_size(request.values.len())?;

        let attributes = summarize(request.kind, &request.values, request.attributes.as_ref());
        let values: Vec<(MapobjectId, f64)> = request
            .mapobject_ids
            .iter()
            .copied()
            .zip(request.values.iter().copied())
            .collect();
        let result = self
            .store
            .create_label_result(
                mapobject_type_id,
                &request.name,
                request.kind,
                attributes,
                request.tpoint,
                &values,
            )
            .await?;
        info!(
            "Added label result \"{}\" with {} values",
            result.name,
            values.len()
        );
        Ok(result)
    }

    fn check_batch_size(&self, rows: usize) -> Result<(), MapobjectError> {
        if rows > self.limits.max_value_batch {
            return Err(MapobjectError::MalformedInput(format!(
                "batch of {} rows exceeds the limit of {}",
                rows, self.limits.max_value_batch
            )));
        }
        Ok(())
    }
}

fn reference_extent(reference: &ResolvedReference) -> Result<(usize, usize), MapobjectError> {
    reference.instance.image_size().ok_or_else(|| {
        MapobjectError::MalformedInput(format!(
            "{} has no image extent",
            reference.instance.describe()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabelResultKind, ReferenceKind};
    use crate::test_utils::{square_raster as squares, two_site_store};
    use serde_json::json;

    fn site(x: u32) -> ReferenceSelector {
        ReferenceSelector::site("plate01", "A01", 0, x)
    }

    #[tokio::test]
    async fn test_segmentation_round_trip() {
        let fixture = two_site_store().await;
        let raster = squares(&[(1, 0, 0), (2, 4, 6), (3, 8, 8)]);

        let summary = fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(1), 0, 0, &raster)
            .await
            .unwrap();
        assert_eq!(summary.created, 3);

        let rebuilt = fixture
            .ingest
            .get_segmentations(fixture.cells.id, &site(1), 0, 0)
            .await
            .unwrap();
        assert_eq!(rebuilt.offset, fixture.sites[1].offset);
        assert_eq!(rebuilt.raster, raster);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_rejected() {
        let fixture = two_site_store().await;
        let result = fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 0, 0, &Raster::zeros(10, 12))
            .await;
        assert!(matches!(result, Err(MapobjectError::MalformedInput(_))));
    }

    #[tokio::test]
    async fn test_duplicate_label_in_layer_is_conflict() {
        let fixture = two_site_store().await;
        fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 0, 0, &squares(&[(1, 0, 0)]))
            .await
            .unwrap();

        let again = fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 0, 0, &squares(&[(1, 5, 5)]))
            .await;
        assert!(matches!(again, Err(MapobjectError::Conflict { label: 1, .. })));
    }

    #[tokio::test]
    async fn test_label_continues_mapobject_across_time_points() {
        let fixture = two_site_store().await;
        fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 0, 0, &squares(&[(4, 2, 2)]))
            .await
            .unwrap();

        let summary = fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 1, 0, &squares(&[(4, 3, 3), (5, 7, 7)]))
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary { created: 1, reused: 1 });
    }

    #[tokio::test]
    async fn test_feature_values_for_unknown_label_are_not_found() {
        let fixture = two_site_store().await;
        fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 0, 0, &squares(&[(1, 0, 0)]))
            .await
            .unwrap();

        let batch = FeatureValueBatch {
            names: vec!["area".into()],
            labels: vec![1, 9],
            values: vec![vec![4.0], vec![1.0]],
        };
        let result = fixture
            .ingest
            .add_feature_values(fixture.cells.id, &site(0), 0, &batch)
            .await;
        assert!(matches!(result, Err(MapobjectError::NotFound(_))));
        assert!(fixture
            .store
            .list_features(fixture.cells.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_feature_batch_shape_is_checked() {
        let batch = FeatureValueBatch {
            names: vec!["area".into(), "perimeter".into()],
            labels: vec![1],
            values: vec![vec![4.0]],
        };
        assert!(batch.validate_shape().is_err());

        let repeated = FeatureValueBatch {
            names: vec!["area".into()],
            labels: vec![1, 1],
            values: vec![vec![1.0], vec![2.0]],
        };
        assert!(repeated.validate_shape().is_err());
    }

    #[tokio::test]
    async fn test_label_result_summary_and_values() {
        let fixture = two_site_store().await;
        fixture
            .ingest
            .add_segmentations(fixture.cells.id, &site(0), 0, 0, &squares(&[(1, 0, 0), (2, 5, 5)]))
            .await
            .unwrap();
        let objects = fixture
            .store
            .segmentations_with_labels(
                crate::partition::PartitionKey(fixture.well.id),
                fixture.cells.id,
                &[1, 2],
            )
            .await
            .unwrap();
        let ids: Vec<MapobjectId> = objects.iter().map(|s| s.mapobject_id).collect();

        let request = LabelResultRequest {
            name: "cluster".into(),
            kind: LabelResultKind::Scalar,
            tpoint: 0,
            mapobject_ids: ids.clone(),
            values: vec![3.0, 1.0],
            attributes: None,
        };
        let result = fixture
            .ingest
            .add_label_result(fixture.cells.id, &request)
            .await
            .unwrap();
        assert_eq!(result.attributes["labels"], json!([1.0, 3.0]));

        let stored = fixture
            .store
            .fetch_values(
                ValueKind::Label,
                crate::partition::PartitionKey(fixture.well.id),
                &[(ids[0], 0)],
            )
            .await
            .unwrap();
        assert_eq!(stored[0].as_ref().and_then(|v| v.get(result.id)), Some(3.0));
    }

    #[tokio::test]
    async fn test_unpaired_coordinate_is_rejected_before_type_lookup() {
        let fixture = two_site_store().await;
        let selector = ReferenceSelector {
            well_pos_y: Some(0),
            ..ReferenceSelector::well("plate01", "A01")
        };
        let batch = FeatureValueBatch {
            names: vec!["area".into()],
            labels: vec![1],
            values: vec![vec![4.0]],
        };

        let added = fixture
            .ingest
            .add_segmentations(9999, &selector, 0, 0, &squares(&[(1, 0, 0)]))
            .await;
        let rebuilt = fixture.ingest.get_segmentations(9999, &selector, 0, 0).await;
        let values = fixture
            .ingest
            .add_feature_values(9999, &selector, 0, &batch)
            .await;
        assert!(matches!(added, Err(MapobjectError::MalformedInput(_))));
        assert!(matches!(rebuilt, Err(MapobjectError::MalformedInput(_))));
        assert!(matches!(values, Err(MapobjectError::MalformedInput(_))));
    }

    #[tokio::test]
    async fn test_label_result_for_foreign_mapobject_is_not_created() {
        let fixture = two_site_store().await;
        let request = LabelResultRequest {
            name: "cluster".into(),
            kind: LabelResultKind::Scalar,
            tpoint: 0,
            // reference object of the well
            mapobject_ids: vec![1],
            values: vec![1.0],
            attributes: None,
        };
        let result = fixture
            .ingest
            .add_label_result(fixture.cells.id, &request)
            .await;
        assert!(matches!(result, Err(MapobjectError::MalformedInput(_))));
        assert!(fixture
            .store
            .list_label_results(fixture.cells.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_static_type_rejects_segmentations() {
        let fixture = two_site_store().await;
        let sites = fixture.store.reference_type(ReferenceKind::Site).await.unwrap();
        let result = fixture
            .ingest
            .add_segmentations(sites.id, &site(0), 0, 0, &squares(&[(1, 0, 0)]))
            .await;
        assert!(matches!(result, Err(MapobjectError::MalformedInput(_))));
    }
}
