//! Containment queries: objects fully enclosed by a reference region

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::debug;

use crate::geometry::Polygon;
use crate::model::{LayerId, MapobjectError, MapobjectId, SegmentationLayer};
use crate::partition::PartitionKey;
use crate::store::MapobjectStore;

use super::reference::ResolvedReference;

/// Scope of one containment query
#[derive(Debug, Clone, Copy)]
pub struct ContainmentQuery<'a> {
    pub reference: &'a Polygon,
    pub partition_key: PartitionKey,
    pub layers: &'a [SegmentationLayer],
    /// Restrict to these labels
    pub labels: Option<&'a [u32]>,
}

impl<'a> ContainmentQuery<'a> {
    pub fn new(reference: &'a ResolvedReference, layers: &'a [SegmentationLayer]) -> Self {
        Self {
            reference: &reference.polygon,
            partition_key: reference.partition_key,
            layers,
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: &'a [u32]) -> Self {
        self.labels = Some(labels);
        self
    }
}

/// Segmentation of one object enclosed by the reference region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainedObject {
    pub mapobject_id: MapobjectId,
    pub label: u32,
    pub polygon: Polygon,
    pub layer_id: LayerId,
    pub tpoint: u32,
    pub zplane: u32,
    pub is_border: bool,
}

/// Orchestrates scope and ordering; the enclosure and border tests are
/// answered by the store.
#[derive(Clone)]
pub struct ContainmentQueryEngine {
    store: Arc<dyn MapobjectStore>,
}

impl ContainmentQueryEngine {
    pub fn new(store: Arc<dyn MapobjectStore>) -> Self {
        Self { store }
    }

    /// Enclosed objects ordered by mapobject id, then time point, z-plane and
    /// layer. An empty result is `NotFound`.
    pub async fn query(
        &self,
        query: ContainmentQuery<'_>,
    ) -> Result<Vec<ContainedObject>, MapobjectError> {
        let objects = self.query_or_empty(query).await?;
        if objects.is_empty() {
            return Err(MapobjectError::NotFound(format!(
                "no mapobjects in the selected region of partition {}",
                query.partition_key
            )));
        }
        Ok(objects)
    }

    /// Like `query`, but an empty region yields an empty vector
    pub async fn query_or_empty(
        &self,
        query: ContainmentQuery<'_>,
    ) -> Result<Vec<ContainedObject>, MapobjectError> {
        let start = Instant::now();
        counter!("mapobjects_containment_queries_total").increment(1);

        if query.layers.is_empty() {
            return Ok(Vec::new());
        }
        let layer_ids: Vec<LayerId> = query.layers.iter().map(|l| l.id).collect();

        let covered = self
            .store
            .covered_segmentations(query.partition_key, &layer_ids, query.reference)
            .await?;

        let mut objects: Vec<ContainedObject> = covered
            .into_iter()
            .filter(|c| query.labels.is_none_or(|labels| labels.contains(&c.segmentation.label)))
            .filter_map(|c| {
                let layer = query
                    .layers
                    .iter()
                    .find(|l| l.id == c.segmentation.segmentation_layer_id)?;
                Some(ContainedObject {
                    mapobject_id: c.segmentation.mapobject_id,
                    label: c.segmentation.label,
                    polygon: c.segmentation.polygon,
                    layer_id: layer.id,
                    tpoint: layer.tpoint,
                    zplane: layer.zplane,
                    is_border: c.is_border,
                })
            })
            .collect();
        objects.sort_by_key(|o| (o.mapobject_id, o.tpoint, o.zplane, o.layer_id));

        histogram!("mapobjects_containment_query_duration_seconds").record(start.elapsed());
        debug!(
            "Containment query in partition {} over {} layers returned {} segmentations",
            query.partition_key,
            layer_ids.len(),
            objects.len()
        );
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Offset, Raster};
    use crate::query::ReferenceSelector;
    use crate::test_utils::{TestFixture, two_site_store};

    /// Ingest one 10x10 raster per site with two labels each; labels are
    /// unique across the well
    async fn populated() -> TestFixture {
        let fixture = two_site_store().await;
        for x in 0..2u32 {
            let mut raster = Raster::zeros(10, 10);
            for (label, row, col) in [(2 * x + 1, 1, 1), (2 * x + 2, 5, 5)] {
                for r in row..row + 2 {
                    for c in col..col + 2 {
                        raster.set(r, c, label);
                    }
                }
            }
            fixture
                .ingest
                .add_segmentations(
                    fixture.cells.id,
                    &ReferenceSelector::site("plate01", "A01", 0, x),
                    0,
                    0,
                    &raster,
                )
                .await
                .unwrap();
        }
        fixture
    }

    async fn run(
        fixture: &TestFixture,
        selector: &ReferenceSelector,
    ) -> Result<Vec<ContainedObject>, MapobjectError> {
        let reference = fixture
            .resolver
            .resolve(&fixture.cells, selector)
            .await
            .unwrap();
        let layers = fixture.store.list_layers(fixture.cells.id).await.unwrap();
        fixture
            .engine
            .query(ContainmentQuery::new(&reference, &layers))
            .await
    }

    #[tokio::test]
    async fn test_well_query_is_union_of_sites_in_id_order() {
        let fixture = populated().await;

        let well = run(&fixture, &ReferenceSelector::well("plate01", "A01"))
            .await
            .unwrap();
        let site0 = run(&fixture, &ReferenceSelector::site("plate01", "A01", 0, 0))
            .await
            .unwrap();
        let site1 = run(&fixture, &ReferenceSelector::site("plate01", "A01", 0, 1))
            .await
            .unwrap();

        assert_eq!(well.len(), 4);
        assert_eq!(site0.len() + site1.len(), 4);
        let ids: Vec<MapobjectId> = well.iter().map(|o| o.mapobject_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);

        for object in site0.iter().chain(&site1) {
            assert!(well.iter().any(|o| o.mapobject_id == object.mapobject_id));
        }
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let fixture = populated().await;
        let selector = ReferenceSelector::well("plate01", "A01");
        let first = run(&fixture, &selector).await.unwrap();
        let second = run(&fixture, &selector).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_label_filter() {
        let fixture = populated().await;
        let reference = fixture
            .resolver
            .resolve(&fixture.cells, &ReferenceSelector::site("plate01", "A01", 0, 0))
            .await
            .unwrap();
        let layers = fixture.store.list_layers(fixture.cells.id).await.unwrap();
        let objects = fixture
            .engine
            .query(ContainmentQuery::new(&reference, &layers).with_labels(&[2]))
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].label, 2);
        assert_eq!(
            objects[0].polygon,
            Polygon::rectangle(Offset::new(5, 5), 2, 2)
        );
    }

    #[tokio::test]
    async fn test_empty_region_is_not_found() {
        let fixture = two_site_store().await;
        let mut raster = Raster::zeros(10, 10);
        raster.set(4, 4, 1);
        fixture
            .ingest
            .add_segmentations(
                fixture.cells.id,
                &ReferenceSelector::site("plate01", "A01", 0, 1),
                0,
                0,
                &raster,
            )
            .await
            .unwrap();
        let layers = fixture.store.list_layers(fixture.cells.id).await.unwrap();
        let reference = fixture
            .resolver
            .resolve(&fixture.cells, &ReferenceSelector::site("plate01", "A01", 0, 0))
            .await
            .unwrap();

        let result = fixture
            .engine
            .query(ContainmentQuery::new(&reference, &layers))
            .await;
        assert!(matches!(result, Err(MapobjectError::NotFound(_))));
    }
}
