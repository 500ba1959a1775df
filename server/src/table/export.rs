//! Streamed feature-value and metadata tables
//!
//! Each reference instance (well or site) is one unit of work: its own
//! partition, containment query, value lookup and row block. Blocks are
//! concatenated in enumeration order; up to `parallelism` instances are
//! evaluated at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crate::model::{
    FeatureId, MapobjectError, MapobjectId, MapobjectTypeId, ReferenceInstance, ReferenceKind,
    SegmentationLayer, SparseValues, ValueKind,
};
use crate::query::{
    ContainedObject, ContainmentQuery, ContainmentQueryEngine, ReferenceResolver,
    ReferenceSelector,
};
use crate::store::MapobjectStore;

use super::assembler::{Cell, ColumnCatalog, RowKey, ValueTableAssembler};
use super::csv::{encode_header, encode_row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// `id` followed by feature values
    FeatureValues,
    /// `id`, position, segmentation descriptors and label values
    Metadata,
}

impl TableKind {
    fn value_kind(self) -> ValueKind {
        match self {
            TableKind::FeatureValues => ValueKind::Feature,
            TableKind::Metadata => ValueKind::Label,
        }
    }

    fn filename_suffix(self) -> &'static str {
        match self {
            TableKind::FeatureValues => "feature-values.csv",
            TableKind::Metadata => "metadata.csv",
        }
    }
}

/// Region filters and optional time point of an export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    pub selector: ReferenceSelector,
    pub tpoint: Option<u32>,
}

/// Attachment name and body of a streamed table
pub struct TableExport {
    pub filename: String,
    pub body: BoxStream<'static, Result<Bytes, MapobjectError>>,
}

/// `{experiment}[_{plate}][_{well}][_y{y}][_x{x}][_t{t}]_{type}_{suffix}`
pub fn export_filename(
    experiment: &str,
    request: &ExportRequest,
    type_name: &str,
    kind: TableKind,
) -> String {
    let selector = &request.selector;
    let mut name = experiment.to_string();
    if let Some(plate) = &selector.plate_name {
        name.push_str(&format!("_{}", plate));
    }
    if let Some(well) = &selector.well_name {
        name.push_str(&format!("_{}", well));
    }
    if let Some(y) = selector.well_pos_y {
        name.push_str(&format!("_y{}", y));
    }
    if let Some(x) = selector.well_pos_x {
        name.push_str(&format!("_x{}", x));
    }
    if let Some(t) = request.tpoint {
        name.push_str(&format!("_t{}", t));
    }
    format!("{}_{}_{}", name, type_name, kind.filename_suffix())
}

/// Positional columns for objects anchored at `anchor`
fn position_columns(anchor: ReferenceKind) -> Vec<String> {
    let names: &[&str] = match anchor {
        ReferenceKind::Plate => &["plate_name"],
        ReferenceKind::Well => &["plate_name", "well_name"],
        ReferenceKind::Site => &["plate_name", "well_name", "well_pos_y", "well_pos_x"],
    };
    names.iter().map(|s| s.to_string()).collect()
}

fn position_cells(anchor: ReferenceKind, instance: &ReferenceInstance) -> Vec<Cell> {
    let plate = Cell::Text(instance.plate().name.clone());
    let well = || {
        instance
            .well()
            .map_or(Cell::Empty, |w| Cell::Text(w.name.clone()))
    };
    match anchor {
        ReferenceKind::Plate => vec![plate],
        ReferenceKind::Well => vec![plate, well()],
        ReferenceKind::Site => {
            let (y, x) = instance.site().map_or((Cell::Empty, Cell::Empty), |s| {
                (Cell::Integer(s.y as u64), Cell::Integer(s.x as u64))
            });
            vec![plate, well(), y, x]
        }
    }
}

/// State shared by every block of one export
struct BlockContext {
    store: Arc<dyn MapobjectStore>,
    resolver: ReferenceResolver,
    engine: ContainmentQueryEngine,
    mapobject_type_id: MapobjectTypeId,
    layers: Vec<SegmentationLayer>,
    assembler: ValueTableAssembler,
    kind: TableKind,
    anchor: ReferenceKind,
}

impl BlockContext {
    /// One row per (mapobject, time point); the first segmentation in query
    /// order supplies label and border flag
    fn row_keys(&self, objects: Vec<ContainedObject>, instance: &ReferenceInstance) -> Vec<RowKey> {
        let mut keys: Vec<RowKey> = Vec::new();
        let mut last: Option<(MapobjectId, u32)> = None;
        for object in objects {
            let key = (object.mapobject_id, object.tpoint);
            if last == Some(key) {
                continue;
            }
            last = Some(key);

            let mut row = RowKey::new(object.mapobject_id, object.tpoint);
            if self.kind == TableKind::Metadata {
                row.leading = position_cells(self.anchor, instance);
                row.leading.extend([
                    Cell::Integer(object.tpoint as u64),
                    Cell::Integer(object.label as u64),
                    Cell::Bool(object.is_border),
                ]);
            }
            keys.push(row);
        }
        keys
    }

    /// Ids currently registered for the table's type. Read after the values
    /// so that every key of a fetched map is among them.
    async fn registered(&self) -> Result<HashSet<FeatureId>, MapobjectError> {
        Ok(match self.kind {
            TableKind::FeatureValues => self
                .store
                .list_features(self.mapobject_type_id)
                .await?
                .iter()
                .map(|f| f.id)
                .collect(),
            TableKind::Metadata => self
                .store
                .list_label_results(self.mapobject_type_id)
                .await?
                .iter()
                .map(|r| r.id)
                .collect(),
        })
    }

    /// CSV rows for one instance; empty when the instance holds no objects
    async fn render(&self, instance: ReferenceInstance) -> Result<Bytes, MapobjectError> {
        let reference = self.resolver.reference_for(instance).await?;
        let objects = self
            .engine
            .query_or_empty(ContainmentQuery::new(&reference, &self.layers))
            .await?;
        let keys = self.row_keys(objects, &reference.instance);

        let lookup: Vec<(MapobjectId, u32)> =
            keys.iter().map(|k| (k.mapobject_id, k.tpoint)).collect();
        let fetched = self
            .store
            .fetch_values(self.kind.value_kind(), reference.partition_key, &lookup)
            .await?;
        let values: HashMap<(MapobjectId, u32), SparseValues> = lookup
            .into_iter()
            .zip(fetched)
            .filter_map(|(key, v)| v.map(|v| (key, v)))
            .collect();
        let registered = self.registered().await?;

        let row_count = keys.len();
        let mut out = String::new();
        for row in self.assembler.rows(keys, &values, &registered) {
            encode_row(&row?, &mut out);
        }
        debug!(
            "Rendered {} rows for {}",
            row_count,
            reference.instance.describe()
        );
        Ok(Bytes::from(out))
    }
}

/// Builds streamed tables for one experiment
#[derive(Clone)]
pub struct TableExporter {
    store: Arc<dyn MapobjectStore>,
    resolver: ReferenceResolver,
    engine: ContainmentQueryEngine,
    experiment_name: String,
    parallelism: usize,
}

impl TableExporter {
    pub fn new(
        store: Arc<dyn MapobjectStore>,
        experiment_name: impl Into<String>,
        parallelism: usize,
    ) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            engine: ContainmentQueryEngine::new(store.clone()),
            store,
            experiment_name: experiment_name.into(),
            parallelism: parallelism.max(1),
        }
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Start streaming a table.
    ///
    /// Instances are evaluated in order until one yields rows; if none does
    /// the export fails with `NotFound` before any byte is produced. The
    /// remaining instances are evaluated while the body is consumed.
    pub async fn export(
        &self,
        kind: TableKind,
        mapobject_type_id: MapobjectTypeId,
        request: &ExportRequest,
    ) -> Result<TableExport, MapobjectError> {
        request.selector.site_position()?;
        let mapobject_type = self.store.get_mapobject_type(mapobject_type_id).await?;
        let instances = self
            .resolver
            .instances(&mapobject_type, &request.selector)
            .await?;

        let layers: Vec<SegmentationLayer> = self
            .store
            .list_layers(mapobject_type_id)
            .await?
            .into_iter()
            .filter(|l| request.tpoint.is_none_or(|t| l.tpoint == t))
            .collect();
        if layers.is_empty() {
            return Err(MapobjectError::NotFound(format!(
                "no segmentations of mapobject type \"{}\"",
                mapobject_type.name
            )));
        }

        let (columns, leading) = match kind {
            TableKind::FeatureValues => (
                ColumnCatalog::from_features(&self.store.list_features(mapobject_type_id).await?),
                Vec::new(),
            ),
            TableKind::Metadata => {
                let mut leading = position_columns(mapobject_type.reference_kind);
                leading.extend(["tpoint", "label", "is_border"].map(String::from));
                (
                    ColumnCatalog::from_label_results(
                        &self.store.list_label_results(mapobject_type_id).await?,
                    ),
                    leading,
                )
            }
        };
        let assembler = ValueTableAssembler::new(columns).with_leading_columns(leading);
        let header = Bytes::from(encode_header(&assembler.header()));

        let context = Arc::new(BlockContext {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            engine: self.engine.clone(),
            mapobject_type_id,
            layers,
            assembler,
            kind,
            anchor: mapobject_type.reference_kind,
        });

        let total = instances.len();
        let mut remaining = instances.into_iter();
        let mut first = None;
        for instance in remaining.by_ref() {
            let block = context.render(instance).await?;
            if !block.is_empty() {
                first = Some(block);
                break;
            }
        }
        let Some(first) = first else {
            return Err(MapobjectError::NotFound(format!(
                "no mapobjects of type \"{}\" in the selected region",
                mapobject_type.name
            )));
        };

        let filename = export_filename(&self.experiment_name, request, &mapobject_type.name, kind);
        info!(
            "Streaming {} over {} reference instances",
            filename, total
        );

        let rest: Vec<ReferenceInstance> = remaining.collect();
        let blocks = stream::iter(rest)
            .map(move |instance| {
                let context = context.clone();
                async move { context.render(instance).await }
            })
            .buffered(self.parallelism);
        let body = stream::iter([Ok(header), Ok(first)]).chain(blocks).boxed();

        Ok(TableExport { filename, body })
    }
}
