//! Dense value tables from sparse per-object value maps
//!
//! Columns are fixed once per table from the catalog's ascending id order.
//! Rows are produced lazily, one per object in the order given. Features
//! registered after the columns were fixed stay out of the table.

use std::collections::{HashMap, HashSet};

use metrics::counter;
use tracing::warn;

use crate::model::{Feature, FeatureId, LabelResult, MapobjectError, MapobjectId, SparseValues};

/// One field of an output row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Integer(u64),
    Number(f64),
    Text(String),
    Bool(bool),
    Empty,
}

/// Value columns of a table, ordered by ascending id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnCatalog {
    ids: Vec<FeatureId>,
    names: Vec<String>,
}

impl ColumnCatalog {
    /// Catalog from (id, name) pairs in any order
    pub fn new(entries: impl IntoIterator<Item = (FeatureId, String)>) -> Self {
        let mut entries: Vec<(FeatureId, String)> = entries.into_iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        let (ids, names) = entries.into_iter().unzip();
        Self { ids, names }
    }

    pub fn from_features(features: &[Feature]) -> Self {
        Self::new(features.iter().map(|f| (f.id, f.name.clone())))
    }

    pub fn from_label_results(results: &[LabelResult]) -> Self {
        Self::new(results.iter().map(|r| (r.id, r.name.clone())))
    }

    pub fn ids(&self) -> &[FeatureId] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn contains(&self, id: FeatureId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }
}

/// Lookup of sparse value maps by (mapobject, time point)
pub trait ValueSource {
    fn values_for(&self, mapobject_id: MapobjectId, tpoint: u32) -> Option<&SparseValues>;
}

impl ValueSource for HashMap<(MapobjectId, u32), SparseValues> {
    fn values_for(&self, mapobject_id: MapobjectId, tpoint: u32) -> Option<&SparseValues> {
        self.get(&(mapobject_id, tpoint))
    }
}

/// Object a row is emitted for, with any cells placed between the id and the
/// value columns
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey {
    pub mapobject_id: MapobjectId,
    pub tpoint: u32,
    pub leading: Vec<Cell>,
}

impl RowKey {
    pub fn new(mapobject_id: MapobjectId, tpoint: u32) -> Self {
        Self {
            mapobject_id,
            tpoint,
            leading: Vec::new(),
        }
    }
}

pub struct ValueTableAssembler {
    columns: ColumnCatalog,
    leading: Vec<String>,
}

impl ValueTableAssembler {
    pub fn new(columns: ColumnCatalog) -> Self {
        Self {
            columns,
            leading: Vec::new(),
        }
    }

    /// Names of the columns placed between `id` and the value columns
    pub fn with_leading_columns(mut self, names: Vec<String>) -> Self {
        self.leading = names;
        self
    }

    /// `id`, the leading columns, then value names by ascending id
    pub fn header(&self) -> Vec<String> {
        std::iter::once("id".to_string())
            .chain(self.leading.iter().cloned())
            .chain(self.columns.names().iter().cloned())
            .collect()
    }

    /// One row per key, in the order given. `registered` holds the ids
    /// registered for the type when the values were read.
    pub fn rows<'a, I, V>(
        &'a self,
        keys: I,
        values: &'a V,
        registered: &'a HashSet<FeatureId>,
    ) -> impl Iterator<Item = Result<Vec<Cell>, MapobjectError>> + 'a
    where
        I: IntoIterator<Item = RowKey>,
        I::IntoIter: 'a,
        V: ValueSource + ?Sized,
    {
        keys.into_iter().map(move |key| {
            let found = values.values_for(key.mapobject_id, key.tpoint);
            self.row(key, found, registered)
        })
    }

    /// A missing map yields NaN in every value column. A key outside the
    /// columns is dropped when it is in `registered` (added after the columns
    /// were fixed) and is an error otherwise.
    pub fn row(
        &self,
        key: RowKey,
        values: Option<&SparseValues>,
        registered: &HashSet<FeatureId>,
    ) -> Result<Vec<Cell>, MapobjectError> {
        if key.leading.len() != self.leading.len() {
            return Err(MapobjectError::MalformedInput(format!(
                "row for mapobject {} has {} leading cells, expected {}",
                key.mapobject_id,
                key.leading.len(),
                self.leading.len()
            )));
        }

        let mut row = Vec::with_capacity(1 + self.leading.len() + self.columns.len());
        row.push(Cell::Integer(key.mapobject_id));
        row.extend(key.leading);

        match values {
            None => {
                warn!(
                    "No values found for mapobject {} at time point {}",
                    key.mapobject_id, key.tpoint
                );
                counter!("mapobjects_missing_value_rows_total").increment(1);
                row.extend(std::iter::repeat_n(Cell::Number(f64::NAN), self.columns.len()));
            }
            Some(values) => {
                if let Some(unknown) = values
                    .keys()
                    .find(|id| !self.columns.contains(*id) && !registered.contains(id))
                {
                    return Err(MapobjectError::MalformedInput(format!(
                        "value key {} of mapobject {} is not in the column catalog",
                        unknown, key.mapobject_id
                    )));
                }
                row.extend(
                    values
                        .aligned(self.columns.ids())
                        .into_iter()
                        .map(Cell::Number),
                );
            }
        }

        counter!("mapobjects_table_rows_total").increment(1);
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ColumnCatalog {
        // deliberately not in id order
        ColumnCatalog::new([
            (10, "perimeter".to_string()),
            (2, "area".to_string()),
            (9, "eccentricity".to_string()),
        ])
    }

    fn registered() -> HashSet<FeatureId> {
        [2, 9, 10].into_iter().collect()
    }

    fn numbers(row: &[Cell]) -> Vec<f64> {
        row.iter()
            .filter_map(|c| match c {
                Cell::Number(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_header_follows_ascending_ids() {
        let assembler = ValueTableAssembler::new(catalog());
        assert_eq!(
            assembler.header(),
            vec!["id", "area", "eccentricity", "perimeter"]
        );
    }

    #[test]
    fn test_values_align_regardless_of_key_order() {
        let assembler = ValueTableAssembler::new(catalog());
        let values = SparseValues::from_string_keys([("10", 3.0), ("2", 1.0), ("9", 2.0)]).unwrap();

        let row = assembler.row(RowKey::new(5, 0), Some(&values), &registered()).unwrap();
        assert_eq!(row[0], Cell::Integer(5));
        assert_eq!(numbers(&row), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_missing_map_fills_every_column_with_nan() {
        let assembler = ValueTableAssembler::new(catalog());
        let row = assembler.row(RowKey::new(5, 0), None, &registered()).unwrap();
        let values = numbers(&row);
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_partial_map_fills_gaps_with_nan() {
        let assembler = ValueTableAssembler::new(catalog());
        let values: SparseValues = [(9, 0.5)].into_iter().collect();
        let row = numbers(&assembler.row(RowKey::new(1, 0), Some(&values), &registered()).unwrap());
        assert!(row[0].is_nan());
        assert_eq!(row[1], 0.5);
        assert!(row[2].is_nan());
    }

    #[test]
    fn test_unknown_key_is_catalog_mismatch() {
        let assembler = ValueTableAssembler::new(catalog());
        let values: SparseValues = [(3, 1.0)].into_iter().collect();
        assert!(matches!(
            assembler.row(RowKey::new(1, 0), Some(&values), &registered()),
            Err(MapobjectError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_key_registered_after_columns_is_left_out() {
        let assembler = ValueTableAssembler::new(catalog());
        let values: SparseValues = [(2, 1.5), (11, 8.0)].into_iter().collect();
        let mut later = registered();
        later.insert(11);

        let row = assembler
            .row(RowKey::new(1, 0), Some(&values), &later)
            .unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row[1], Cell::Number(1.5));
    }

    #[test]
    fn test_rows_keep_input_order() {
        let assembler = ValueTableAssembler::new(catalog());
        let mut source = HashMap::new();
        source.insert((3, 0), [(2, 7.0)].into_iter().collect::<SparseValues>());

        let rows: Vec<Vec<Cell>> = assembler
            .rows(vec![RowKey::new(1, 0), RowKey::new(3, 0)], &source, &registered())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows[0][0], Cell::Integer(1));
        assert_eq!(rows[1][0], Cell::Integer(3));
        assert_eq!(rows[1][1], Cell::Number(7.0));
    }
}
