//! Sparse per-object value maps with ascending-key iteration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{FeatureId, MapobjectError};

/// Mapping from feature (or label result) id to value.
///
/// Iteration is always ascending by integer id. A missing key means the value
/// was not computed, which is different from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseValues(BTreeMap<FeatureId, f64>);

impl SparseValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-key a map whose keys arrive as strings (e.g. from a key/value
    /// column) as integer ids
    pub fn from_string_keys<I, K>(entries: I) -> Result<Self, MapobjectError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = key.as_ref();
            let id = key.trim().parse::<FeatureId>().map_err(|_| {
                MapobjectError::MalformedInput(format!("value key \"{}\" is not an integer id", key))
            })?;
            map.insert(id, value);
        }
        Ok(Self(map))
    }

    pub fn insert(&mut self, id: FeatureId, value: f64) -> Option<f64> {
        self.0.insert(id, value)
    }

    pub fn get(&self, id: FeatureId) -> Option<f64> {
        self.0.get(&id).copied()
    }

    pub fn remove(&mut self, id: FeatureId) -> Option<f64> {
        self.0.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.0.keys().copied()
    }

    /// Values laid out along `columns`, NaN where a key is absent
    pub fn aligned(&self, columns: &[FeatureId]) -> Vec<f64> {
        columns
            .iter()
            .map(|id| self.get(*id).unwrap_or(f64::NAN))
            .collect()
    }

    /// Merge `other` into `self`, later values win
    pub fn extend(&mut self, other: SparseValues) {
        self.0.extend(other.0);
    }
}

impl FromIterator<(FeatureId, f64)> for SparseValues {
    fn from_iter<T: IntoIterator<Item = (FeatureId, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_keys_sort_numerically() {
        let values =
            SparseValues::from_string_keys([("10", 1.0), ("9", 2.0), ("100", 3.0)]).unwrap();
        let keys: Vec<FeatureId> = values.keys().collect();
        assert_eq!(keys, vec![9, 10, 100]);
    }

    #[test]
    fn test_non_integer_key_is_rejected() {
        let result = SparseValues::from_string_keys([("area", 1.0)]);
        assert!(matches!(result, Err(MapobjectError::MalformedInput(_))));
    }

    #[test]
    fn test_aligned_fills_missing_with_nan() {
        let values: SparseValues = [(2, 5.0)].into_iter().collect();
        let row = values.aligned(&[1, 2, 3]);
        assert!(row[0].is_nan());
        assert_eq!(row[1], 5.0);
        assert!(row[2].is_nan());
    }
}
