//! Ingestion request and response records

use serde::{Deserialize, Serialize};

use crate::geometry::{Offset, Raster};
use crate::model::{Attributes, LabelResultKind, MapobjectId};

/// Feature matrix for labeled objects of one reference instance: one row per
/// label, one column per feature name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValueBatch {
    pub names: Vec<String>,
    pub labels: Vec<u32>,
    pub values: Vec<Vec<f64>>,
}

impl FeatureValueBatch {
    /// Row count must match the labels and every row must have one value per name
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.values.len() != self.labels.len() {
            return Err(format!(
                "{} value rows given for {} labels",
                self.values.len(),
                self.labels.len()
            ));
        }
        if let Some((i, row)) = self
            .values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.names.len())
        {
            return Err(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                self.names.len()
            ));
        }
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(format!("feature name \"{}\" given twice", pair[0]));
        }
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        if let Some(pair) = labels.windows(2).find(|w| w[0] == w[1]) {
            return Err(format!("label {} given twice", pair[0]));
        }
        Ok(())
    }
}

/// Per-object values of a new label result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResultRequest {
    pub name: String,
    pub kind: LabelResultKind,
    #[serde(default)]
    pub tpoint: u32,
    pub mapobject_ids: Vec<MapobjectId>,
    pub values: Vec<f64>,
    /// Attributes the computed summary is layered over
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

/// Label image rebuilt from stored polygons
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub offset: Offset,
    pub raster: Raster,
}
