//! Label results: per-object classification or continuous scores
//!
//! A label result is one record shape with a kind tag. Summary attributes are
//! computed by a pure function of the kind and the values, always into a new
//! attributes map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{LabelResultId, MapobjectTypeId};

/// Free-form attributes attached to a label result
pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelResultKind {
    /// Discrete classes (e.g. cluster ids)
    Scalar,
    /// Real-valued scores
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResult {
    pub id: LabelResultId,
    pub name: String,
    pub mapobject_type_id: MapobjectTypeId,
    pub kind: LabelResultKind,
    pub attributes: Attributes,
}

/// Summary attributes for `values`, layered over a copy of `base`.
///
/// Scalar results get `labels` (sorted distinct values); continuous results get
/// `min` and `max`. NaN values are ignored. The returned map never aliases
/// `base`.
pub fn summarize(kind: LabelResultKind, values: &[f64], base: Option<&Attributes>) -> Attributes {
    let mut attributes = base.cloned().unwrap_or_default();
    let finite = values.iter().copied().filter(|v| !v.is_nan());

    match kind {
        LabelResultKind::Scalar => {
            let mut labels: Vec<f64> = finite.collect();
            labels.sort_by(f64::total_cmp);
            labels.dedup();
            attributes.insert(
                "labels".to_string(),
                Value::Array(labels.into_iter().map(number).collect()),
            );
        }
        LabelResultKind::Continuous => {
            let (min, max) = finite.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), v| {
                (
                    Some(lo.map_or(v, |lo| lo.min(v))),
                    Some(hi.map_or(v, |hi| hi.max(v))),
                )
            });
            attributes.insert("min".to_string(), min.map_or(Value::Null, number));
            attributes.insert("max".to_string(), max.map_or(Value::Null, number));
        }
    }

    attributes
}

fn number(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}
