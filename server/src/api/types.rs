//! Request and response bodies of the HTTP API

use serde::{Deserialize, Serialize};

use crate::geometry::Offset;
use crate::ingest::FeatureValueBatch;
use crate::model::MapobjectError;
use crate::query::ReferenceSelector;

/// Region filters shared by query strings and request bodies
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionParams {
    pub plate_name: Option<String>,
    pub well_name: Option<String>,
    pub well_pos_y: Option<u32>,
    pub well_pos_x: Option<u32>,
    pub tpoint: Option<u32>,
    pub zplane: Option<u32>,
    /// `json` (default) or `png` for reconstructed segmentations
    pub format: Option<String>,
}

impl RegionParams {
    pub fn selector(&self) -> ReferenceSelector {
        ReferenceSelector {
            plate_name: self.plate_name.clone(),
            well_name: self.well_name.clone(),
            well_pos_y: self.well_pos_y,
            well_pos_x: self.well_pos_x,
        }
    }
}

/// Output format of reconstructed segmentations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Json,
    Png,
}

impl ImageFormat {
    pub fn parse(value: Option<&str>) -> Result<Self, MapobjectError> {
        match value.map(str::to_lowercase).as_deref() {
            None | Some("json") => Ok(ImageFormat::Json),
            Some("png") => Ok(ImageFormat::Png),
            Some(other) => Err(MapobjectError::MalformedInput(format!(
                "unsupported image format \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMapobjectTypeRequest {
    pub name: String,
    /// `plate`, `well` or `site`
    pub reference_kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameFeatureRequest {
    pub name: String,
}

/// Label image of one well or site, one row of labels per pixel row
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationUpload {
    pub plate_name: Option<String>,
    pub well_name: Option<String>,
    pub well_pos_y: Option<u32>,
    pub well_pos_x: Option<u32>,
    #[serde(default)]
    pub tpoint: u32,
    #[serde(default)]
    pub zplane: u32,
    pub image: Vec<Vec<u32>>,
}

impl SegmentationUpload {
    pub fn selector(&self) -> ReferenceSelector {
        ReferenceSelector {
            plate_name: self.plate_name.clone(),
            well_name: self.well_name.clone(),
            well_pos_y: self.well_pos_y,
            well_pos_x: self.well_pos_x,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureValueUpload {
    pub plate_name: Option<String>,
    pub well_name: Option<String>,
    pub well_pos_y: Option<u32>,
    pub well_pos_x: Option<u32>,
    #[serde(default)]
    pub tpoint: u32,
    pub names: Vec<String>,
    pub labels: Vec<u32>,
    pub values: Vec<Vec<f64>>,
}

impl FeatureValueUpload {
    pub fn selector(&self) -> ReferenceSelector {
        ReferenceSelector {
            plate_name: self.plate_name.clone(),
            well_name: self.well_name.clone(),
            well_pos_y: self.well_pos_y,
            well_pos_x: self.well_pos_x,
        }
    }

    pub fn into_batch(self) -> FeatureValueBatch {
        FeatureValueBatch {
            names: self.names,
            labels: self.labels,
            values: self.values,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentationImageResponse {
    pub offset: Offset,
    pub image: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValuesWrittenResponse {
    pub written: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format() {
        assert_eq!(ImageFormat::parse(None).unwrap(), ImageFormat::Json);
        assert_eq!(ImageFormat::parse(Some("PNG")).unwrap(), ImageFormat::Png);
        assert!(ImageFormat::parse(Some("tiff")).is_err());
    }

    #[test]
    fn test_upload_defaults_to_first_plane() {
        let upload: SegmentationUpload = serde_json::from_str(
            r#"{"plate_name": "p", "well_name": "A01", "image": [[0, 1]]}"#,
        )
        .unwrap();
        assert_eq!((upload.tpoint, upload.zplane), (0, 0));
        assert_eq!(upload.selector(), ReferenceSelector::well("p", "A01"));
    }
}
