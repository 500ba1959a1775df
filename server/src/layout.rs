//! Plate layout documents
//!
//! A layout lists plates, their wells and the sites imaged in each well, with
//! every extent given in the shared global frame. Registering a layout creates
//! the reference objects that queries are resolved against.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::geometry::Offset;
use crate::model::MapobjectError;
use crate::store::MapobjectStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLayout {
    pub plates: Vec<PlateLayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateLayout {
    pub name: String,
    #[serde(default)]
    pub wells: Vec<WellLayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellLayout {
    pub name: String,
    pub offset: Offset,
    pub height: usize,
    pub width: usize,
    #[serde(default)]
    pub sites: Vec<SiteLayout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteLayout {
    pub y: u32,
    pub x: u32,
    pub offset: Offset,
    pub height: usize,
    pub width: usize,
}

/// Counts of registered instances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutSummary {
    pub plates: usize,
    pub wells: usize,
    pub sites: usize,
}

impl ExperimentLayout {
    pub fn from_json_str(json: &str) -> Result<Self, MapobjectError> {
        serde_json::from_str(json)
            .map_err(|e| MapobjectError::MalformedInput(format!("invalid layout: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MapobjectError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            MapobjectError::Storage(format!("failed to read layout {:?}: {}", path, e))
        })?;
        Self::from_json_str(&json)
    }

    /// Register every plate, well and site with `store`
    pub async fn register(&self, store: &dyn MapobjectStore) -> Result<LayoutSummary, MapobjectError> {
        let mut summary = LayoutSummary::default();
        for plate_layout in &self.plates {
            let plate = store.register_plate(&plate_layout.name).await?;
            summary.plates += 1;
            for well_layout in &plate_layout.wells {
                let well = store
                    .register_well(
                        plate.id,
                        &well_layout.name,
                        well_layout.offset,
                        well_layout.height,
                        well_layout.width,
                    )
                    .await?;
                summary.wells += 1;
                for site in &well_layout.sites {
                    store
                        .register_site(well.id, site.y, site.x, site.offset, site.height, site.width)
                        .await?;
                    summary.sites += 1;
                }
            }
        }
        info!(
            "Registered layout with {} plates, {} wells and {} sites",
            summary.plates, summary.wells, summary.sites
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const LAYOUT: &str = r#"{
        "plates": [{
            "name": "plate01",
            "wells": [{
                "name": "A01",
                "offset": {"y": 0, "x": 0},
                "height": 10,
                "width": 20,
                "sites": [
                    {"y": 0, "x": 0, "offset": {"y": 0, "x": 0}, "height": 10, "width": 10},
                    {"y": 0, "x": 1, "offset": {"y": 0, "x": 10}, "height": 10, "width": 10}
                ]
            }]
        }]
    }"#;

    #[tokio::test]
    async fn test_register_layout() {
        let layout = ExperimentLayout::from_json_str(LAYOUT).unwrap();
        let store = MemoryStore::new();
        let summary = layout.register(&store).await.unwrap();
        assert_eq!(
            summary,
            LayoutSummary {
                plates: 1,
                wells: 1,
                sites: 2
            }
        );

        let plate = store.find_plate("plate01").await.unwrap().unwrap();
        let well = store.find_well(plate.id, "A01").await.unwrap().unwrap();
        let site = store.find_site(well.id, 0, 1).await.unwrap().unwrap();
        assert_eq!(site.offset, Offset::new(0, 10));
    }

    #[test]
    fn test_invalid_layout() {
        assert!(matches!(
            ExperimentLayout::from_json_str("{\"plates\": [{}]}"),
            Err(MapobjectError::MalformedInput(_))
        ));
    }
}
