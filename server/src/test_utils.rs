//! Test Utilities Module
//!
//! Fixtures shared by the unit tests: a registered plate layout, an object
//! type anchored at sites, and the services built over one in-memory store.
//! This module is only compiled when running tests.

#![cfg(test)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde::de::DeserializeOwned;
use tower::util::ServiceExt;

use crate::api::{AppState, api_routes};
use crate::config::{Config, IngestConfig};
use crate::geometry::{Offset, Raster};
use crate::ingest::IngestService;
use crate::model::{MapobjectType, Plate, ReferenceKind, Site, Well};
use crate::query::{ContainmentQueryEngine, ReferenceResolver};
use crate::store::{MapobjectStore, MemoryStore};

// ============================================================================
// Store Fixture
// ============================================================================

/// One plate with one well imaged at two sites, plus a "Cells" type
pub struct TestFixture {
    pub store: Arc<dyn MapobjectStore>,
    pub plate: Plate,
    pub well: Well,
    pub sites: Vec<Site>,
    pub cells: MapobjectType,
    pub resolver: ReferenceResolver,
    pub engine: ContainmentQueryEngine,
    pub ingest: IngestService,
}

/// Well A01 of plate01 covers rows 0..10 and columns 0..20; site (0, 0)
/// covers its left half and site (0, 1) its right half
pub async fn two_site_store() -> TestFixture {
    let store: Arc<dyn MapobjectStore> = Arc::new(MemoryStore::new());

    let plate = store.register_plate("plate01").await.unwrap();
    let well = store
        .register_well(plate.id, "A01", Offset::new(0, 0), 10, 20)
        .await
        .unwrap();
    let mut sites = Vec::new();
    for x in 0..2u32 {
        let site = store
            .register_site(well.id, 0, x, Offset::new(0, 10 * x as i64), 10, 10)
            .await
            .unwrap();
        sites.push(site);
    }
    let cells = store
        .create_mapobject_type("Cells", ReferenceKind::Site)
        .await
        .unwrap();

    TestFixture {
        resolver: ReferenceResolver::new(store.clone()),
        engine: ContainmentQueryEngine::new(store.clone()),
        ingest: IngestService::new(store.clone(), IngestConfig::default()),
        store,
        plate,
        well,
        sites,
        cells,
    }
}

// ============================================================================
// Mock Data Factories
// ============================================================================

/// 10x10 raster with a 2x2 square for each (label, top row, left column)
pub fn square_raster(objects: &[(u32, usize, usize)]) -> Raster {
    let mut raster = Raster::zeros(10, 10);
    for &(label, row, col) in objects {
        for r in row..row + 2 {
            for c in col..col + 2 {
                raster.set(r, c, label);
            }
        }
    }
    raster
}

// ============================================================================
// Router Helpers
// ============================================================================

/// Router over the fixture's store
pub fn test_router(fixture: &TestFixture) -> Router {
    let state = AppState::new(fixture.store.clone(), &Config::default());
    Router::new().nest("/api", api_routes(state))
}

/// Make a GET request and parse the JSON response
pub async fn get_json<T: DeserializeOwned>(router: &Router, uri: &str) -> (StatusCode, Option<T>) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Failed to execute request");
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    let json: Option<T> = serde_json::from_slice(&body).ok();
    (status, json)
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Initialize test logging with detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mapobjects=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// Tests for Test Utilities
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_layout() {
        init_test_logging();
        let fixture = two_site_store().await;
        assert_eq!(fixture.sites.len(), 2);
        assert_eq!(fixture.sites[1].offset, Offset::new(0, 10));
        assert_eq!(fixture.well.plate_id, fixture.plate.id);
    }

    #[tokio::test]
    async fn test_router_lists_types() {
        let fixture = two_site_store().await;
        let router = test_router(&fixture);
        let (status, types) = get_json::<Vec<MapobjectType>>(&router, "/api/mapobject_types").await;

        assert_eq!(status, StatusCode::OK);
        assert!(types.unwrap().iter().any(|t| t.name == "Cells"));
    }

    #[test]
    fn test_square_raster() {
        let raster = square_raster(&[(3, 1, 1)]);
        assert_eq!(raster.get(1, 1), 3);
        assert_eq!(raster.get(2, 2), 3);
        assert_eq!(raster.get(3, 3), 0);
    }
}
