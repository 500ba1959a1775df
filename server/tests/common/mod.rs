//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::get as route_get,
};
use mapobjects_server::config::Config;
use mapobjects_server::layout::ExperimentLayout;
use mapobjects_server::{AppState, MapobjectStore, MemoryStore, api_routes};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::util::ServiceExt;
use tower_http::cors::{Any, CorsLayer};

/// plate01: well A01 imaged at sites (0, 0) and (0, 1), well A02 at one site
pub const TEST_LAYOUT: &str = r#"{
    "plates": [{
        "name": "plate01",
        "wells": [
            {
                "name": "A01",
                "offset": {"y": 0, "x": 0},
                "height": 10,
                "width": 20,
                "sites": [
                    {"y": 0, "x": 0, "offset": {"y": 0, "x": 0}, "height": 10, "width": 10},
                    {"y": 0, "x": 1, "offset": {"y": 0, "x": 10}, "height": 10, "width": 10}
                ]
            },
            {
                "name": "A02",
                "offset": {"y": 0, "x": 20},
                "height": 10,
                "width": 10,
                "sites": [
                    {"y": 0, "x": 0, "offset": {"y": 0, "x": 20}, "height": 10, "width": 10}
                ]
            }
        ]
    }]
}"#;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a test application router over a store with the test layout
pub async fn create_test_app_with_store() -> (Router, Arc<dyn MapobjectStore>) {
    let store: Arc<dyn MapobjectStore> = Arc::new(MemoryStore::new());
    ExperimentLayout::from_json_str(TEST_LAYOUT)
        .unwrap()
        .register(store.as_ref())
        .await
        .unwrap();

    let mut config = Config::default();
    config.experiment.name = "exp".to_string();
    let app_state = AppState::new(store.clone(), &config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", route_get(health))
        .nest("/api", api_routes(app_state))
        .layer(cors);

    (app, store)
}

/// Create a test application router with all routes configured
pub async fn create_test_app() -> Router {
    create_test_app_with_store().await.0
}

/// Response status, headers and raw body
pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }

    /// CSV body split into lines, each split into fields
    pub fn csv(&self) -> Vec<Vec<String>> {
        self.text()
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| line.split(',').map(str::to_string).collect())
            .collect()
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let header_text = |name| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_type = header_text(header::CONTENT_TYPE);
    let content_disposition = header_text(header::CONTENT_DISPOSITION);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    TestResponse {
        status,
        content_type,
        content_disposition,
        body,
    }
}

pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, "GET", uri, None).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> TestResponse {
    send(app, "POST", uri, Some(body)).await
}

/// Create a mapobject type and return its id
pub async fn create_type(app: &Router, name: &str, reference_kind: &str) -> u64 {
    let response = post(
        app,
        "/api/mapobject_types",
        json!({"name": name, "reference_kind": reference_kind}),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    response.json()["id"].as_u64().unwrap()
}

/// 10x10 label image with a 2x2 square for each (label, top row, left column)
pub fn squares(objects: &[(u32, usize, usize)]) -> Vec<Vec<u32>> {
    let mut image = vec![vec![0u32; 10]; 10];
    for &(label, row, col) in objects {
        for r in row..row + 2 {
            for c in col..col + 2 {
                image[r][c] = label;
            }
        }
    }
    image
}

/// Upload a label image for one site of plate01
pub async fn upload_site(
    app: &Router,
    type_id: u64,
    well: &str,
    x: u32,
    tpoint: u32,
    image: Vec<Vec<u32>>,
) -> TestResponse {
    post(
        app,
        &format!("/api/mapobject_types/{}/segmentations", type_id),
        json!({
            "plate_name": "plate01",
            "well_name": well,
            "well_pos_y": 0,
            "well_pos_x": x,
            "tpoint": tpoint,
            "image": image,
        }),
    )
    .await
}

/// Initialize test logging for detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mapobjects=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
