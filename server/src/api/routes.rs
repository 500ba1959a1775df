//! HTTP route handlers for the mapobject API

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Serialize;

use crate::config::Config;
use crate::geometry::Raster;
use crate::ingest::{IngestService, LabelResultRequest};
use crate::model::{
    Feature, FeatureId, LabelResult, MapobjectError, MapobjectType, MapobjectTypeId, ReferenceKind,
};
use crate::store::{MapobjectStore, WriteSummary};
use crate::table::{ExportRequest, TableExporter, TableKind};

use super::types::{
    CreateMapobjectTypeRequest, FeatureValueUpload, ImageFormat, RegionParams,
    RenameFeatureRequest, SegmentationImageResponse, SegmentationUpload, ValuesWrittenResponse,
};

/// Application state shared by the mapobject routes
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MapobjectStore>,
    pub ingest: IngestService,
    pub exporter: TableExporter,
}

impl AppState {
    pub fn new(store: Arc<dyn MapobjectStore>, config: &Config) -> Self {
        Self {
            ingest: IngestService::new(store.clone(), config.ingest.clone()),
            exporter: TableExporter::new(
                store.clone(),
                config.experiment.name.clone(),
                config.query.export_parallelism,
            ),
            store,
        }
    }
}

/// Error response for the mapobject API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<MapobjectError> for ErrorResponse {
    fn from(e: MapobjectError) -> Self {
        Self {
            error: e.to_string(),
            code: e.code().to_string(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "malformed_input" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "geometry_error" => StatusCode::UNPROCESSABLE_ENTITY,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Log a failed operation and turn it into a response
fn failed(operation: &str, e: MapobjectError) -> ErrorResponse {
    tracing::warn!("Failed to {}: {}", operation, e);
    ErrorResponse::from(e)
}

/// GET /api/mapobject_types
pub async fn list_mapobject_types(
    State(state): State<AppState>,
) -> Result<Json<Vec<MapobjectType>>, ErrorResponse> {
    let types = state
        .store
        .list_mapobject_types()
        .await
        .map_err(|e| failed("list mapobject types", e))?;
    Ok(Json(types))
}

/// POST /api/mapobject_types
pub async fn create_mapobject_type(
    State(state): State<AppState>,
    Json(request): Json<CreateMapobjectTypeRequest>,
) -> Result<(StatusCode, Json<MapobjectType>), ErrorResponse> {
    let kind: ReferenceKind = request
        .reference_kind
        .parse()
        .map_err(|e| failed("create mapobject type", e))?;
    let created = state
        .store
        .create_mapobject_type(&request.name, kind)
        .await
        .map_err(|e| failed("create mapobject type", e))?;
    tracing::info!(
        "Created mapobject type \"{}\" anchored at {}",
        created.name,
        kind.as_str()
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// DELETE /api/mapobject_types/:id
pub async fn delete_mapobject_type(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
) -> Result<StatusCode, ErrorResponse> {
    state
        .store
        .delete_mapobject_type(id)
        .await
        .map_err(|e| failed("delete mapobject type", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/mapobject_types/:id/features
pub async fn list_features(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
) -> Result<Json<Vec<Feature>>, ErrorResponse> {
    state
        .store
        .get_mapobject_type(id)
        .await
        .map_err(|e| failed("list features", e))?;
    let features = state
        .store
        .list_features(id)
        .await
        .map_err(|e| failed("list features", e))?;
    Ok(Json(features))
}

/// PUT /api/features/:id
pub async fn rename_feature(
    State(state): State<AppState>,
    Path(id): Path<FeatureId>,
    Json(request): Json<RenameFeatureRequest>,
) -> Result<Json<Feature>, ErrorResponse> {
    let feature = state
        .store
        .rename_feature(id, &request.name)
        .await
        .map_err(|e| failed("rename feature", e))?;
    Ok(Json(feature))
}

/// DELETE /api/features/:id
pub async fn delete_feature(
    State(state): State<AppState>,
    Path(id): Path<FeatureId>,
) -> Result<StatusCode, ErrorResponse> {
    state
        .store
        .delete_feature(id)
        .await
        .map_err(|e| failed("delete feature", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/mapobject_types/:id/segmentations
pub async fn add_segmentations(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
    Json(upload): Json<SegmentationUpload>,
) -> Result<Json<WriteSummary>, ErrorResponse> {
    let raster = Raster::from_rows(&upload.image)
        .map_err(|e| failed("add segmentations", e.into()))?;
    let summary = state
        .ingest
        .add_segmentations(id, &upload.selector(), upload.tpoint, upload.zplane, &raster)
        .await
        .map_err(|e| failed("add segmentations", e))?;
    Ok(Json(summary))
}

/// GET /api/mapobject_types/:id/segmentations
pub async fn get_segmentations(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
    Query(params): Query<RegionParams>,
) -> Result<Response, ErrorResponse> {
    let format =
        ImageFormat::parse(params.format.as_deref()).map_err(|e| failed("get segmentations", e))?;
    let selector = params.selector();
    let tpoint = params.tpoint.unwrap_or(0);
    let zplane = params.zplane.unwrap_or(0);

    match format {
        ImageFormat::Json => {
            let reconstruction = state
                .ingest
                .get_segmentations(id, &selector, tpoint, zplane)
                .await
                .map_err(|e| failed("get segmentations", e))?;
            Ok(Json(SegmentationImageResponse {
                offset: reconstruction.offset,
                image: reconstruction.raster.to_rows(),
            })
            .into_response())
        }
        ImageFormat::Png => {
            let png = state
                .ingest
                .get_segmentations_png(id, &selector, tpoint, zplane)
                .await
                .map_err(|e| failed("get segmentations", e))?;
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
            Ok((StatusCode::OK, headers, Body::from(png)).into_response())
        }
    }
}

/// POST /api/mapobject_types/:id/feature-values
pub async fn add_feature_values(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
    Json(upload): Json<FeatureValueUpload>,
) -> Result<Json<ValuesWrittenResponse>, ErrorResponse> {
    let selector = upload.selector();
    let tpoint = upload.tpoint;
    let batch = upload.into_batch();
    let written = state
        .ingest
        .add_feature_values(id, &selector, tpoint, &batch)
        .await
        .map_err(|e| failed("add feature values", e))?;
    Ok(Json(ValuesWrittenResponse { written }))
}

/// POST /api/mapobject_types/:id/label-results
pub async fn add_label_result(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
    Json(request): Json<LabelResultRequest>,
) -> Result<(StatusCode, Json<LabelResult>), ErrorResponse> {
    let result = state
        .ingest
        .add_label_result(id, &request)
        .await
        .map_err(|e| failed("add label result", e))?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/mapobject_types/:id/feature-values
pub async fn export_feature_values(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
    Query(params): Query<RegionParams>,
) -> Result<Response, ErrorResponse> {
    stream_table(&state, TableKind::FeatureValues, id, &params).await
}

/// GET /api/mapobject_types/:id/metadata
pub async fn export_metadata(
    State(state): State<AppState>,
    Path(id): Path<MapobjectTypeId>,
    Query(params): Query<RegionParams>,
) -> Result<Response, ErrorResponse> {
    stream_table(&state, TableKind::Metadata, id, &params).await
}

async fn stream_table(
    state: &AppState,
    kind: TableKind,
    id: MapobjectTypeId,
    params: &RegionParams,
) -> Result<Response, ErrorResponse> {
    let request = ExportRequest {
        selector: params.selector(),
        tpoint: params.tpoint,
    };
    let export = state
        .exporter
        .export(kind, id, &request)
        .await
        .map_err(|e| failed("export table", e))?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", export.filename))
        .map_err(|e| {
            failed(
                "export table",
                MapobjectError::MalformedInput(format!("invalid filename: {}", e)),
            )
        })?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((StatusCode::OK, headers, Body::from_stream(export.body)).into_response())
}

/// Create mapobject API routes
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/mapobject_types",
            get(list_mapobject_types).post(create_mapobject_type),
        )
        .route(
            "/mapobject_types/:id",
            axum::routing::delete(delete_mapobject_type),
        )
        .route("/mapobject_types/:id/features", get(list_features))
        .route(
            "/mapobject_types/:id/segmentations",
            get(get_segmentations).post(add_segmentations),
        )
        .route(
            "/mapobject_types/:id/feature-values",
            get(export_feature_values).post(add_feature_values),
        )
        .route("/mapobject_types/:id/metadata", get(export_metadata))
        .route(
            "/mapobject_types/:id/label-results",
            axum::routing::post(add_label_result),
        )
        .route("/features/:id", put(rename_feature).delete(delete_feature))
        .with_state(state)
}
