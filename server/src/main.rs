use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use mapobjects_server::config::Config;
use mapobjects_server::layout::ExperimentLayout;
use mapobjects_server::{AppState, MapobjectStore, MemoryStore, api_routes};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    experiment: String,
    mapobject_types: usize,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> (axum::http::StatusCode, Json<HealthResponse>) {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    // The store is operational if its catalog can be read
    let types = state.store.list_mapobject_types().await;
    let (status, http_status) = if types.is_ok() {
        ("healthy", axum::http::StatusCode::OK)
    } else {
        ("degraded", axum::http::StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        http_status,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            experiment: state.exporter.experiment_name().to_string(),
            mapobject_types: types.map(|t| t.len()).unwrap_or(0),
            uptime_seconds: uptime,
        }),
    )
}

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Record server start time
    START_TIME.set(Instant::now()).ok();

    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mapobjects=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, experiment={}",
        config.host, config.port, config.experiment.name
    );

    let store: Arc<dyn MapobjectStore> = Arc::new(MemoryStore::new());
    if let Some(ref path) = config.experiment.layout_file {
        let layout = ExperimentLayout::from_file(path)?;
        layout.register(store.as_ref()).await?;
    } else {
        info!("No layout file configured (LAYOUT_FILE not set), starting with an empty experiment");
    }

    let app_state = AppState::new(store, &config);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(app_state.clone())
        .nest("/api", api_routes(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Mapobjects server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
