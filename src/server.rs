//! HTTP Server - exposes the layer pipelines via REST API
//!
//! Endpoints:
//! - GET    /api/layers                      → All layers with their status
//! - GET    /api/layers/:id                  → Activate a layer, return its state
//! - DELETE /api/layers/:id                  → Deactivate a layer
//! - POST   /api/layers/:id/retry            → Re-run fetch → classify → render
//! - GET    /api/layers/:id/entries?q=       → Filtered panel list
//! - POST   /api/layers/:id/select/:record   → Select a record
//! - DELETE /api/layers/:id/select           → Clear the selection
//! - GET    /api/regions/:name               → Region join + placeholder stats
//! - /data/*                                 → Locally hosted datasets

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::{Config, LayerKind};
use crate::error::LayerError;
use crate::fetch::DatasetFetcher;
use crate::layer::{FetchTicket, LayerState};
use crate::log_request;
use crate::page::MapPage;
use crate::panel::{self, Legend, PanelEntry};
use crate::region::Region;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub page: Arc<Mutex<MapPage>>,
    pub fetcher: Arc<DatasetFetcher>,
}

impl AppState {
    pub fn new(config: Config, fetcher: Arc<DatasetFetcher>) -> Self {
        let page = MapPage::new(&config);
        Self {
            config: Arc::new(config),
            page: Arc::new(Mutex::new(page)),
            fetcher,
        }
    }

    /// Run a ticket without holding the page lock, then apply the outcome.
    /// The work is detached so a dropped request still completes the layer.
    async fn run(&self, ticket: FetchTicket) {
        let fetcher = self.fetcher.clone();
        let page = self.page.clone();
        let task = tokio::spawn(async move {
            let outcome = ticket.run(&fetcher).await;
            page.lock().await.complete(outcome);
        });
        if let Err(e) = task.await {
            tracing::error!("Fetch task failed: {}", e);
        }
    }
}

struct ApiError(LayerError);

impl From<LayerError> for ApiError {
    fn from(err: LayerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            LayerError::UnknownLayer(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!("{} → {}", self.0, status);
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState, data_dir: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    tracing::debug!("CORS layer configured: allow_origin=Any");

    let api = Router::new()
        .route("/layers", get(list_layers))
        .route("/layers/:id", get(activate_layer).delete(deactivate_layer))
        .route("/layers/:id/retry", post(retry_layer))
        .route("/layers/:id/entries", get(layer_entries))
        .route("/layers/:id/select", axum::routing::delete(deselect_record))
        .route("/layers/:id/select/:record", post(select_record))
        .route("/regions/:name", get(region_summary))
        .with_state(state);
    tracing::debug!("API routes registered");

    Router::new()
        .nest("/api", api)
        .nest_service("/data", ServeDir::new(data_dir))
        .layer(cors)
}

/// Start the HTTP server
pub async fn serve(state: AppState, data_dir: &str, port: u16) -> anyhow::Result<()> {
    tracing::info!("Initializing HTTP server on port {}", port);
    let layers = state.config.layers.len();
    let app = router(state, data_dir);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Starting server on http://localhost:{}", port);
    tracing::info!("  API: http://localhost:{}/api/layers", port);
    tracing::info!("  Data: http://localhost:{}/data/ (from {})", port, data_dir);
    tracing::info!("  Configured layers: {}", layers);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server bound to {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct LayerSummary {
    id: String,
    title: String,
    kind: LayerKind,
    active: bool,
    loaded: bool,
    loading: bool,
    error: Option<String>,
    records: usize,
}

#[derive(Serialize)]
struct LayerResponse {
    id: String,
    title: String,
    kind: LayerKind,
    active: bool,
    state: LayerState,
    legend: Option<Legend>,
}

/// GET /api/layers
async fn list_layers(State(state): State<AppState>) -> impl IntoResponse {
    log_request!("GET", "/api/layers");
    let page = state.page.lock().await;
    let layers: Vec<LayerSummary> = page
        .pipelines()
        .iter()
        .map(|p| LayerSummary {
            id: p.id().to_string(),
            title: p.config().title.clone(),
            kind: p.config().kind,
            active: p.is_active(),
            loaded: p.state().loaded,
            loading: p.state().loading,
            error: p.state().error.clone(),
            records: p.state().records.len(),
        })
        .collect();
    tracing::debug!("Returning {} layers", layers.len());
    Json(layers)
}

async fn layer_response(state: &AppState, id: &str) -> Result<LayerResponse, LayerError> {
    let page = state.page.lock().await;
    let pipeline = page.pipeline(id)?;
    let config = pipeline.config();
    Ok(LayerResponse {
        id: config.id.clone(),
        title: config.title.clone(),
        kind: config.kind,
        active: pipeline.is_active(),
        state: pipeline.state().clone(),
        legend: Legend::for_layer(config, pipeline.renderer().style(), pipeline.state().bounds.as_ref()),
    })
}

/// GET /api/layers/:id - activate and wait for the data
async fn activate_layer(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<LayerResponse>, ApiError> {
    log_request!("GET", format!("/api/layers/{}", id));
    let ticket = state.page.lock().await.begin_activate(&id)?;
    if let Some(ticket) = ticket {
        state.run(ticket).await;
    }
    Ok(Json(layer_response(&state, &id).await?))
}

/// DELETE /api/layers/:id
async fn deactivate_layer(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    log_request!("DELETE", format!("/api/layers/{}", id));
    let event = state.page.lock().await.deactivate(&id)?;
    Ok(match event {
        Some(event) => Json(event).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// POST /api/layers/:id/retry - bypasses the dataset cache
async fn retry_layer(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<LayerResponse>, ApiError> {
    log_request!("POST", format!("/api/layers/{}/retry", id));
    let ticket = state.page.lock().await.retry(&id)?;
    state.run(ticket).await;
    Ok(Json(layer_response(&state, &id).await?))
}

#[derive(Deserialize)]
struct EntriesQuery {
    q: Option<String>,
}

/// GET /api/layers/:id/entries?q=
async fn layer_entries(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<EntriesQuery>,
) -> Result<Json<Vec<PanelEntry>>, ApiError> {
    let query = params.q.unwrap_or_default();
    log_request!("GET", format!("/api/layers/{}/entries", id), q = %query);
    let page = state.page.lock().await;
    let pipeline = page.pipeline(&id)?;
    let entries = panel::entries(pipeline.config(), pipeline.state(), pipeline.renderer().style(), &query);
    tracing::debug!("Returning {} of {} entries", entries.len(), pipeline.state().records.len());
    Ok(Json(entries))
}

/// POST /api/layers/:id/select/:record
async fn select_record(
    State(state): State<AppState>,
    Path((id, record)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    log_request!("POST", format!("/api/layers/{}/select/{}", id, record));
    let event = state.page.lock().await.select(&id, &record)?;
    Ok(match event {
        Some(event) => Json(event).into_response(),
        None => {
            tracing::warn!("Record '{}' not selectable in layer '{}'", record, id);
            StatusCode::NOT_FOUND.into_response()
        }
    })
}

/// DELETE /api/layers/:id/select
async fn deselect_record(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    log_request!("DELETE", format!("/api/layers/{}/select", id));
    let event = state.page.lock().await.deselect(&id)?;
    Ok(match event {
        Some(event) => Json(event).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// GET /api/regions/:name
async fn region_summary(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    log_request!("GET", format!("/api/regions/{}", name));
    match Region::from_name(&name) {
        Some(region) => Json(state.page.lock().await.region_summary(region)).into_response(),
        None => {
            tracing::warn!("Region '{}' not found", name);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
