//! HTTP API for inspecting and driving the slice cache.
//!
//! - GET /health
//! - GET /v1/cache, GET /v1/cache/{key}, GET /v1/cache/{key}/lookup
//! - GET /v1/cache/events (SSE)
//! - GET /v1/requests, POST /v1/requests
//! - POST /v1/slices
//! - POST /v1/navigate
//! - GET /v1/stats

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::snapshot::CacheSnapshot;
use crate::engine::SliceCache;
use crate::query::definition::{QueryDefinition, Record};
use crate::query::registry::SliceEntry;
use crate::schedule::slice::{SchedulerStatsSnapshot, SliceTicket};
use crate::server::streaming::state_to_sse_stream;

/// Application state shared across handlers.
pub struct AppState {
    pub cache: SliceCache,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/cache", get(cache_state))
        .route("/v1/cache/events", get(cache_events))
        .route("/v1/cache/{key}", get(cache_entry))
        .route("/v1/cache/{key}/lookup", get(cache_lookup))
        .route("/v1/requests", get(list_requests).post(add_request))
        .route("/v1/slices", post(load_slice))
        .route("/v1/navigate", post(navigate))
        .route("/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheSummary,
    pub router_running: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheSummary {
    pub entries: usize,
    pub records: usize,
}

impl From<&CacheSnapshot> for CacheSummary {
    fn from(state: &CacheSnapshot) -> Self {
        Self {
            entries: state.len(),
            records: state.record_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheEntryResponse {
    pub key: String,
    pub count: usize,
    pub items: Vec<Record>,
}

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub value: String,
    #[serde(default = "default_search_field")]
    pub field: String,
    #[serde(default = "default_label_field")]
    pub label: String,
}

fn default_search_field() -> String {
    "id".to_string()
}
fn default_label_field() -> String {
    "label".to_string()
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub key: String,
    pub value: String,
    pub label: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct AddRequestResponse {
    pub key: String,
    pub added: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoadSliceRequest {
    pub entries: Vec<SliceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.cache.state();
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache: CacheSummary::from(&snapshot),
        router_running: state.cache.router().is_running(),
    })
}

async fn cache_state(State(state): State<Arc<AppState>>) -> Json<CacheSnapshot> {
    Json(state.cache.state())
}

async fn cache_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Sse::new(state_to_sse_stream(state.cache.watch())).keep_alive(KeepAlive::default())
}

async fn cache_entry(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<CacheEntryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state.cache.state();
    let items = snapshot
        .get(&key)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("no cache entry for {key:?}")))?
        .to_vec();
    Ok(Json(CacheEntryResponse {
        key,
        count: items.len(),
        items,
    }))
}

async fn cache_lookup(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<LookupParams>,
) -> Result<Json<LookupResponse>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state.cache.state();
    let label = snapshot
        .lookup(&key, &params.field, &params.value, &params.label)
        .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?
        .cloned();
    Ok(Json(LookupResponse {
        key,
        value: params.value,
        label,
    }))
}

async fn list_requests(State(state): State<Arc<AppState>>) -> Json<Vec<QueryDefinition>> {
    Json(
        state
            .cache
            .request_configs()
            .iter()
            .map(|d| QueryDefinition::clone(d))
            .collect(),
    )
}

async fn add_request(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<QueryDefinition>,
) -> Result<(StatusCode, Json<AddRequestResponse>), (StatusCode, Json<ErrorResponse>)> {
    let key = definition.key.clone();
    let added = state
        .cache
        .add_request_config(definition)
        .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(AddRequestResponse { key, added })))
}

async fn load_slice(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadSliceRequest>,
) -> (StatusCode, Json<SliceTicket>) {
    let ticket = state.cache.load_entries(&req.entries);
    info!(slice = %ticket.id, queries = ticket.queries, "Slice requested over HTTP");
    (StatusCode::ACCEPTED, Json(ticket))
}

async fn navigate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NavigateRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    if !state.cache.router().is_running() {
        return Err(error(
            StatusCode::CONFLICT,
            "route prefetcher is not running",
        ));
    }
    state.cache.navigate(req.path).await;
    Ok(StatusCode::ACCEPTED)
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<SchedulerStatsSnapshot> {
    Json(state.cache.stats())
}
