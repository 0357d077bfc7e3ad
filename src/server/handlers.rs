use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::events::{ClusterSummary, LocationDetails, MapEvent};
use crate::location::{AddressRecord, Coordinate, LocationId, ResolvedLocation};
use crate::pipeline::RunReport;
use crate::session::SessionError;
use crate::store::HeatPoint;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match e {
            SessionError::UnknownAddress(_) | SessionError::UnknownLocation(_) => StatusCode::NOT_FOUND,
            SessionError::Config(_) | SessionError::EmptyCluster => StatusCode::BAD_REQUEST,
        };
        api_error(status, e.to_string())
    }
}

// ─── POST /api/process ───────────────────────────────────────────

pub(super) async fn process(
    State(state): State<Arc<AppState>>,
    Json(records): Json<Vec<AddressRecord>>,
) -> Result<Json<RunReport>, ApiError> {
    if let Some(index) = records.iter().position(|r| r.address.trim().is_empty()) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("record {} has a blank address", index),
        ));
    }

    let start = Instant::now();
    let mut session = state.session.lock().await;
    let report = session
        .process(records, |pct| debug!(progress = pct, "batch settled"), None)
        .await;

    info!(
        resolved = report.resolved,
        submitted = report.submitted,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "POST /api/process"
    );
    Ok(Json(report))
}

// ─── GET /api/locations ──────────────────────────────────────────

pub(super) async fn locations(State(state): State<Arc<AppState>>) -> Json<Vec<ResolvedLocation>> {
    let session = state.session.lock().await;
    Json(session.store().all().to_vec())
}

// ─── GET /api/locations/{id} ─────────────────────────────────────

pub(super) async fn location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<LocationDetails>, ApiError> {
    let mut session = state.session.lock().await;
    let details = session.select_location(LocationId(id))?;
    debug!(id, "GET /api/locations/:id");
    Ok(Json(details))
}

// ─── POST /api/cluster ───────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ClusterRequest {
    ids: Vec<LocationId>,
}

pub(super) async fn cluster(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClusterRequest>,
) -> Result<Json<ClusterSummary>, ApiError> {
    let mut session = state.session.lock().await;
    let summary = session.select_cluster(&req.ids)?;
    debug!(members = summary.count, "POST /api/cluster");
    Ok(Json(summary))
}

// ─── POST /api/zoom ──────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ZoomRequest {
    center: Coordinate,
}

pub(super) async fn zoom(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ZoomRequest>,
) -> Result<StatusCode, ApiError> {
    if !req.center.is_valid() {
        return Err(api_error(StatusCode::BAD_REQUEST, "center is not a valid coordinate"));
    }
    state.session.lock().await.zoom_to_cluster(req.center);
    Ok(StatusCode::ACCEPTED)
}

// ─── GET /api/nearby ─────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct NearbyQuery {
    address: Option<String>,
    radius: Option<f64>,
}

#[derive(Serialize)]
pub(super) struct NearbyResponse {
    address: String,
    radius_m: f64,
    matches: Vec<LocationId>,
}

pub(super) async fn nearby(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyQuery>,
) -> Result<Json<NearbyResponse>, ApiError> {
    let address = params.address.as_deref().unwrap_or("").trim();
    if address.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing 'address' parameter"));
    }

    let mut session = state.session.lock().await;
    let radius_m = params.radius.unwrap_or(session.config().nearby_radius_m);
    let matches = session.show_nearby(address, Some(radius_m))?;

    info!(address, radius_m, matches = matches.len(), "GET /api/nearby");
    Ok(Json(NearbyResponse {
        address: address.to_string(),
        radius_m,
        matches,
    }))
}

// ─── GET /api/heatmap ────────────────────────────────────────────

pub(super) async fn heatmap(State(state): State<Arc<AppState>>) -> Json<Vec<HeatPoint>> {
    let session = state.session.lock().await;
    Json(session.heatmap())
}

// ─── GET /api/events ─────────────────────────────────────────────

pub(super) async fn events(State(state): State<Arc<AppState>>) -> Json<Vec<MapEvent>> {
    let mut session = state.session.lock().await;
    Json(session.drain_events())
}
