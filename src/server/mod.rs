//! HTTP front end: submit address lists and query the resulting pins.

mod handlers;
mod state;

use axum::routing::{get, post};
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::session::MapSession;

pub fn build_router(session: MapSession) -> Router {
    let state = Arc::new(AppState {
        session: Mutex::new(session),
    });

    Router::new()
        .route("/api/process", post(handlers::process))
        .route("/api/locations", get(handlers::locations))
        .route("/api/locations/{id}", get(handlers::location))
        .route("/api/cluster", post(handlers::cluster))
        .route("/api/zoom", post(handlers::zoom))
        .route("/api/nearby", get(handlers::nearby))
        .route("/api/heatmap", get(handlers::heatmap))
        .route("/api/events", get(handlers::events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, session: MapSession) -> std::io::Result<()> {
    let app = build_router(session);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "server listening");
    eprintln!("  geopin server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app).await
}
