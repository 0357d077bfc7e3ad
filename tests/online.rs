use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use geopin::config::PipelineConfig;
use geopin::location::{AddressRecord, GeocodeCache, LocationSource};
use geopin::session::MapSession;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Local stand-in for a Nominatim search endpoint.
///
/// Queries containing "busy" always get 429; "Kungsgatan" gets one result;
/// everything else gets an empty list.
#[derive(Default)]
struct Stub {
    requests: Mutex<Vec<(String, Instant)>>,
}

impl Stub {
    fn count(&self, needle: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|(q, _)| q.contains(needle)).count()
    }
}

async fn search(State(stub): State<Arc<Stub>>, Query(params): Query<HashMap<String, String>>) -> Response {
    let q = params.get("q").cloned().unwrap_or_default();
    stub.requests.lock().unwrap().push((q.clone(), Instant::now()));
    if q.contains("busy") {
        StatusCode::TOO_MANY_REQUESTS.into_response()
    } else if q.contains("Kungsgatan") {
        Json(json!([{"lat": "59.3367", "lon": "18.0650", "display_name": "Kungsgatan 2, Stockholm"}])).into_response()
    } else {
        Json(json!([])).into_response()
    }
}

async fn spawn_stub() -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub::default());
    let app = Router::new().route("/search", get(search)).with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/search", addr), stub)
}

fn input() -> Vec<AddressRecord> {
    vec![
        AddressRecord::new("Kungsgatan 2, Stockholm"),
        AddressRecord::new("busy street 1, Oslo"),
        AddressRecord::new("12 Elm St, Parisville, TX"),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_online_run_retries_drops_and_caches() {
    let (url, stub) = spawn_stub().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("geocode-cache.json");
    let config = PipelineConfig {
        nominatim_url: url,
        max_retries: 2,
        retry_backoff_ms: 1,
        min_request_interval_ms: Some(30),
        cache_path: Some(cache_path.clone()),
        ..PipelineConfig::default()
    };
    let mut session = MapSession::from_config(config).unwrap();

    let report = session.process(input(), |_| {}, None).await;

    assert_eq!(report.resolved, 1);
    assert_eq!(report.failures.len(), 2);
    let pin = &session.store().all()[0];
    assert_eq!(pin.address(), "Kungsgatan 2, Stockholm");
    assert_eq!(pin.source, LocationSource::Nominatim);

    // Throttled requests are retried, then dropped; no gazetteer pin for Oslo.
    assert_eq!(stub.count("busy"), 3);
    assert!(session.store().find_by_address("busy street 1, Oslo").is_none());
    assert!(session.store().find_by_address("12 Elm St, Parisville, TX").is_none());

    // Request starts are spaced by the configured interval.
    let mut times: Vec<Instant> = stub.requests.lock().unwrap().iter().map(|(_, t)| *t).collect();
    times.sort();
    assert_eq!(times.len(), 5);
    assert!(times.windows(2).all(|w| w[1] - w[0] >= Duration::from_millis(20)));

    // Only the real hit was written, once the run ended.
    let cache = GeocodeCache::load_from(cache_path.clone());
    assert_eq!(cache.len(), 1);
    assert!(cache.get("kungsgatan 2, stockholm").is_some());
    assert!(cache.get("12 Elm St, Parisville, TX").is_none());

    // Second run answers the cached address without a request.
    let report = session.process(input(), |_| {}, None).await;
    assert_eq!(report.resolved, 1);
    assert_eq!(stub.count("Kungsgatan"), 1);
    assert_eq!(session.store().all()[0].source, LocationSource::Cache);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_online_run_without_cache_writes_nothing() {
    let (url, _stub) = spawn_stub().await;
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("geocode-cache.json");
    let config = PipelineConfig {
        nominatim_url: url,
        cache_enabled: false,
        cache_path: Some(cache_path.clone()),
        ..PipelineConfig::default()
    };
    let mut session = MapSession::from_config(config).unwrap();
    let report = session.process(input(), |_| {}, None).await;

    assert_eq!(report.resolved, 1);
    assert!(!cache_path.exists());
}
