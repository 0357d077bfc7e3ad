//! File-based geocode cache at ~/.geopin/geocode-cache.json.
//!
//! TTL: 30 days. Case-insensitive, whitespace-trimmed keys.
//! Only the top hit per address is kept; misses and gazetteer answers are
//! never cached. Writes are buffered in memory until [`GeocodeCache::persist`]
//! (or [`Geocoder::flush`] on the decorator) runs.

use super::providers::{GeocodeFuture, Geocoder};
use super::types::{Coordinate, GeocodeHit, LocationSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

const CACHE_TTL_MS: i64 = 30 * 24 * 3600 * 1000; // 30 days in ms

#[derive(Serialize, Deserialize, Clone)]
struct CacheEntry {
    lat: f64,
    lng: f64,
    timestamp: i64,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    source_name: Option<String>,
}

/// Persistent address → coordinate cache.
pub struct GeocodeCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
    dirty: bool,
}

impl GeocodeCache {
    /// Load cache from the default location (~/.geopin/geocode-cache.json).
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load cache from a specific path. A missing or unreadable file starts empty.
    pub fn load_from(path: PathBuf) -> Self {
        let entries = Self::read_file(&path).unwrap_or_default();
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".geopin")
            .join("geocode-cache.json")
    }

    fn read_file(path: &Path) -> Option<HashMap<String, CacheEntry>> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn key(address: &str) -> String {
        address.trim().to_lowercase()
    }

    /// Look up an address. Returns None if missing or expired.
    pub fn get(&self, address: &str) -> Option<GeocodeHit> {
        let entry = self.entries.get(&Self::key(address))?;

        let now = chrono::Utc::now().timestamp_millis();
        if now - entry.timestamp > CACHE_TTL_MS {
            return None; // expired
        }

        Some(GeocodeHit {
            coordinate: Coordinate::new(entry.lat, entry.lng),
            display_name: entry.display_name.clone(),
            source: LocationSource::Cache,
        })
    }

    /// Store a hit in memory. Nothing reaches disk until [`persist`](Self::persist).
    pub fn put(&mut self, address: &str, hit: &GeocodeHit) {
        let entry = CacheEntry {
            lat: hit.coordinate.lat,
            lng: hit.coordinate.lng,
            timestamp: chrono::Utc::now().timestamp_millis(),
            display_name: hit.display_name.clone(),
            source_name: Some(hit.source.to_string()),
        };
        self.entries.insert(Self::key(address), entry);
        self.dirty = true;
    }

    /// Whether entries were added since the last successful persist.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the whole cache file if anything changed. Failures are logged and
    /// leave the cache dirty for the next attempt.
    pub fn persist(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => match fs::write(&self.path, json) {
                Ok(()) => {
                    debug!(path = %self.path.display(), entries = self.entries.len(), "geocode cache written");
                    self.dirty = false;
                }
                Err(e) => warn!(path = %self.path.display(), error = %e, "could not write geocode cache"),
            },
            Err(e) => warn!(error = %e, "could not serialize geocode cache"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Geocoder decorator that answers from [`GeocodeCache`] before asking `inner`.
pub struct CachedGeocoder<G> {
    inner: G,
    cache: Mutex<GeocodeCache>,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G, cache: GeocodeCache) -> Self {
        Self {
            inner,
            cache: Mutex::new(cache),
        }
    }

    /// Number of cached addresses.
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        Box::pin(async move {
            let cached = self
                .cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(address);
            if let Some(hit) = cached {
                debug!(address, "geocode cache hit");
                return Ok(vec![hit]);
            }

            let hits = self.inner.geocode(address).await?;
            match hits.first() {
                Some(top) if top.source != LocationSource::Builtin => {
                    self.cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .put(address, top);
                }
                _ => {}
            }
            Ok(hits)
        })
    }

    fn flush(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).persist();
        self.inner.flush();
    }
}
