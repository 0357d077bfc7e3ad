//! Geocoding providers: Nominatim, a built-in gazetteer, fixed tables, and fallback chaining.

use super::types::{Coordinate, GeocodeError, GeocodeHit, LocationSource};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::{ready, Future};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Boxed future returned by [`Geocoder::geocode`].
pub type GeocodeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<GeocodeHit>, GeocodeError>> + Send + 'a>>;

/// An external geocoding capability: free-text address in, ranked candidates out.
///
/// An empty candidate list is a valid answer ("nothing found"); errors are
/// reserved for transport and service failures.
pub trait Geocoder: Send + Sync {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a>;

    /// Write buffered state (e.g. a cache) to disk. Blocking; call it off the
    /// async workers, once a run is over.
    fn flush(&self) {}
}

impl<G: Geocoder + ?Sized> Geocoder for Arc<G> {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        (**self).geocode(address)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

impl<G: Geocoder + ?Sized> Geocoder for Box<G> {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        (**self).geocode(address)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

// ─── Fixed table ────────────────────────────────────────────────

/// Geocoder backed by a caller-supplied address → coordinate table.
///
/// Useful when coordinates are already known (pre-geocoded exports) and for
/// deterministic pipelines. Lookups are case-insensitive on the trimmed address.
#[derive(Debug, Clone, Default)]
pub struct TableGeocoder {
    entries: HashMap<String, Coordinate>,
}

impl TableGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: &str, coordinate: Coordinate) {
        self.entries.insert(table_key(address), coordinate);
    }

    pub fn with(mut self, address: &str, coordinate: Coordinate) -> Self {
        self.insert(address, coordinate);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, address: &str) -> Vec<GeocodeHit> {
        self.entries
            .get(&table_key(address))
            .map(|c| GeocodeHit {
                coordinate: *c,
                display_name: None,
                source: LocationSource::Table,
            })
            .into_iter()
            .collect()
    }
}

fn table_key(address: &str) -> String {
    address.trim().to_lowercase()
}

impl Geocoder for TableGeocoder {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        Box::pin(ready(Ok(self.lookup(address))))
    }
}

// ─── Built-in gazetteer ─────────────────────────────────────────

struct BuiltinCity {
    names: &'static [&'static str], // canonical + aliases
    lat: f64,
    lng: f64,
    country_code: &'static str,
}

const BUILTIN_CITIES: &[BuiltinCity] = &[
    BuiltinCity { names: &["mecca", "makkah", "mekka"], lat: 21.4225, lng: 39.8262, country_code: "SA" },
    BuiltinCity { names: &["medina", "madinah", "al-madinah"], lat: 24.4686, lng: 39.6142, country_code: "SA" },
    BuiltinCity { names: &["riyadh"], lat: 24.7136, lng: 46.6753, country_code: "SA" },
    BuiltinCity { names: &["stockholm"], lat: 59.3293, lng: 18.0686, country_code: "SE" },
    BuiltinCity { names: &["oslo"], lat: 59.9139, lng: 10.7522, country_code: "NO" },
    BuiltinCity { names: &["tromso", "tromsoe"], lat: 69.6492, lng: 18.9553, country_code: "NO" },
    BuiltinCity { names: &["copenhagen", "kobenhavn"], lat: 55.6761, lng: 12.5683, country_code: "DK" },
    BuiltinCity { names: &["helsinki"], lat: 60.1699, lng: 24.9384, country_code: "FI" },
    BuiltinCity { names: &["london"], lat: 51.5074, lng: -0.1278, country_code: "GB" },
    BuiltinCity { names: &["paris"], lat: 48.8566, lng: 2.3522, country_code: "FR" },
    BuiltinCity { names: &["berlin"], lat: 52.5200, lng: 13.4050, country_code: "DE" },
    BuiltinCity { names: &["amsterdam"], lat: 52.3676, lng: 4.9041, country_code: "NL" },
    BuiltinCity { names: &["madrid"], lat: 40.4168, lng: -3.7038, country_code: "ES" },
    BuiltinCity { names: &["rome", "roma"], lat: 41.9028, lng: 12.4964, country_code: "IT" },
    BuiltinCity { names: &["moscow", "moskva"], lat: 55.7558, lng: 37.6173, country_code: "RU" },
    BuiltinCity { names: &["istanbul"], lat: 41.0082, lng: 28.9784, country_code: "TR" },
    BuiltinCity { names: &["cairo", "al-qahirah"], lat: 30.0444, lng: 31.2357, country_code: "EG" },
    BuiltinCity { names: &["casablanca"], lat: 33.5731, lng: -7.5898, country_code: "MA" },
    BuiltinCity { names: &["lagos"], lat: 6.5244, lng: 3.3792, country_code: "NG" },
    BuiltinCity { names: &["nairobi"], lat: -1.2921, lng: 36.8219, country_code: "KE" },
    BuiltinCity { names: &["dubai"], lat: 25.2048, lng: 55.2708, country_code: "AE" },
    BuiltinCity { names: &["tehran"], lat: 35.6892, lng: 51.3890, country_code: "IR" },
    BuiltinCity { names: &["karachi"], lat: 24.8607, lng: 67.0011, country_code: "PK" },
    BuiltinCity { names: &["mumbai", "bombay"], lat: 19.0760, lng: 72.8777, country_code: "IN" },
    BuiltinCity { names: &["delhi", "new delhi"], lat: 28.6139, lng: 77.2090, country_code: "IN" },
    BuiltinCity { names: &["dhaka", "dacca"], lat: 23.8103, lng: 90.4125, country_code: "BD" },
    BuiltinCity { names: &["jakarta"], lat: -6.2088, lng: 106.8456, country_code: "ID" },
    BuiltinCity { names: &["kuala lumpur", "kl"], lat: 3.1390, lng: 101.6869, country_code: "MY" },
    BuiltinCity { names: &["singapore"], lat: 1.3521, lng: 103.8198, country_code: "SG" },
    BuiltinCity { names: &["tokyo"], lat: 35.6762, lng: 139.6503, country_code: "JP" },
    BuiltinCity { names: &["sydney"], lat: -33.8688, lng: 151.2093, country_code: "AU" },
    BuiltinCity { names: &["new york", "newyork", "nyc"], lat: 40.7128, lng: -74.0060, country_code: "US" },
    BuiltinCity { names: &["los angeles", "la"], lat: 34.0522, lng: -118.2437, country_code: "US" },
    BuiltinCity { names: &["chicago"], lat: 41.8781, lng: -87.6298, country_code: "US" },
    BuiltinCity { names: &["toronto"], lat: 43.6532, lng: -79.3832, country_code: "CA" },
    BuiltinCity { names: &["mexico city", "ciudad de mexico"], lat: 19.4326, lng: -99.1332, country_code: "MX" },
    BuiltinCity { names: &["sao paulo"], lat: -23.5505, lng: -46.6333, country_code: "BR" },
    BuiltinCity { names: &["buenos aires"], lat: -34.6037, lng: -58.3816, country_code: "AR" },
];

/// Names shorter than this only ever match exactly.
const MIN_FUZZY_LEN: usize = 4;

/// Compute edit distance between two strings (Levenshtein).
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// Lowercase, strip common diacritics, collapse whitespace.
pub(crate) fn simplify_query(q: &str) -> String {
    q.to_lowercase()
        .replace('ø', "o")
        .replace('å', "a")
        .replace('ä', "a")
        .replace('ö', "o")
        .replace('ü', "u")
        .replace('ß', "ss")
        .replace('é', "e")
        .replace('è', "e")
        .replace('ê', "e")
        .replace('ñ', "n")
        .replace('ã', "a")
        .replace('õ', "o")
        .replace('ç', "c")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Offline gazetteer of well-known cities.
///
/// Matches the locality part of an address: each comma-separated component is
/// tried, last to first, against exact names, then containment, then edit
/// distance <= 2. The gazetteer is city-level only, so every street address in
/// the same city lands on the same pin.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinGeocoder;

impl BuiltinGeocoder {
    pub fn lookup(&self, address: &str) -> Option<GeocodeHit> {
        let components = locality_components(address);
        if let Some(hit) = exact_match(&components) {
            return Some(hit);
        }

        // Containment, long names only
        for comp in components.iter().filter(|c| c.len() >= MIN_FUZZY_LEN) {
            for city in BUILTIN_CITIES {
                let hit = city
                    .names
                    .iter()
                    .filter(|n| n.len() >= MIN_FUZZY_LEN)
                    .any(|n| comp.contains(n) || n.contains(comp.as_str()));
                if hit {
                    return Some(builtin_hit(city));
                }
            }
        }

        // Fuzzy match (edit distance <= 2)
        let mut best: Option<(&BuiltinCity, usize)> = None;
        for comp in components.iter().filter(|c| c.len() >= MIN_FUZZY_LEN) {
            for city in BUILTIN_CITIES {
                for name in city.names.iter().filter(|n| n.len() >= MIN_FUZZY_LEN) {
                    let dist = edit_distance(comp, name);
                    if dist <= 2 && best.map_or(true, |(_, d)| dist < d) {
                        best = Some((city, dist));
                    }
                }
            }
        }

        best.map(|(city, _)| builtin_hit(city))
    }

    /// Exact city-name match on a whole address component, nothing looser.
    pub fn lookup_exact(&self, address: &str) -> Option<GeocodeHit> {
        exact_match(&locality_components(address))
    }
}

/// Simplified comma-separated components, last (most general) first.
fn locality_components(address: &str) -> Vec<String> {
    address
        .split(',')
        .map(simplify_query)
        .filter(|c| !c.is_empty())
        .rev()
        .collect()
}

fn exact_match(components: &[String]) -> Option<GeocodeHit> {
    components.iter().find_map(|comp| {
        BUILTIN_CITIES
            .iter()
            .find(|city| city.names.iter().any(|n| *n == comp.as_str()))
            .map(builtin_hit)
    })
}

fn builtin_hit(city: &BuiltinCity) -> GeocodeHit {
    GeocodeHit {
        coordinate: Coordinate::new(city.lat, city.lng),
        display_name: Some(format!("{}, {}", city.names[0], city.country_code)),
        source: LocationSource::Builtin,
    }
}

impl Geocoder for BuiltinGeocoder {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        Box::pin(ready(Ok(self.lookup(address).into_iter().collect::<Vec<_>>())))
    }
}

/// Gazetteer restricted to exact locality matches.
///
/// Used behind an online provider: an address whose street is unknown may
/// still name a known city outright ("..., Oslo"), but a near-miss such as
/// "Parisville" or "Berlin Road" never lands on a city centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalityGeocoder;

impl Geocoder for LocalityGeocoder {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        Box::pin(ready(Ok(BuiltinGeocoder.lookup_exact(address).into_iter().collect::<Vec<_>>())))
    }
}

// ─── Nominatim provider ─────────────────────────────────────────

pub const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_USER_AGENT: &str = "geopin/0.3 (address-mapper)";

/// The public Nominatim instance allows at most one request per second.
pub const NOMINATIM_MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Deserialize, Debug, Clone)]
struct NominatimResult {
    lat: String,
    lon: String,
    display_name: String,
}

/// OpenStreetMap Nominatim search over blocking HTTP.
///
/// Requests run on tokio's blocking pool so a batch of them can be in flight
/// together without stalling the scheduler. Request starts are spaced at
/// least `min_interval` apart across all clones.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    base_url: String,
    user_agent: String,
    timeout: Duration,
    limit: usize,
    country_codes: Option<String>,
    min_interval: Duration,
    next_slot: Arc<Mutex<Instant>>,
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self {
            base_url: NOMINATIM_SEARCH_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            limit: 3,
            country_codes: None,
            min_interval: NOMINATIM_MIN_INTERVAL,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl NominatimGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum spacing between request starts. Zero disables throttling.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Reserve the next request slot and sleep until it opens.
    async fn wait_turn(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Restrict results to ISO 3166-1 alpha-2 codes (comma-separated).
    pub fn with_country_codes(mut self, codes: Option<String>) -> Self {
        self.country_codes = codes.map(|c| c.to_lowercase());
        self
    }

    fn search_url(&self, query: &str) -> String {
        let country_param = match &self.country_codes {
            Some(cc) => format!("&countrycodes={}", percent_encode(cc)),
            None => String::new(),
        };
        format!(
            "{}?q={}&format=json&limit={}&addressdetails=0{}",
            self.base_url,
            percent_encode(query),
            self.limit.clamp(1, 10),
            country_param,
        )
    }

    /// Blocking search. Prefer the [`Geocoder`] impl from async code.
    pub fn search(&self, query: &str) -> Result<Vec<GeocodeHit>, GeocodeError> {
        let url = self.search_url(query);
        let response = ureq::get(&url)
            .set("User-Agent", &self.user_agent)
            .timeout(self.timeout)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => GeocodeError::Status(code),
                ureq::Error::Transport(t) => GeocodeError::Network(t.to_string()),
            })?;

        let results: Vec<NominatimResult> = response
            .into_json()
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

        results.into_iter().map(parse_result).collect()
    }
}

fn parse_result(r: NominatimResult) -> Result<GeocodeHit, GeocodeError> {
    let lat: f64 = r
        .lat
        .parse()
        .map_err(|e| GeocodeError::InvalidResponse(format!("invalid lat '{}': {}", r.lat, e)))?;
    let lng: f64 = r
        .lon
        .parse()
        .map_err(|e| GeocodeError::InvalidResponse(format!("invalid lon '{}': {}", r.lon, e)))?;
    Ok(GeocodeHit {
        coordinate: Coordinate::new(lat, lng),
        display_name: Some(r.display_name),
        source: LocationSource::Nominatim,
    })
}

impl Geocoder for NominatimGeocoder {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        let client = self.clone();
        let query = address.to_string();
        Box::pin(async move {
            self.wait_turn().await;
            tokio::task::spawn_blocking(move || client.search(&query))
                .await
                .map_err(|e| GeocodeError::Network(format!("geocoding task failed: {e}")))?
        })
    }
}

// ─── Fallback chain ─────────────────────────────────────────────

/// Ask `primary` first; use `fallback` when it finds nothing or fails permanently.
///
/// Transient primary errors (network, 429, 5xx) are returned as-is so the
/// resolver's retry policy sees them. When both come up empty, the primary's
/// answer wins.
#[derive(Debug, Clone)]
pub struct FallbackGeocoder<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Geocoder, F: Geocoder> FallbackGeocoder<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: Geocoder, F: Geocoder> Geocoder for FallbackGeocoder<P, F> {
    fn geocode<'a>(&'a self, address: &'a str) -> GeocodeFuture<'a> {
        Box::pin(async move {
            let primary = self.primary.geocode(address).await;
            match primary {
                Ok(hits) if !hits.is_empty() => Ok(hits),
                Err(e) if e.is_transient() => Err(e),
                other => {
                    debug!(address, "primary geocoder had no answer, trying fallback");
                    match self.fallback.geocode(address).await {
                        Ok(hits) if !hits.is_empty() => Ok(hits),
                        _ => other,
                    }
                }
            }
        })
    }

    fn flush(&self) {
        self.primary.flush();
        self.fallback.flush();
    }
}

// ─── Query encoding ─────────────────────────────────────────────

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
