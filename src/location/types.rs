//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// True when both components are finite and inside the WGS-84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.lat >= 0.0 { 'N' } else { 'S' };
        let ew = if self.lng >= 0.0 { 'E' } else { 'W' };
        write!(f, "{:.4}\u{00B0} {}, {:.4}\u{00B0} {}", self.lat.abs(), ns, self.lng.abs(), ew)
    }
}

/// One submitted input row. Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    #[serde(alias = "Address")]
    pub address: String,
    #[serde(default, alias = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "Contact", skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Pin category. Spreadsheet exports often call this column `IconColor`.
    #[serde(
        default,
        alias = "Category",
        alias = "IconColor",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
}

impl AddressRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            contact: None,
            category: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Label for a pin: the record name, or the address when unnamed.
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Which provider produced a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    Cache,
    Nominatim,
    Builtin,
    Table,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "Cache"),
            Self::Nominatim => write!(f, "Nominatim"),
            Self::Builtin => write!(f, "Built-in"),
            Self::Table => write!(f, "Table"),
        }
    }
}

/// A single candidate returned by a geocoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeHit {
    pub coordinate: Coordinate,
    #[serde(default)]
    pub display_name: Option<String>,
    pub source: LocationSource,
}

/// Stable identifier of a stored location, assigned in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A successfully geocoded record, as kept by the marker store.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLocation {
    /// Assigned by `MarkerStore::add`.
    pub id: LocationId,
    pub coordinate: Coordinate,
    pub record: Arc<AddressRecord>,
    pub visible: bool,
    pub display_name: Option<String>,
    pub source: LocationSource,
}

impl ResolvedLocation {
    pub fn new(record: Arc<AddressRecord>, hit: GeocodeHit) -> Self {
        Self {
            id: LocationId(0),
            coordinate: hit.coordinate,
            record,
            visible: true,
            display_name: hit.display_name,
            source: hit.source,
        }
    }

    pub fn address(&self) -> &str {
        &self.record.address
    }
}

// ─── Errors ─────────────────────────────────────────────────────

/// Failure reported by a geocoding provider.
#[derive(Debug, Clone, Error)]
pub enum GeocodeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("service returned status {0}")]
    Status(u16),
}

impl GeocodeError {
    /// Transport failures and throttling/5xx statuses may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Failure to turn one address into a coordinate. Recovered by the scheduler.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("address is blank")]
    EmptyAddress,

    #[error("no results for '{0}'")]
    NoResults(String),

    #[error("geocoding failed for '{address}': {source}")]
    Geocoder {
        address: String,
        #[source]
        source: GeocodeError,
    },
}
