//! Pipeline configuration.
//!
//! Values come from an optional JSON file (`~/.geopin/config.json` or an
//! explicit path); missing fields take their defaults. Command-line flags are
//! applied on top by the binary, then [`PipelineConfig::validate`] runs before
//! any batch is scheduled.

use crate::location::providers::{DEFAULT_USER_AGENT, NOMINATIM_MIN_INTERVAL, NOMINATIM_SEARCH_URL};
use crate::location::{GeocodeCache, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_NEARBY_RADIUS_M: f64 = 500.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("batch size must be at least 1 (got {0})")]
    InvalidBatchSize(usize),

    #[error("radius must be a finite, non-negative number of meters (got {0})")]
    InvalidRadius(f64),

    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records geocoded concurrently; also the cap on in-flight requests.
    pub batch_size: usize,
    /// Extra attempts for transient geocoder failures. 0 drops on first failure.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Pause between batches, for services with per-second quotas.
    pub batch_pause_ms: u64,
    pub nearby_radius_m: f64,
    /// Skip network providers and use the built-in gazetteer only.
    pub offline: bool,
    pub cache_enabled: bool,
    /// ISO 3166-1 alpha-2 country filter passed to Nominatim.
    pub country: Option<String>,
    pub user_agent: String,
    pub nominatim_url: String,
    /// Minimum spacing between Nominatim requests. Unset: one second for the
    /// public instance, unthrottled for any other endpoint.
    pub min_request_interval_ms: Option<u64>,
    /// Geocode cache file. Unset: `~/.geopin/geocode-cache.json`.
    pub cache_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: 0,
            retry_backoff_ms: 500,
            batch_pause_ms: 0,
            nearby_radius_m: DEFAULT_NEARBY_RADIUS_M,
            offline: false,
            cache_enabled: true,
            country: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            nominatim_url: NOMINATIM_SEARCH_URL.to_string(),
            min_request_interval_ms: None,
            cache_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".geopin")
            .join("config.json")
    }

    /// Load the default config file if it exists, else defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        validate_radius(self.nearby_radius_m)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Spacing the Nominatim provider enforces between request starts.
    pub fn request_interval(&self) -> Duration {
        match self.min_request_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None if self.nominatim_url == NOMINATIM_SEARCH_URL => NOMINATIM_MIN_INTERVAL,
            None => Duration::ZERO,
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(GeocodeCache::default_path)
    }
}

pub fn validate_radius(radius_m: f64) -> Result<f64, ConfigError> {
    if radius_m.is_finite() && radius_m >= 0.0 {
        Ok(radius_m)
    } else {
        Err(ConfigError::InvalidRadius(radius_m))
    }
}
