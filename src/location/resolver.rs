//! Address resolver: one address in, one coordinate out.
//!
//! Flow: trim → geocoder → first hit. Transient geocoder failures are retried
//! according to [`RetryPolicy`]; an empty answer is final.

use super::cache::{CachedGeocoder, GeocodeCache};
use super::providers::{BuiltinGeocoder, FallbackGeocoder, Geocoder, LocalityGeocoder, NominatimGeocoder};
use super::types::{GeocodeHit, ResolutionError};
use crate::config::PipelineConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behaviour for transient geocoder failures.
///
/// The default never retries: a failed address is dropped for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): backoff * 2^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Turns addresses into coordinates via a shared [`Geocoder`].
#[derive(Clone)]
pub struct AddressResolver {
    geocoder: Arc<dyn Geocoder>,
    retry: RetryPolicy,
}

impl AddressResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            geocoder,
            retry: RetryPolicy::default(),
        }
    }

    /// Build the provider chain the config asks for.
    ///
    /// Offline: the full built-in gazetteer. Online: throttled Nominatim, see
    /// [`AddressResolver::online`].
    pub fn from_config(config: &PipelineConfig) -> Self {
        if config.offline {
            return Self::new(Arc::new(BuiltinGeocoder)).with_retry(config.retry_policy());
        }
        let nominatim = NominatimGeocoder::new()
            .with_base_url(config.nominatim_url.clone())
            .with_user_agent(config.user_agent.clone())
            .with_country_codes(config.country.clone())
            .with_min_interval(config.request_interval());
        Self::online(nominatim, config)
    }

    /// Online chain around `primary`: exact-locality gazetteer fallback, behind
    /// the on-disk cache unless caching is disabled.
    pub fn online<P: Geocoder + 'static>(primary: P, config: &PipelineConfig) -> Self {
        let chain = FallbackGeocoder::new(primary, LocalityGeocoder);
        let geocoder: Arc<dyn Geocoder> = if config.cache_enabled {
            Arc::new(CachedGeocoder::new(chain, GeocodeCache::load_from(config.cache_path())))
        } else {
            Arc::new(chain)
        };
        Self::new(geocoder).with_retry(config.retry_policy())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Persist buffered geocoder state on the blocking pool.
    pub async fn flush(&self) {
        let geocoder = Arc::clone(&self.geocoder);
        if let Err(e) = tokio::task::spawn_blocking(move || geocoder.flush()).await {
            warn!(error = %e, "geocoder flush task failed");
        }
    }

    /// Resolve one address to its best geocoder hit.
    pub async fn resolve(&self, address: &str) -> Result<GeocodeHit, ResolutionError> {
        let query = address.trim();
        if query.is_empty() {
            return Err(ResolutionError::EmptyAddress);
        }

        let mut attempt = 0;
        loop {
            match self.geocoder.geocode(query).await {
                Ok(hits) => {
                    return hits
                        .into_iter()
                        .find(|h| h.coordinate.is_valid())
                        .ok_or_else(|| ResolutionError::NoResults(query.to_string()));
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(address = query, attempt, ?delay, error = %e, "retrying geocode");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ResolutionError::Geocoder {
                        address: query.to_string(),
                        source,
                    });
                }
            }
        }
    }
}
