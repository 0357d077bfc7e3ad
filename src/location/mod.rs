//! Location subsystem for geopin.
//!
//! Provides the geocoder capability trait and its providers (Nominatim, the
//! built-in gazetteer, fixed tables), an on-disk cache, and the address
//! resolver the pipeline drives.

pub mod cache;
pub mod providers;
pub mod resolver;
pub mod types;

pub use cache::{CachedGeocoder, GeocodeCache};
pub use providers::{
    BuiltinGeocoder, FallbackGeocoder, GeocodeFuture, Geocoder, LocalityGeocoder, NominatimGeocoder,
    TableGeocoder,
};
pub use resolver::{AddressResolver, RetryPolicy};
pub use types::{
    AddressRecord, Coordinate, GeocodeError, GeocodeHit, LocationId, LocationSource,
    ResolutionError, ResolvedLocation,
};
