//! geopin: batched, rate-limited geocoding of address lists into map pins.
//!
//! Records go through [`pipeline::BatchScheduler`] in fixed-size batches, each
//! resolved by [`location::AddressResolver`] against a pluggable
//! [`location::Geocoder`]. Successes land in [`store::MarkerStore`], where
//! [`query`] answers radius queries and [`session::MapSession`] turns user
//! actions into [`events::MapEvent`]s for a renderer.

pub mod config;
pub mod events;
pub mod input;
pub mod location;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod session;
pub mod store;
