//! Map session: one caller-owned context tying the pipeline, the marker store
//! and the outgoing event queue together.
//!
//! A renderer drives the session (process a list, react to clicks) and drains
//! [`MapEvent`]s to update the map.

use crate::config::{validate_radius, ConfigError, PipelineConfig};
use crate::events::{ClusterSummary, LocationDetails, MapEvent, CLUSTER_ZOOM_STEP};
use crate::location::{AddressRecord, AddressResolver, Coordinate, Geocoder, LocationId};
use crate::pipeline::{BatchScheduler, CancelToken, RunReport, SchedulerState};
use crate::query::{self, Bounds};
use crate::store::{HeatPoint, MarkerStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no mapped location has address '{0}'")]
    UnknownAddress(String),

    #[error("no location with id {0}")]
    UnknownLocation(LocationId),

    #[error("cluster has no members")]
    EmptyCluster,
}

pub struct MapSession {
    config: PipelineConfig,
    scheduler: BatchScheduler,
    store: MarkerStore,
    events: Vec<MapEvent>,
}

impl MapSession {
    /// Validate `config` and build a session around `resolver`.
    pub fn new(config: PipelineConfig, resolver: AddressResolver) -> Result<Self, SessionError> {
        let scheduler = BatchScheduler::from_config(resolver, &config)?;
        Ok(Self {
            config,
            scheduler,
            store: MarkerStore::new(),
            events: Vec::new(),
        })
    }

    /// Session using the provider chain the config describes.
    pub fn from_config(config: PipelineConfig) -> Result<Self, SessionError> {
        let resolver = AddressResolver::from_config(&config);
        Self::new(config, resolver)
    }

    pub fn with_geocoder(config: PipelineConfig, geocoder: Arc<dyn Geocoder>) -> Result<Self, SessionError> {
        Self::new(config, AddressResolver::new(geocoder))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &MarkerStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MarkerStore {
        &mut self.store
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Replace the current pins with the geocoded `records`.
    ///
    /// The store is cleared first, so re-processing the same list never
    /// duplicates pins. Emits `FitBounds` over the new pins if any resolved.
    pub async fn process<F>(
        &mut self,
        records: Vec<AddressRecord>,
        on_progress: F,
        cancel: Option<&CancelToken>,
    ) -> RunReport
    where
        F: FnMut(f64),
    {
        self.store.clear();
        let records: Vec<Arc<AddressRecord>> = records.into_iter().map(Arc::new).collect();
        info!(count = records.len(), batch_size = self.scheduler.batch_size(), "geocoding addresses");

        let report = self
            .scheduler
            .run(&records, &mut self.store, on_progress, cancel)
            .await;

        if let Some(bounds) = self.store.bounds() {
            self.events.push(MapEvent::FitBounds(bounds));
        }
        report
    }

    /// Show only the pins within `radius_m` (default from config) of the pin at `address`.
    ///
    /// Fits the viewport to the reference point plus the remaining pins and
    /// closes any open info window.
    pub fn show_nearby(&mut self, address: &str, radius_m: Option<f64>) -> Result<Vec<LocationId>, SessionError> {
        let radius = validate_radius(radius_m.unwrap_or(self.config.nearby_radius_m))?;
        let center = self
            .store
            .find_by_address(address)
            .map(|l| l.coordinate)
            .ok_or_else(|| SessionError::UnknownAddress(address.to_string()))?;

        let matches = query::nearby(center, radius, self.store.all_mut());

        let mut bounds = Bounds::around(center);
        for loc in self.store.visible() {
            bounds.extend(loc.coordinate);
        }
        self.events.push(MapEvent::FitBounds(bounds));
        self.events.push(MapEvent::CloseInfoWindow);
        Ok(matches)
    }

    /// Make every pin visible again after a nearby filter.
    pub fn reset_visibility(&mut self) {
        self.store.show_all();
    }

    pub fn select_location(&mut self, id: LocationId) -> Result<LocationDetails, SessionError> {
        let loc = self.store.get(id).ok_or(SessionError::UnknownLocation(id))?;
        let details = LocationDetails::from(loc);
        self.events.push(MapEvent::LocationSelected(details.clone()));
        Ok(details)
    }

    /// Summarize a cluster the renderer grouped together.
    pub fn select_cluster(&mut self, members: &[LocationId]) -> Result<ClusterSummary, SessionError> {
        let locations = members
            .iter()
            .map(|id| self.store.get(*id).ok_or(SessionError::UnknownLocation(*id)))
            .collect::<Result<Vec<_>, _>>()?;
        let summary = ClusterSummary::from_members(&locations).ok_or(SessionError::EmptyCluster)?;
        self.events.push(MapEvent::ClusterSelected(summary.clone()));
        Ok(summary)
    }

    pub fn zoom_to_cluster(&mut self, center: Coordinate) {
        self.events.push(MapEvent::ZoomTo {
            center,
            zoom_delta: CLUSTER_ZOOM_STEP,
        });
    }

    pub fn heatmap(&self) -> Vec<HeatPoint> {
        self.store.heatmap()
    }

    /// Hand all queued events to the renderer.
    pub fn drain_events(&mut self) -> Vec<MapEvent> {
        std::mem::take(&mut self.events)
    }
}
