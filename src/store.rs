//! Marker store: the resolved locations of the current run and their display state.
//!
//! Append-only while a run is in progress. Writes come only from the batch
//! scheduler's own context, so the store carries no lock.

use crate::location::{Coordinate, LocationId, ResolvedLocation};
use crate::query::Bounds;
use serde::Serialize;
use std::collections::HashMap;

/// Opaque handle a rendering layer attaches to a pin (marker object id, DOM id, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DisplayHandle(pub u64);

/// One heatmap sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatPoint {
    pub coordinate: Coordinate,
    pub weight: f64,
}

#[derive(Debug, Default)]
pub struct MarkerStore {
    locations: Vec<ResolvedLocation>,
    handles: HashMap<LocationId, DisplayHandle>,
    next_id: u64,
}

impl MarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a location, assigning it the next id.
    pub fn add(&mut self, mut location: ResolvedLocation) -> LocationId {
        let id = LocationId(self.next_id);
        self.next_id += 1;
        location.id = id;
        self.locations.push(location);
        id
    }

    pub fn all(&self) -> &[ResolvedLocation] {
        &self.locations
    }

    pub fn all_mut(&mut self) -> &mut [ResolvedLocation] {
        &mut self.locations
    }

    /// Drop every location and handle. Ids restart from zero.
    pub fn clear(&mut self) {
        self.locations.clear();
        self.handles.clear();
        self.next_id = 0;
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn get(&self, id: LocationId) -> Option<&ResolvedLocation> {
        // ids are dense from zero since the last clear
        self.locations.get(id.0 as usize).filter(|l| l.id == id)
    }

    /// First stored location whose record has exactly this address.
    pub fn find_by_address(&self, address: &str) -> Option<&ResolvedLocation> {
        self.locations.iter().find(|l| l.address() == address)
    }

    pub fn visible(&self) -> impl Iterator<Item = &ResolvedLocation> {
        self.locations.iter().filter(|l| l.visible)
    }

    pub fn show_all(&mut self) {
        for loc in &mut self.locations {
            loc.visible = true;
        }
    }

    /// Bounding box of every stored pin.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(self.locations.iter().map(|l| l.coordinate))
    }

    /// Associate a rendering handle with a stored location. Returns false for unknown ids.
    pub fn attach_handle(&mut self, id: LocationId, handle: DisplayHandle) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.handles.insert(id, handle);
        true
    }

    pub fn handle(&self, id: LocationId) -> Option<DisplayHandle> {
        self.handles.get(&id).copied()
    }

    /// One unit-weight sample per stored location.
    pub fn heatmap(&self) -> Vec<HeatPoint> {
        self.locations
            .iter()
            .map(|l| HeatPoint {
                coordinate: l.coordinate,
                weight: 1.0,
            })
            .collect()
    }
}
