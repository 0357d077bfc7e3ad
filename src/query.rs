//! Spatial queries over resolved locations: great-circle distance, radius
//! filtering and bounding boxes.

use crate::location::{Coordinate, LocationId, ResolvedLocation};
use serde::Serialize;

/// Sphere radius used for distances, in meters (WGS-84 equatorial radius,
/// as in the common web-map spherical geometry libraries).
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Great-circle distance between two coordinates, in meters (haversine).
pub fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Show only the locations within `radius_m` of `center` (boundary inclusive).
///
/// Every location's `visible` flag is overwritten: true for matches, false for
/// the rest. Returns the ids of the matches in input order.
pub fn nearby(center: Coordinate, radius_m: f64, locations: &mut [ResolvedLocation]) -> Vec<LocationId> {
    let mut matches = Vec::new();
    for loc in locations.iter_mut() {
        loc.visible = distance_m(center, loc.coordinate) <= radius_m;
        if loc.visible {
            matches.push(loc.id);
        }
    }
    matches
}

/// Axis-aligned lat/lng box, for fitting a viewport around pins.
///
/// Does not handle boxes spanning the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub fn around(c: Coordinate) -> Self {
        Self {
            south: c.lat,
            west: c.lng,
            north: c.lat,
            east: c.lng,
        }
    }

    /// Smallest box containing all points, or None for an empty input.
    pub fn from_points<I: IntoIterator<Item = Coordinate>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let mut bounds = Self::around(iter.next()?);
        for c in iter {
            bounds.extend(c);
        }
        Some(bounds)
    }

    pub fn extend(&mut self, c: Coordinate) {
        self.south = self.south.min(c.lat);
        self.north = self.north.max(c.lat);
        self.west = self.west.min(c.lng);
        self.east = self.east.max(c.lng);
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        (self.south..=self.north).contains(&c.lat) && (self.west..=self.east).contains(&c.lng)
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{AddressRecord, GeocodeHit, LocationSource};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// Point `meters` due north of `c`.
    fn north_of(c: Coordinate, meters: f64) -> Coordinate {
        Coordinate::new(c.lat + (meters / EARTH_RADIUS_M).to_degrees(), c.lng)
    }

    fn loc(id: u64, c: Coordinate) -> ResolvedLocation {
        let mut l = ResolvedLocation::new(
            Arc::new(AddressRecord::new(format!("addr {id}"))),
            GeocodeHit {
                coordinate: c,
                display_name: None,
                source: LocationSource::Table,
            },
        );
        l.id = LocationId(id);
        l
    }

    #[test]
    fn test_distance_zero() {
        let c = Coordinate::new(59.3293, 18.0686);
        assert_eq!(distance_m(c, c), 0.0);
    }

    #[test]
    fn test_distance_north_offset() {
        let origin = Coordinate::new(0.0, 0.0);
        assert_relative_eq!(distance_m(origin, north_of(origin, 600.0)), 600.0, epsilon = 1e-6);
    }

    #[test]
    fn test_distance_known_pair() {
        // Stockholm → Oslo, roughly 417 km
        let sto = Coordinate::new(59.3293, 18.0686);
        let osl = Coordinate::new(59.9139, 10.7522);
        let d = distance_m(sto, osl);
        assert!((d - 417_000.0).abs() < 5_000.0, "got {d}");
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Coordinate::new(-33.8688, 151.2093);
        let b = Coordinate::new(35.6762, 139.6503);
        assert_relative_eq!(distance_m(a, b), distance_m(b, a), max_relative = 1e-12);
    }

    #[test]
    fn test_nearby_filters_and_replaces_visibility() {
        let center = Coordinate::new(0.0, 0.0);
        let mut locations = vec![loc(0, center), loc(1, north_of(center, 600.0))];
        locations[1].visible = true;

        let ids = nearby(center, 500.0, &mut locations);
        assert_eq!(ids, vec![LocationId(0)]);
        assert!(locations[0].visible);
        assert!(!locations[1].visible);

        // Full replace: a wider query brings the far pin back.
        let ids = nearby(center, 1_000.0, &mut locations);
        assert_eq!(ids.len(), 2);
        assert!(locations.iter().all(|l| l.visible));
    }

    #[test]
    fn test_nearby_boundary_inclusive() {
        let center = Coordinate::new(10.0, 20.0);
        let mut locations = vec![loc(0, center)];
        let ids = nearby(center, 0.0, &mut locations);
        assert_eq!(ids, vec![LocationId(0)]);
    }

    #[test]
    fn test_nearby_empty() {
        let mut locations: Vec<ResolvedLocation> = Vec::new();
        assert!(nearby(Coordinate::new(0.0, 0.0), 500.0, &mut locations).is_empty());
    }

    #[test]
    fn test_bounds() {
        assert!(Bounds::from_points(Vec::new()).is_none());
        let b = Bounds::from_points([
            Coordinate::new(1.0, 5.0),
            Coordinate::new(-2.0, 3.0),
            Coordinate::new(0.5, 7.0),
        ])
        .unwrap();
        assert_eq!(b.south, -2.0);
        assert_eq!(b.north, 1.0);
        assert_eq!(b.west, 3.0);
        assert_eq!(b.east, 7.0);
        assert!(b.contains(Coordinate::new(0.0, 4.0)));
        assert!(!b.contains(Coordinate::new(2.0, 4.0)));
        assert_eq!(b.center(), Coordinate::new(-0.5, 5.0));
    }
}
