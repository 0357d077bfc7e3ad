//! Typed messages from the session to whatever renders the map.

use crate::location::{Coordinate, LocationId, ResolvedLocation};
use crate::query::Bounds;
use serde::Serialize;

/// Cluster popups list at most this many members by name.
pub const CLUSTER_PREVIEW_LIMIT: usize = 10;

/// Zoom levels added when zooming into a cluster.
pub const CLUSTER_ZOOM_STEP: i32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapEvent {
    /// A pin was picked; show its details.
    LocationSelected(LocationDetails),
    /// A cluster was picked; show its member summary.
    ClusterSelected(ClusterSummary),
    /// Move the viewport to fit this box.
    FitBounds(Bounds),
    /// Recenter and zoom in by `zoom_delta` levels.
    ZoomTo { center: Coordinate, zoom_delta: i32 },
    CloseInfoWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationDetails {
    pub id: LocationId,
    pub title: String,
    pub address: String,
    pub contact: Option<String>,
    pub category: Option<String>,
    pub coordinate: Coordinate,
}

impl From<&ResolvedLocation> for LocationDetails {
    fn from(loc: &ResolvedLocation) -> Self {
        Self {
            id: loc.id,
            title: loc.record.title().to_string(),
            address: loc.record.address.clone(),
            contact: loc.record.contact.clone(),
            category: loc.record.category.clone(),
            coordinate: loc.coordinate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub id: LocationId,
    pub title: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub count: usize,
    pub preview: Vec<ClusterMember>,
    /// Members beyond the preview ("...and N more").
    pub remaining: usize,
    /// Position of the first member, the zoom target for the cluster.
    pub anchor: Coordinate,
}

impl ClusterSummary {
    /// Summarize cluster members; None when there are none.
    pub fn from_members(members: &[&ResolvedLocation]) -> Option<Self> {
        let first = members.first()?;
        let preview = members
            .iter()
            .take(CLUSTER_PREVIEW_LIMIT)
            .map(|l| ClusterMember {
                id: l.id,
                title: l.record.title().to_string(),
                address: l.record.address.clone(),
            })
            .collect::<Vec<_>>();
        Some(Self {
            count: members.len(),
            remaining: members.len() - preview.len(),
            preview,
            anchor: first.coordinate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{AddressRecord, GeocodeHit, LocationSource};
    use std::sync::Arc;

    fn loc(i: u64) -> ResolvedLocation {
        let record = AddressRecord::new(format!("{i} Harbour Rd")).with_name(format!("Shop {i}"));
        let mut l = ResolvedLocation::new(
            Arc::new(record),
            GeocodeHit {
                coordinate: Coordinate::new(i as f64, 0.0),
                display_name: None,
                source: LocationSource::Table,
            },
        );
        l.id = LocationId(i);
        l
    }

    #[test]
    fn test_cluster_summary_truncates() {
        let locs: Vec<ResolvedLocation> = (0..13).map(loc).collect();
        let refs: Vec<&ResolvedLocation> = locs.iter().collect();
        let s = ClusterSummary::from_members(&refs).unwrap();
        assert_eq!(s.count, 13);
        assert_eq!(s.preview.len(), CLUSTER_PREVIEW_LIMIT);
        assert_eq!(s.remaining, 3);
        assert_eq!(s.preview[0].title, "Shop 0");
        assert_eq!(s.anchor, Coordinate::new(0.0, 0.0));
    }

    #[test]
    fn test_cluster_summary_small_and_empty() {
        let locs: Vec<ResolvedLocation> = (0..2).map(loc).collect();
        let refs: Vec<&ResolvedLocation> = locs.iter().collect();
        let s = ClusterSummary::from_members(&refs).unwrap();
        assert_eq!(s.remaining, 0);
        assert!(ClusterSummary::from_members(&[]).is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let e = MapEvent::ZoomTo {
            center: Coordinate::new(1.0, 2.0),
            zoom_delta: CLUSTER_ZOOM_STEP,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "zoom_to");
        assert_eq!(v["zoom_delta"], 2);

        let v = serde_json::to_value(MapEvent::CloseInfoWindow).unwrap();
        assert_eq!(v["type"], "close_info_window");
    }

    #[test]
    fn test_location_details() {
        let l = loc(4);
        let d = LocationDetails::from(&l);
        assert_eq!(d.title, "Shop 4");
        assert_eq!(d.address, "4 Harbour Rd");
        assert!(d.contact.is_none());
    }
}
