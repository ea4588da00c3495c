//! Admin-unit sharding of buildings by centroid containment.
use std::collections::BTreeMap;

use geo::{BoundingRect, Centroid, Contains, Intersects, MultiPolygon, Point, Rect};
use rstar::{AABB, RTree, RTreeObject};

use crate::core::processing::overlay::Building;

/// One polygon of the administrative partition.
#[derive(Debug, Clone)]
pub struct AdminUnit {
    /// `<level>_<index>`, e.g. `3_117`
    pub admin_id: String,
    /// `ADM1_EN ... ADM<level>_EN`, outermost first
    pub names: Vec<String>,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
struct UnitEnvelope {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for UnitEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Building indices per admin unit.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// admin_id -> indices into the building slice, ascending
    pub units: BTreeMap<String, Vec<usize>>,
    /// Buildings whose centroid lies in no unit
    pub unassigned: Vec<usize>,
}

impl Partition {
    pub fn buildings_of<'a>(&self, admin_id: &str, buildings: &'a [Building]) -> Vec<&'a Building> {
        self.units
            .get(admin_id)
            .map(|idx| idx.iter().map(|&i| &buildings[i]).collect())
            .unwrap_or_default()
    }

    pub fn assigned_count(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }
}

/// Assign every building to the admin unit containing its centroid.
///
/// When a centroid lies on a shared border the unit listed first wins, so a
/// building is never assigned twice. Units without buildings are absent
/// from the result.
pub fn partition_by_centroid(buildings: &[Building], units: &[AdminUnit]) -> Partition {
    let centroids: Vec<Option<Point<f64>>> =
        buildings.iter().map(|b| b.geometry.centroid()).collect();
    partition_centroids(&centroids, units)
}

/// Same as [`partition_by_centroid`] on precomputed centroids; `None` marks a
/// building without one, which stays unassigned.
pub fn partition_centroids(centroids: &[Option<Point<f64>>], units: &[AdminUnit]) -> Partition {
    let rtree = RTree::bulk_load(
        units
            .iter()
            .enumerate()
            .filter_map(|(idx, u)| u.geometry.bounding_rect().map(|bbox| UnitEnvelope { idx, bbox }))
            .collect(),
    );

    let mut partition = Partition::default();
    for (b, centroid) in centroids.iter().enumerate() {
        match centroid.and_then(|c| containing_unit(&rtree, units, c)) {
            Some(u) => partition
                .units
                .entry(units[u].admin_id.clone())
                .or_default()
                .push(b),
            None => partition.unassigned.push(b),
        }
    }
    partition
}

fn containing_unit(rtree: &RTree<UnitEnvelope>, units: &[AdminUnit], p: Point<f64>) -> Option<usize> {
    let at = AABB::from_point([p.x(), p.y()]);
    let mut candidates: Vec<usize> = rtree
        .locate_in_envelope_intersecting(&at)
        .map(|e| e.idx)
        .collect();
    candidates.sort_unstable();

    // Interior containment first, then boundary hits
    candidates
        .iter()
        .copied()
        .find(|&u| units[u].geometry.contains(&p))
        .or_else(|| {
            candidates
                .into_iter()
                .find(|&u| units[u].geometry.intersects(&p))
        })
}
