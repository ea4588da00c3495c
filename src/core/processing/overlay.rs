//! Building overlay and area-weighted aggregation.
//!
//! Building footprints are intersected with pixel squares; each
//! (building, pixel) pair with a non-empty intersection contributes its
//! intersection area as the weight of that pixel's values.
use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Rect};
use rstar::{AABB, RTree, RTreeObject};
use serde_json::{Map, Value};

use crate::core::processing::vectorize::{PixelPolygons, RasterCube, vectorize_cube};
use crate::error::Result;

/// A building footprint with its static attributes.
#[derive(Debug, Clone)]
pub struct Building {
    pub building_id: String,
    pub geometry: MultiPolygon<f64>,
    /// Every non-geometry column of the building store, carried through to outputs
    pub attributes: Map<String, Value>,
}

impl Building {
    pub fn new(building_id: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            building_id: building_id.into(),
            geometry,
            attributes: Map::new(),
        }
    }
}

/// Bounding rectangle of a set of buildings.
pub fn total_bounds(buildings: &[Building]) -> Option<Rect<f64>> {
    buildings
        .iter()
        .filter_map(|b| b.geometry.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                geo::Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                geo::Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
}

/// Envelope of one pixel square in the R-tree.
#[derive(Debug, Clone)]
struct PixelEnvelope {
    idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for PixelEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// One non-empty (building, pixel) intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
    /// Index into the building slice
    pub building: usize,
    /// Index into the pixel polygons
    pub pixel: usize,
    /// Intersection area in CRS units
    pub area: f64,
}

/// Intersection overlay of buildings and pixel squares.
///
/// Output is grouped by building (in input order), then by pixel index.
pub fn overlay(buildings: &[Building], pixels: &PixelPolygons) -> Vec<Overlap> {
    let rtree = RTree::bulk_load(
        pixels
            .polygons
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| p.bounding_rect().map(|bbox| PixelEnvelope { idx, bbox }))
            .collect(),
    );

    let mut overlaps = Vec::new();
    for (b, building) in buildings.iter().enumerate() {
        let Some(bbox) = building.geometry.bounding_rect() else {
            continue;
        };
        let envelope = AABB::from_corners(bbox.min().into(), bbox.max().into());
        let mut candidates: Vec<usize> = rtree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.idx)
            .collect();
        candidates.sort_unstable();

        for pixel in candidates {
            let area = building
                .geometry
                .intersection(&pixels.polygons[pixel])
                .unsigned_area();
            if area > 0.0 {
                overlaps.push(Overlap {
                    building: b,
                    pixel,
                    area,
                });
            }
        }
    }
    overlaps
}

/// Damage score of one building for one post date.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingPrediction {
    pub building_id: String,
    pub post_date: NaiveDate,
    /// Σ(value · area) / Σ(area) over the overlapping pixels
    pub weighted_mean: f64,
    /// Largest overlapping pixel value
    pub max: f64,
}

#[derive(Default, Clone, Copy)]
struct Accumulator {
    weighted: f64,
    area: f64,
    max: f64,
    count: usize,
}

/// Weighted mean and max per building and date, in long form ordered by
/// (building_id, post_date).
///
/// NaN pixel values are left out of both sums for that date. A building with
/// no valid overlapping pixel for a date has no record for that date.
pub fn aggregate(
    buildings: &[Building],
    pixels: &PixelPolygons,
    overlaps: &[Overlap],
) -> Vec<BuildingPrediction> {
    let n_dates = pixels.dates.len();
    let mut per_building: BTreeMap<&str, Vec<Accumulator>> = BTreeMap::new();

    for overlap in overlaps {
        let id = buildings[overlap.building].building_id.as_str();
        let accs = per_building
            .entry(id)
            .or_insert_with(|| vec![Accumulator::default(); n_dates]);
        for (date, acc) in accs.iter_mut().enumerate() {
            let v = pixels.values[[overlap.pixel, date]];
            if v.is_nan() {
                continue;
            }
            acc.weighted += v * overlap.area;
            acc.area += overlap.area;
            acc.max = if acc.count == 0 { v } else { acc.max.max(v) };
            acc.count += 1;
        }
    }

    let mut records = Vec::new();
    for (id, accs) in per_building {
        for (date, acc) in accs.iter().enumerate() {
            if acc.count == 0 || acc.area <= 0.0 {
                continue;
            }
            records.push(BuildingPrediction {
                building_id: id.to_string(),
                post_date: pixels.dates[date],
                weighted_mean: acc.weighted / acc.area,
                max: acc.max,
            });
        }
    }
    records.sort_by(|a, b| {
        a.building_id
            .cmp(&b.building_id)
            .then(a.post_date.cmp(&b.post_date))
    });
    records
}

/// Vectorize `cube`, overlay it with `buildings` and aggregate.
pub fn predictions_per_building(
    buildings: &[Building],
    cube: RasterCube,
) -> Result<Vec<BuildingPrediction>> {
    let pixels = vectorize_cube(cube)?;
    let overlaps = overlay(buildings, &pixels);
    tracing::debug!(
        "{} pixels, {} building/pixel overlaps",
        pixels.len(),
        overlaps.len()
    );
    Ok(aggregate(buildings, &pixels, &overlaps))
}
