//! Administrative boundaries from the `UKR_admin_boundaries` shapefiles.
use std::path::{Path, PathBuf};

use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Reader, Shape};
use tracing::{info, warn};

use crate::core::processing::partition::AdminUnit;
use crate::error::{Error, Result};

/// First `*_adm<level>*.shp` in `dir`, by name.
pub fn find_admin_shapefile(dir: &Path, level: u8) -> Result<PathBuf> {
    if !(1..=4).contains(&level) {
        return Err(Error::InvalidArgument {
            arg: "admin_level",
            value: level.to_string(),
        });
    }
    let marker = format!("_adm{}", level);
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|_| Error::missing(dir))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".shp") && name.contains(&marker) {
            candidates.push(path);
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::missing(dir.join(format!("*{}*.shp", marker))))
}

fn ring_coords(points: &[shapefile::Point]) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = points.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    if coords.first() != coords.last() {
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
    }
    LineString(coords)
}

/// Group shapefile rings into polygons: each outer ring takes the inner
/// rings that follow it.
pub fn shp_polygon_to_geo(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();
    for ring in polygon.rings() {
        match ring {
            PolygonRing::Outer(points) => {
                if let Some(ext) = exterior.take() {
                    polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
                }
                exterior = Some(ring_coords(points));
            }
            PolygonRing::Inner(points) => holes.push(ring_coords(points)),
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }
    MultiPolygon(polygons)
}

fn character_field(record: &Record, field: &str) -> String {
    match record.get(field) {
        Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
        _ => String::new(),
    }
}

/// Load the admin units of `level` from the shapefile in `dir`.
///
/// Ids are `<level>_<row index>`; names are `ADM1_EN` through
/// `ADM<level>_EN`. Non-polygon shapes are skipped.
pub fn read_admin_units(dir: &Path, level: u8) -> Result<Vec<AdminUnit>> {
    let path = find_admin_shapefile(dir, level)?;
    let mut reader = Reader::from_path(&path)?;
    let name_fields: Vec<String> = (1..=level).map(|i| format!("ADM{}_EN", i)).collect();

    let mut units = Vec::new();
    for (index, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item?;
        let geometry = match shape {
            Shape::Polygon(p) => shp_polygon_to_geo(&p),
            other => {
                warn!("Skipping admin row {} with {:?} shape", index, other.shapetype());
                continue;
            }
        };
        units.push(AdminUnit {
            admin_id: format!("{}_{}", level, index),
            names: name_fields.iter().map(|f| character_field(&record, f)).collect(),
            geometry,
        });
    }
    info!("Loaded {} admin units of level {} from {:?}", units.len(), level, path);
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use shapefile::Point;

    fn ring(x: f64, y: f64, s: f64) -> Vec<Point> {
        vec![
            Point::new(x, y),
            Point::new(x, y + s),
            Point::new(x + s, y + s),
            Point::new(x + s, y),
            Point::new(x, y),
        ]
    }

    #[test]
    fn outer_rings_take_following_holes() {
        let shp = shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(ring(0.0, 0.0, 10.0)),
            PolygonRing::Inner(ring(2.0, 2.0, 2.0)),
            PolygonRing::Outer(ring(20.0, 0.0, 1.0)),
        ]);
        let mp = shp_polygon_to_geo(&shp);
        assert_eq!(mp.0.len(), 2);
        assert_eq!(mp.0[0].interiors().len(), 1);
        assert!(mp.0[1].interiors().is_empty());
        assert!((mp.unsigned_area() - (100.0 - 4.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn finds_first_shapefile_of_level() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "ukr_admbnd_adm3_b.shp",
            "ukr_admbnd_adm3_a.shp",
            "ukr_admbnd_adm3_a.dbf",
            "ukr_admbnd_adm2.shp",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = find_admin_shapefile(dir.path(), 3).unwrap();
        assert_eq!(found.file_name().unwrap(), "ukr_admbnd_adm3_a.shp");
        assert!(matches!(
            find_admin_shapefile(dir.path(), 4),
            Err(Error::MissingAsset { .. })
        ));
        assert!(matches!(
            find_admin_shapefile(dir.path(), 5),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
