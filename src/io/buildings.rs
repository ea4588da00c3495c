//! Building store: a Parquet table with a `building_id`, a `geometry_wkb`
//! footprint column and any number of attribute columns.
use std::path::Path;

use geo::{Centroid, Point};
use polars::prelude::*;
use serde_json::Map;
use tracing::info;

use crate::core::processing::overlay::Building;
use crate::error::{Error, Result};
use crate::io::table::{any_value_to_json, read_parquet, string_column};
use crate::io::wkb::multipolygon_from_wkb;

pub const ID_COLUMN: &str = "building_id";
pub const GEOMETRY_COLUMN: &str = "geometry_wkb";

/// Decode the buildings of a store table. Every column except the geometry
/// is carried as an attribute.
pub fn buildings_from_frame(df: &DataFrame) -> Result<Vec<Building>> {
    let ids = string_column(df, ID_COLUMN)?;
    let geometries = df.column(GEOMETRY_COLUMN)?.as_materialized_series().binary()?;
    let attribute_columns: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != GEOMETRY_COLUMN && c.name().as_str() != ID_COLUMN)
        .collect();

    let mut buildings = Vec::with_capacity(df.height());
    for (row, (id, wkb)) in ids.into_iter().zip(geometries.into_iter()).enumerate() {
        let (Some(id), Some(wkb)) = (id, wkb) else {
            return Err(Error::Processing(format!(
                "building row {} lacks an id or a geometry",
                row
            )));
        };
        let mut attributes = Map::new();
        for col in &attribute_columns {
            attributes.insert(col.name().to_string(), any_value_to_json(col.get(row)?));
        }
        buildings.push(Building {
            building_id: id,
            geometry: multipolygon_from_wkb(wkb)?,
            attributes,
        });
    }
    Ok(buildings)
}

/// Load the building store at `path` as a columnar table. Footprints stay
/// WKB-encoded until a unit's rows are decoded with [`buildings_at`].
pub fn read_building_store(path: &Path) -> Result<DataFrame> {
    let df = read_parquet(path)?;
    info!("Loaded {} buildings from {:?}", df.height(), path);
    Ok(df)
}

/// Centroid of every footprint in the store, in row order. Each footprint is
/// decoded and dropped in turn.
pub fn footprint_centroids(df: &DataFrame) -> Result<Vec<Option<Point<f64>>>> {
    let geometries = df.column(GEOMETRY_COLUMN)?.as_materialized_series().binary()?;
    geometries
        .into_iter()
        .map(|wkb| -> Result<Option<Point<f64>>> {
            match wkb {
                Some(wkb) => Ok(multipolygon_from_wkb(wkb)?.centroid()),
                None => Ok(None),
            }
        })
        .collect()
}

/// Decode the store rows at `rows` into buildings with their attributes.
pub fn buildings_at(df: &DataFrame, rows: &[usize]) -> Result<Vec<Building>> {
    let idx = IdxCa::from_vec(
        "idx".into(),
        rows.iter().map(|&r| r as IdxSize).collect(),
    );
    buildings_from_frame(&df.take(&idx)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::wkb::tests::polygon_wkb;
    use geo::{Area, Coord, Rect};
    use serde_json::json;

    fn store() -> DataFrame {
        let a = polygon_wkb(&Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 2.0, y: 1.0 }).to_polygon());
        let b = polygon_wkb(&Rect::new(Coord { x: 5.0, y: 5.0 }, Coord { x: 6.0, y: 6.0 }).to_polygon());
        DataFrame::new(vec![
            Column::new(ID_COLUMN.into(), ["b1", "b2"]),
            Column::new(GEOMETRY_COLUMN.into(), [a.as_slice(), b.as_slice()]),
            Column::new("osm_class".into(), [Some("residential"), None]),
            Column::new("area".into(), [2.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn decodes_geometry_and_attributes() {
        let buildings = buildings_from_frame(&store()).unwrap();
        assert_eq!(buildings.len(), 2);
        assert_eq!(buildings[0].building_id, "b1");
        assert!((buildings[0].geometry.unsigned_area() - 2.0).abs() < 1e-12);
        assert_eq!(buildings[0].attributes["osm_class"], json!("residential"));
        assert_eq!(buildings[1].attributes["osm_class"], json!(null));
        assert_eq!(buildings[1].attributes["area"], json!(1.0));
        assert!(!buildings[0].attributes.contains_key(GEOMETRY_COLUMN));
    }

    #[test]
    fn rows_are_decoded_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.parquet");
        crate::io::table::write_parquet(store(), &path).unwrap();
        let df = read_building_store(&path).unwrap();

        let centroids: Vec<Point<f64>> = footprint_centroids(&df).unwrap().into_iter().flatten().collect();
        assert_eq!(centroids.len(), 2);
        for (c, (x, y)) in centroids.iter().zip([(1.0, 0.5), (5.5, 5.5)]) {
            assert!((c.x() - x).abs() < 1e-9 && (c.y() - y).abs() < 1e-9);
        }

        let second = buildings_at(&df, &[1]).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].building_id, "b2");
        assert_eq!(second[0].attributes["area"], json!(1.0));
    }

    #[test]
    fn missing_geometry_column_is_an_error() {
        let df = df!["building_id" => ["b1"]].unwrap();
        assert!(buildings_from_frame(&df).is_err());
    }
}
