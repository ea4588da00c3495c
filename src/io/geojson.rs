//! Per-admin-unit prediction files: GeoJSON FeatureCollections with one
//! feature per (building, post date).
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::NaiveDate;
use geo::{LineString, MultiPolygon};
use serde_json::{Map, Value, json};

use crate::core::processing::overlay::{Building, BuildingPrediction};
use crate::error::{Error, Result};
use crate::types::DATE_FORMAT;

fn ring_to_json(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

/// GeoJSON geometry object for a multipolygon.
pub fn multipolygon_to_geojson(mp: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = mp
        .iter()
        .map(|p| {
            let mut rings = vec![ring_to_json(p.exterior())];
            rings.extend(p.interiors().iter().map(ring_to_json));
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

/// Serialize predictions with the footprint and attributes of their building.
pub fn predictions_to_geojson(buildings: &[Building], predictions: &[BuildingPrediction]) -> Value {
    let by_id: HashMap<&str, &Building> = buildings
        .iter()
        .map(|b| (b.building_id.as_str(), b))
        .collect();

    let features: Vec<Value> = predictions
        .iter()
        .map(|p| {
            let building = by_id.get(p.building_id.as_str());
            let mut properties = building
                .map(|b| b.attributes.clone())
                .unwrap_or_default();
            properties.insert("building_id".into(), json!(p.building_id));
            properties.insert("post_date".into(), json!(p.post_date.format(DATE_FORMAT).to_string()));
            properties.insert("weighted_mean".into(), json!(p.weighted_mean));
            properties.insert("max".into(), json!(p.max));
            json!({
                "type": "Feature",
                "geometry": building.map(|b| multipolygon_to_geojson(&b.geometry)).unwrap_or(Value::Null),
                "properties": properties,
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

/// Write the prediction file of one admin unit.
///
/// The file is written under a temporary name and renamed into place, so an
/// interrupted write never leaves a file that later runs would skip.
pub fn write_predictions(
    path: &Path,
    buildings: &[Building],
    predictions: &[BuildingPrediction],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("geojson.partial");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, &predictions_to_geojson(buildings, predictions))?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn property<'a>(props: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    props
        .get(key)
        .ok_or_else(|| Error::Processing(format!("feature without `{}` property", key)))
}

fn number(v: &Value, key: &str) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| Error::Processing(format!("`{}` is not a number", key)))
}

/// Read the prediction records of one admin unit file. Geometries and
/// building attributes are ignored.
pub fn read_predictions(path: &Path) -> Result<Vec<BuildingPrediction>> {
    let file = File::open(path).map_err(|_| Error::missing(path))?;
    let doc: Value = serde_json::from_reader(BufReader::new(file))?;
    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Processing(format!("{:?} is not a FeatureCollection", path)))?;

    features
        .iter()
        .map(|f| {
            let props = f
                .get("properties")
                .and_then(Value::as_object)
                .ok_or_else(|| Error::Processing("feature without properties".into()))?;
            let building_id = match property(props, "building_id")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let date = property(props, "post_date")?.as_str().unwrap_or_default();
            let post_date = NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| {
                Error::InvalidArgument {
                    arg: "post_date",
                    value: date.to_string(),
                }
            })?;
            Ok(BuildingPrediction {
                building_id,
                post_date,
                weighted_mean: number(property(props, "weighted_mean")?, "weighted_mean")?,
                max: number(property(props, "max")?, "max")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, Rect};

    fn fixture() -> (Vec<Building>, Vec<BuildingPrediction>) {
        let mut b = Building::new(
            "b1",
            MultiPolygon(vec![
                Rect::new(Coord { x: 30.0, y: 50.0 }, Coord { x: 30.1, y: 50.1 }).to_polygon(),
            ]),
        );
        b.attributes.insert("osm_class".into(), json!("school"));
        let d = NaiveDate::from_ymd_opt(2023, 2, 24).unwrap();
        let preds = vec![BuildingPrediction {
            building_id: "b1".into(),
            post_date: d,
            weighted_mean: 87.5,
            max: 120.0,
        }];
        (vec![b], preds)
    }

    #[test]
    fn features_carry_attributes_and_scores() {
        let (buildings, preds) = fixture();
        let doc = predictions_to_geojson(&buildings, &preds);
        let f = &doc["features"][0];
        assert_eq!(f["geometry"]["type"], "MultiPolygon");
        assert_eq!(f["geometry"]["coordinates"][0][0].as_array().unwrap().len(), 5);
        assert_eq!(f["properties"]["osm_class"], "school");
        assert_eq!(f["properties"]["post_date"], "2023-02-24");
        assert_eq!(f["properties"]["max"], 120.0);
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin_preds").join("3_1.geojson");
        let (buildings, preds) = fixture();
        write_predictions(&path, &buildings, &preds).unwrap();
        assert!(!path.with_extension("geojson.partial").exists());
        assert_eq!(read_predictions(&path).unwrap(), preds);
    }

    #[test]
    fn malformed_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.geojson");
        std::fs::write(&path, r#"{"type": "Feature"}"#).unwrap();
        assert!(read_predictions(&path).is_err());
        assert!(matches!(
            read_predictions(&dir.path().join("absent.geojson")),
            Err(Error::MissingAsset { .. })
        ));
    }
}
