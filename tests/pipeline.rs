use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::NaiveDate;
use gdal::DriverManager;
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use geo::{Coord, MultiPolygon, Rect};
use ndarray::s;
use polars::prelude::*;
use serde_json::json;

use dmgmap::api::{
    UnitOutcome, aggregate_all_predictions, download_and_merge, evaluate_predictions,
    predict_admin_unit, wait_for_predictions,
};
use dmgmap::io::bridge::{LocalFolderBridge, PollPolicy};
use dmgmap::io::gdal::{GdalError, read_stack_within};
use dmgmap::io::geojson::{read_predictions, write_predictions};
use dmgmap::io::mosaic::MergeOutcome;
use dmgmap::io::table::read_parquet;
use dmgmap::{
    AggregationMethod, Building, BuildingPrediction, Error, MetricsParams, PipelineParams,
    PostWindow,
};

// 4x4 raster of 0.01° pixels with its upper-left corner at (30.0, 50.0)
const GT: [f64; 6] = [30.0, 0.01, 0.0, 50.0, 0.0, -0.01];

fn window(s: &str) -> PostWindow {
    s.parse().unwrap()
}

fn write_raster(path: &Path, gt: [f64; 6], size: (usize, usize), values: &[u8]) {
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut ds = driver
        .create_with_band_type::<u8, _>(path, size.0, size.1, 1)
        .unwrap();
    ds.set_geo_transform(&gt).unwrap();
    ds.set_spatial_ref(&SpatialRef::from_epsg(4326).unwrap()).unwrap();
    let mut buf = Buffer::new(size, values.to_vec());
    let mut band = ds.rasterband(1).unwrap();
    band.write((0, 0), size, &mut buf).unwrap();
}

fn write_mosaic(path: &Path, values: &[u8; 16]) {
    write_raster(path, GT, (4, 4), values);
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 }).to_polygon(),
    ])
}

fn params(data_dir: &Path) -> PipelineParams {
    PipelineParams {
        data_dir: data_dir.to_path_buf(),
        run_name: "run1".into(),
        bridge_root: data_dir.join("drive"),
        buildings_path: Some(data_dir.join("buildings.parquet")),
        ..PipelineParams::default()
    }
}

#[test]
fn existing_mosaic_is_not_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("ukraine_2023-02-24_2023-05-24.tif");
    fs::write(&out, b"merged earlier").unwrap();
    // empty bridge: any listing attempt would fail
    let bridge = LocalFolderBridge::new(dir.path().join("nowhere"));

    let outcome = download_and_merge(
        &bridge,
        "run1_quadkeys_predictions/2023-02-24_2023-05-24",
        dir.path(),
        "ukraine_2023-02-24_2023-05-24.tif",
        false,
    )
    .unwrap();
    assert_eq!(outcome, MergeOutcome::Skipped);
    assert_eq!(fs::read(&out).unwrap(), b"merged earlier");
}

#[test]
fn waiting_for_a_missing_export_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = params(dir.path());
    p.poll = PollPolicy {
        initial_secs: 0.005,
        factor: 2.0,
        max_interval_secs: 0.02,
        deadline_secs: 0.1,
    };
    let bridge = LocalFolderBridge::new(&p.bridge_root);
    let start = Instant::now();
    let err = wait_for_predictions(&bridge, &p).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(start.elapsed().as_secs_f64() < 5.0);

    fs::create_dir_all(p.bridge_root.join("run1_quadkeys_predictions/2023-02-24_2023-05-24"))
        .unwrap();
    wait_for_predictions(&bridge, &p).unwrap();
}

#[test]
fn existing_unit_output_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("admin_preds").join("3_7.geojson");
    fs::create_dir_all(out.parent().unwrap()).unwrap();
    fs::write(&out, "{}").unwrap();
    let before = fs::metadata(&out).unwrap().modified().unwrap();

    let buildings = vec![Building::new("b1", rect(30.0, 49.97, 30.01, 49.98))];
    // mosaics do not exist; the skip happens before any read
    let mosaics = vec![(
        window("2023-02-24_2023-05-24"),
        dir.path().join("ukraine_2023-02-24_2023-05-24.tif"),
    )];
    let outcome = predict_admin_unit("3_7", &buildings, &mosaics, &out).unwrap();
    assert_eq!(outcome, UnitOutcome::Skipped);
    assert_eq!(fs::read_to_string(&out).unwrap(), "{}");
    assert_eq!(fs::metadata(&out).unwrap().modified().unwrap(), before);
}

#[test]
fn unit_predictions_from_geotiff_mosaics() {
    let dir = tempfile::tempdir().unwrap();
    let p = params(dir.path());
    fs::create_dir_all(p.run_dir()).unwrap();

    let w1 = window("2022-02-24_2022-05-24");
    let w2 = window("2023-02-24_2023-05-24");
    let mut ramp = [0u8; 16];
    for (i, v) in ramp.iter_mut().enumerate() {
        *v = (i * 10) as u8;
    }
    write_mosaic(&p.mosaic_path(&w1), &ramp);
    write_mosaic(&p.mosaic_path(&w2), &[255; 16]);

    // b1 sits in pixel (row 1, col 1) = 50; b2 straddles cols 2 and 3 of row 3
    let buildings = vec![
        Building::new("b1", rect(30.012, 49.982, 30.018, 49.988)),
        Building::new("b2", rect(30.025, 49.961, 30.035, 49.969)),
    ];
    let mosaics = vec![(w1, p.mosaic_path(&w1)), (w2, p.mosaic_path(&w2))];
    let out = p.admin_preds_path("3_0");

    let outcome = predict_admin_unit("3_0", &buildings, &mosaics, &out).unwrap();
    assert_eq!(outcome, UnitOutcome::Written { records: 4 });

    let preds = read_predictions(&out).unwrap();
    let get = |id: &str, d: NaiveDate| {
        preds
            .iter()
            .find(|r| r.building_id == id && r.post_date == d)
            .unwrap()
            .clone()
    };
    let b1 = get("b1", w1.start);
    assert!((b1.weighted_mean - 50.0).abs() < 1e-6);
    let b2 = get("b2", w1.start);
    assert!((b2.weighted_mean - 145.0).abs() < 1e-6);
    assert_eq!(b2.max, 150.0);
    assert!((get("b2", w2.start).weighted_mean - 255.0).abs() < 1e-9);
}

#[test]
fn mosaics_with_shifted_origins_are_aligned_by_location() {
    let dir = tempfile::tempdir().unwrap();
    let full = dir.path().join("full.tif");
    let east = dir.path().join("east.tif");
    let mut ramp = [0u8; 16];
    for (i, v) in ramp.iter_mut().enumerate() {
        *v = (i * 10) as u8;
    }
    write_mosaic(&full, &ramp);
    // western two columns missing: 2x4 starting two pixels east
    let east_gt = [30.02, 0.01, 0.0, 50.0, 0.0, -0.01];
    write_raster(&east, east_gt, (2, 4), &[100, 101, 110, 111, 120, 121, 130, 131]);

    // columns 1..4 of row 1
    let bounds = Rect::new(Coord { x: 30.012, y: 49.982 }, Coord { x: 30.038, y: 49.988 });
    let (stack, gt, crs) = read_stack_within(&[&full, &east], &bounds).unwrap();
    assert_eq!(stack.dim(), (2, 1, 1, 3));
    assert!((gt[0] - 30.01).abs() < 1e-9 && (gt[3] - 49.99).abs() < 1e-9);
    assert_eq!(crs, "EPSG:4326");

    let first: Vec<f64> = stack.slice(s![0, 0, 0, ..]).to_vec();
    assert_eq!(first, vec![50.0, 60.0, 70.0]);
    let second: ndarray::ArrayView1<f64> = stack.slice(s![1, 0, 0, ..]);
    assert!(second[0].is_nan());
    assert_eq!((second[1], second[2]), (110.0, 111.0));

    // the first mosaic does not need to cover the bounds
    let east_only = Rect::new(Coord { x: 30.031, y: 49.961 }, Coord { x: 30.039, y: 49.969 });
    let (stack, _, _) = read_stack_within(&[&east, &full], &east_only).unwrap();
    assert_eq!(stack.dim(), (2, 1, 1, 1));
    assert_eq!((stack[[0, 0, 0, 0]], stack[[1, 0, 0, 0]]), (131.0, 150.0));
}

#[test]
fn mosaics_on_another_grid_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fine = dir.path().join("fine.tif");
    let coarse = dir.path().join("coarse.tif");
    write_mosaic(&fine, &[1; 16]);
    write_raster(&coarse, [30.0, 0.02, 0.0, 50.0, 0.0, -0.02], (2, 2), &[1; 4]);

    let bounds = Rect::new(Coord { x: 30.001, y: 49.971 }, Coord { x: 30.009, y: 49.979 });
    let err = read_stack_within(&[&fine, &coarse], &bounds).unwrap_err();
    assert!(matches!(err, GdalError::GridMismatch(_)));
}

#[test]
fn unit_outside_every_mosaic_is_written_empty() {
    let dir = tempfile::tempdir().unwrap();
    let p = params(dir.path());
    fs::create_dir_all(p.run_dir()).unwrap();
    let w = window("2023-02-24_2023-05-24");
    write_mosaic(&p.mosaic_path(&w), &[255; 16]);

    let buildings = vec![Building::new("far", rect(40.0, 40.0, 40.01, 40.01))];
    let mosaics = vec![(w, p.mosaic_path(&w))];
    let out = p.admin_preds_path("3_4");

    let outcome = predict_admin_unit("3_4", &buildings, &mosaics, &out).unwrap();
    assert_eq!(outcome, UnitOutcome::Written { records: 0 });
    assert!(read_predictions(&out).unwrap().is_empty());
    assert_eq!(
        predict_admin_unit("3_4", &buildings, &mosaics, &out).unwrap(),
        UnitOutcome::Skipped
    );
}

fn write_building_store(path: &Path, ids: &[&str]) {
    let wkb: Vec<Vec<u8>> = ids
        .iter()
        .enumerate()
        .map(|(i, _)| polygon_wkb(i as f64))
        .collect();
    let mut df = DataFrame::new(vec![
        Column::new("building_id".into(), ids),
        Column::new(
            "geometry_wkb".into(),
            wkb.iter().map(Vec::as_slice).collect::<Vec<_>>(),
        ),
        Column::new("dataset".into(), vec!["overture"; ids.len()]),
    ])
    .unwrap();
    let file = fs::File::create(path).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
}

// Little-endian WKB unit square at (x, 0)
fn polygon_wkb(x: f64) -> Vec<u8> {
    let ring: [(f64, f64); 5] = [(x, 0.0), (x + 1.0, 0.0), (x + 1.0, 1.0), (x, 1.0), (x, 0.0)];
    let mut out = vec![1u8];
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(ring.len() as u32).to_le_bytes());
    for (x, y) in ring {
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
    }
    out
}

fn record(id: &str, date: NaiveDate, v: f64) -> BuildingPrediction {
    BuildingPrediction {
        building_id: id.into(),
        post_date: date,
        weighted_mean: v,
        max: v,
    }
}

#[test]
fn aggregation_joins_units_onto_every_building() {
    let dir = tempfile::tempdir().unwrap();
    let p = params(dir.path());
    write_building_store(&p.buildings_path(), &["a", "b", "c"]);

    let d1 = NaiveDate::from_ymd_opt(2022, 2, 24).unwrap();
    let d2 = NaiveDate::from_ymd_opt(2023, 2, 24).unwrap();
    let a = Building::new("a", rect(0.0, 0.0, 1.0, 1.0));
    let b = Building::new("b", rect(1.0, 0.0, 2.0, 1.0));
    write_predictions(
        &p.admin_preds_path("3_0"),
        &[a],
        &[record("a", d1, 10.0), record("a", d2, 200.0)],
    )
    .unwrap();
    write_predictions(&p.admin_preds_path("3_1"), &[b], &[record("b", d2, 99.0)]).unwrap();
    fs::write(p.admin_preds_path("3_2"), "not json").unwrap();
    // left over from a run at another admin level
    let stale = Building::new("c", rect(2.0, 0.0, 3.0, 1.0));
    write_predictions(&p.admin_preds_path("4_0"), &[stale], &[record("c", d1, 77.0)]).unwrap();

    let summary = aggregate_all_predictions(&p).unwrap();
    assert_eq!(summary.units_read, 2);
    assert_eq!(summary.units_failed, 1);
    assert_eq!(summary.buildings, 3);
    assert_eq!(summary.buildings_with_predictions, 2);
    assert_eq!(summary.post_dates, vec!["2022-02-24", "2023-02-24"]);

    let df = read_parquet(&p.aggregate_path())
        .unwrap()
        .sort(["building_id"], SortMultipleOptions::default())
        .unwrap();
    assert!(df.column("dataset").is_ok());
    assert!(df.column("geometry_wkb").is_ok());
    let later: Vec<Option<f64>> = df.column("2023-02-24").unwrap().f64().unwrap().into_iter().collect();
    assert_eq!(later, vec![Some(200.0), Some(99.0), None]);
    let earlier: Vec<Option<f64>> = df.column("2022-02-24").unwrap().f64().unwrap().into_iter().collect();
    assert_eq!(earlier, vec![Some(10.0), None, None]);
}

#[test]
fn metrics_from_csv_table() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("points.csv");
    fs::write(
        &path,
        "id,aoi,date,pred_2021-06-01,pred_2022-06-01\n\
         p1,UKR1,2022-03-01,10,200\n\
         p2,UKR1,2022-03-01,30,230\n",
    )
    .unwrap();

    let params = MetricsParams {
        method: AggregationMethod::DateWise,
        ..MetricsParams::default()
    };
    let report = evaluate_predictions(&path, &params).unwrap();
    assert_eq!(report.confusion.errors(), 0);
    assert_eq!(report.confusion.total(), 4);
    assert_eq!(report.roc_auc, Some(1.0));
    let text = report.classification_report(2);
    assert!(text.contains("1.00"));
    assert_eq!(json!(report.f1), json!(1.0));
}
