#![doc = r#"
dmgmap — building damage postprocessing for satellite change-detection runs.

A remote classifier produces per-pixel damage probabilities (0-255) over
Ukraine, exported as raster tiles grouped by post-invasion date window. This
crate turns those tiles into per-building, per-date damage scores:

1. fetch the tiles of each date window through a [`io::bridge::StorageBridge`]
   and merge them into one GeoTIFF mosaic per window;
2. shard the building footprints by administrative unit;
3. for each unit, clip every mosaic to the unit's buildings, vectorize the
   pixels, intersect them with the footprints and compute the area-weighted
   mean and the max of each building for each date;
4. join the per-unit results onto the building store as one column per date.

It also evaluates labelled point predictions (precision, recall, F1,
accuracy, ROC-AUC) against ground-truth damage dates.

Requirements
------------
- GDAL development headers and runtime, plus the `gdalwarp` binary on `PATH`
  for mosaic merging.
- Rust 2024 edition toolchain.

Quick start: full run
---------------------
```rust,no_run
use std::path::PathBuf;
use dmgmap::{api::run_postprocessing, io::bridge::LocalFolderBridge, PipelineParams};

fn main() -> dmgmap::Result<()> {
    let params = PipelineParams {
        data_dir: PathBuf::from("/data"),
        run_name: "240307".to_string(),
        bridge_root: PathBuf::from("/mnt/drive"),
        workers: 8,
        ..PipelineParams::default()
    };
    let bridge = LocalFolderBridge::new(&params.bridge_root);
    let summary = run_postprocessing(&bridge, &params, None)?;
    println!(
        "units processed={} skipped={} errors={}",
        summary.units.processed, summary.units.skipped, summary.units.errors
    );
    Ok(())
}
```

Scoring buildings against an in-memory cube
-------------------------------------------
```rust
use chrono::NaiveDate;
use geo::{coord, MultiPolygon, Rect};
use ndarray::Array4;
use dmgmap::{predictions_per_building, Building, RasterCube};

fn main() -> dmgmap::Result<()> {
    // one date, one band, 2x2 pixels of 1x1 starting at (0, 2)
    let stack = Array4::from_shape_vec((1, 1, 2, 2), vec![0.0, 100.0, 200.0, 255.0]).unwrap();
    let date = NaiveDate::from_ymd_opt(2023, 2, 24).unwrap();
    let cube = RasterCube::from_stack(stack, [0.0, 1.0, 0.0, 2.0, 0.0, -1.0], "EPSG:32636", vec![date])?;

    let footprint = Rect::new(coord! { x: 0.5, y: 1.5 }, coord! { x: 1.5, y: 1.9 }).to_polygon();
    let buildings = vec![Building::new("b1", MultiPolygon(vec![footprint]))];

    let preds = predictions_per_building(&buildings, cube)?;
    assert_eq!(preds[0].max, 100.0);
    assert!((preds[0].weighted_mean - 50.0).abs() < 1e-9);
    Ok(())
}
```

Point metrics
-------------
```rust,no_run
use std::path::Path;
use dmgmap::{api::evaluate_predictions, AggregationMethod, MetricsParams};

fn main() -> dmgmap::Result<()> {
    let params = MetricsParams {
        threshold: 0.65,
        method: AggregationMethod::DateWiseMean,
        ..MetricsParams::default()
    };
    let report = evaluate_predictions(Path::new("/data/points_preds.parquet"), &params)?;
    println!("{}", report.classification_report(params.digits));
    Ok(())
}
```

Error handling
--------------
All public functions return `dmgmap::Result<T>`; match on `dmgmap::Error` to
tell a missing upstream asset from a timeout or a malformed raster.

```rust,no_run
use dmgmap::{api::predict_all_admin_units, Error, PipelineParams};

fn main() {
    let params = PipelineParams { run_name: "240307".into(), ..PipelineParams::default() };
    match predict_all_admin_units(&params) {
        Ok(report) => println!("{} units failed", report.errors),
        Err(Error::MissingAsset { path }) => eprintln!("run first `merge`: {}", path.display()),
        Err(other) => eprintln!("error: {other}"),
    }
}
```

Useful modules
--------------
- [`api`] — high-level pipeline entry points.
- [`core`] — configuration, batch pool and the geometric processing.
- [`io`] — GDAL windows, mosaics, bridge, building / admin / table readers.
- [`types`] — `PostWindow` and `AggregationMethod`.
- [`error`] — crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Curated public API surface
// Types
pub use core::batch::BatchReport;
pub use core::params::{MetricsParams, PipelineParams};
pub use error::{Error, Result};
pub use types::{AggregationMethod, PostWindow};

// Processing
pub use core::processing::metrics::{MetricsReport, PointPrediction, evaluate};
pub use core::processing::overlay::{Building, BuildingPrediction, predictions_per_building};
pub use core::processing::partition::{
    AdminUnit, Partition, partition_by_centroid, partition_centroids,
};
pub use core::processing::vectorize::{Dim, PixelPolygons, RasterCube, vectorize_cube};

// Readers
pub use io::gdal::{GdalError, GdalMetadata, GdalRasterReader};

// High-level API re-exports
pub use api::{
    AggregateSummary, RunSummary, UnitOutcome, aggregate_all_predictions, download_and_merge,
    download_and_merge_all_dates, evaluate_predictions, predict_admin_unit,
    predict_all_admin_units, run_postprocessing, wait_for_predictions,
};
