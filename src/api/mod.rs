//! High-level, ergonomic library API: fetch and merge prediction tiles,
//! score buildings per admin unit, aggregate the country-wide table and
//! evaluate point predictions. Prefer these entrypoints over the low-level
//! processing modules when integrating dmgmap.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::batch::{BatchReport, run_pending};
use crate::core::params::{MetricsParams, PipelineParams};
use crate::core::processing::metrics::{MetricsReport, evaluate};
use crate::core::processing::overlay::{Building, predictions_per_building, total_bounds};
use crate::core::processing::partition::partition_centroids;
use crate::core::processing::vectorize::RasterCube;
use crate::core::timing::timed;
use crate::error::{Error, Result};
use crate::io::admin::read_admin_units;
use crate::io::bridge::{StorageBridge, download_folder, poll_until};
use crate::io::buildings::{ID_COLUMN, buildings_at, footprint_centroids, read_building_store};
use crate::io::gdal::{GdalError, read_stack_within};
use crate::io::geojson::{read_predictions, write_predictions};
use crate::io::mosaic::{MergeOutcome, find_post_windows, merge_tiles};
use crate::io::table::{read_parquet, read_point_predictions, write_parquet};
use crate::types::{DATE_FORMAT, PostWindow};

/// Block until the run's export folder holds at least one date window.
pub fn wait_for_predictions(bridge: &dyn StorageBridge, params: &PipelineParams) -> Result<()> {
    let folder = params.bridge_folder();
    poll_until(&params.poll, &folder, || {
        Ok(bridge.folder_exists(&folder) && !bridge.list_folders(&folder)?.is_empty())
    })
}

/// Download the tiles of one bridge folder and merge them into
/// `<local_dir>/<file_name>`.
///
/// Nothing is downloaded when the mosaic already exists. Tiles are staged in
/// a temporary directory, or kept under `<local_dir>/<folder name>` when
/// `save_individual_files` is set.
pub fn download_and_merge(
    bridge: &dyn StorageBridge,
    folder: &str,
    local_dir: &Path,
    file_name: &str,
    save_individual_files: bool,
) -> Result<MergeOutcome> {
    let output = local_dir.join(file_name);
    if output.exists() {
        info!("{:?} already exists, skipping download", output);
        return Ok(MergeOutcome::Skipped);
    }
    std::fs::create_dir_all(local_dir)?;

    if save_individual_files {
        let name = folder.rsplit('/').next().unwrap_or(folder);
        let staging = local_dir.join(name);
        let tiles = download_folder(bridge, folder, &staging)?;
        merge_tiles(&tiles, &output)
    } else {
        let staging = tempfile::tempdir()?;
        let tiles = download_folder(bridge, folder, staging.path())?;
        merge_tiles(&tiles, &output)
    }
}

/// Merge every date window of the run, or only those in `only`.
pub fn download_and_merge_all_dates(
    bridge: &dyn StorageBridge,
    params: &PipelineParams,
    only: Option<&[PostWindow]>,
) -> Result<Vec<(PostWindow, MergeOutcome)>> {
    let root = params.bridge_folder();
    let run_dir = params.run_dir();
    let mut outcomes = Vec::new();

    for name in bridge.list_folders(&root)? {
        let window: PostWindow = match name.parse() {
            Ok(w) => w,
            Err(_) => {
                warn!("Ignoring bridge folder {}/{}", root, name);
                continue;
            }
        };
        if only.is_some_and(|ws| !ws.contains(&window)) {
            continue;
        }
        let outcome = download_and_merge(
            bridge,
            &format!("{}/{}", root, name),
            &run_dir,
            &window.mosaic_file_name(),
            params.save_individual_files,
        )?;
        info!("Window {}: {:?}", window, outcome);
        outcomes.push((window, outcome));
    }
    Ok(outcomes)
}

/// What happened to one admin unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Skipped,
    Written { records: usize },
}

/// Score the buildings of one admin unit and write `output`.
///
/// Every mosaic is read only inside the bounding box of the unit's
/// buildings. An existing `output` is left untouched. A unit that no mosaic
/// covers gets an empty file, so it counts as done.
pub fn predict_admin_unit(
    admin_id: &str,
    buildings: &[Building],
    mosaics: &[(PostWindow, PathBuf)],
    output: &Path,
) -> Result<UnitOutcome> {
    if output.exists() {
        return Ok(UnitOutcome::Skipped);
    }
    let bounds = total_bounds(buildings)
        .ok_or_else(|| Error::Processing(format!("admin unit {} has no buildings", admin_id)))?;
    if mosaics.is_empty() {
        return Err(Error::Processing("no mosaics to read".into()));
    }

    let paths: Vec<&PathBuf> = mosaics.iter().map(|(_, p)| p).collect();
    let dates: Vec<NaiveDate> = mosaics.iter().map(|(w, _)| w.start).collect();
    let (stack, geotransform, crs) = match read_stack_within(&paths, &bounds) {
        Ok(read) => read,
        Err(GdalError::EmptyWindow(_)) => {
            warn!("Admin unit {} lies outside every mosaic", admin_id);
            write_predictions(output, buildings, &[])?;
            return Ok(UnitOutcome::Written { records: 0 });
        }
        Err(e) => return Err(e.into()),
    };
    let cube = RasterCube::from_stack(stack, geotransform, crs, dates)?;

    let predictions = predictions_per_building(buildings, cube)?;
    write_predictions(output, buildings, &predictions)?;
    info!(
        "Admin unit {}: {} buildings, {} records",
        admin_id,
        buildings.len(),
        predictions.len()
    );
    Ok(UnitOutcome::Written {
        records: predictions.len(),
    })
}

/// Mosaics of the run with their windows, sorted by date.
pub fn run_mosaics(params: &PipelineParams) -> Result<Vec<(PostWindow, PathBuf)>> {
    let run_dir = params.run_dir();
    let windows = find_post_windows(&run_dir).map_err(|_| Error::missing(&run_dir))?;
    if windows.is_empty() {
        return Err(Error::missing(run_dir.join("ukraine_*.tif")));
    }
    Ok(windows
        .into_iter()
        .map(|w| (w, params.mosaic_path(&w)))
        .collect())
}

/// Score every admin unit that has buildings, on `params.workers` threads.
/// A failing unit is reported and never stops the others.
///
/// The store stays columnar; each task decodes only its unit's buildings.
pub fn predict_all_admin_units(params: &PipelineParams) -> Result<BatchReport> {
    params.validate()?;
    let mosaics = run_mosaics(params)?;
    let store = read_building_store(&params.buildings_path())?;
    let units = read_admin_units(&params.admin_dir(), params.admin_level)?;

    let partition = partition_centroids(&footprint_centroids(&store)?, &units);
    if !partition.unassigned.is_empty() {
        warn!(
            "{} buildings fall outside every admin unit",
            partition.unassigned.len()
        );
    }
    std::fs::create_dir_all(params.admin_preds_dir())?;

    let keys: Vec<String> = partition.units.keys().cloned().collect();
    run_pending(
        &keys,
        |admin_id| params.admin_preds_path(admin_id).exists(),
        |admin_id| {
            let rows = partition.units.get(admin_id).map_or(&[][..], Vec::as_slice);
            let subset = buildings_at(&store, rows)?;
            predict_admin_unit(
                admin_id,
                &subset,
                &mosaics,
                &params.admin_preds_path(admin_id),
            )
            .map(|_| ())
        },
        params.workers,
    )
}

/// Counts of the final aggregation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateSummary {
    pub units_read: usize,
    pub units_failed: usize,
    pub buildings: usize,
    pub buildings_with_predictions: usize,
    pub post_dates: Vec<String>,
}

/// Wide table: one row per building, one `weighted_mean` column per post date.
fn pivot_predictions(
    rows: &BTreeMap<String, BTreeMap<NaiveDate, f64>>,
) -> Result<(DataFrame, Vec<NaiveDate>)> {
    let dates: BTreeSet<NaiveDate> = rows.values().flat_map(|r| r.keys().copied()).collect();
    let mut columns = vec![Column::new(
        ID_COLUMN.into(),
        rows.keys().map(String::as_str).collect::<Vec<_>>(),
    )];
    for date in &dates {
        let values: Vec<Option<f64>> = rows.values().map(|r| r.get(date).copied()).collect();
        columns.push(Column::new(
            date.format(DATE_FORMAT).to_string().into(),
            values,
        ));
    }
    Ok((DataFrame::new(columns)?, dates.into_iter().collect()))
}

/// Join the per-unit prediction files of `params.admin_level` onto the
/// building store and write `buildings_preds.parquet`. Buildings without
/// predictions keep null date columns; unreadable unit files are logged and
/// left out.
pub fn aggregate_all_predictions(params: &PipelineParams) -> Result<AggregateSummary> {
    let dir = params.admin_preds_dir();
    let prefix = format!("{}_", params.admin_level);
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|_| Error::missing(&dir))? {
        let path = entry?.path();
        let of_level = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix));
        if of_level && path.extension().and_then(|e| e.to_str()) == Some("geojson") {
            files.push(path);
        }
    }
    files.sort();

    let reads: Vec<_> = files
        .par_iter()
        .map(|path| (path, read_predictions(path)))
        .collect();

    let mut summary = AggregateSummary::default();
    let mut rows: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for (path, read) in reads {
        let records = match read {
            Ok(records) => records,
            Err(e) => {
                warn!("Error reading {:?}: {}", path, e);
                summary.units_failed += 1;
                continue;
            }
        };
        summary.units_read += 1;
        let mut unit_rows: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        for r in records {
            unit_rows
                .entry(r.building_id)
                .or_default()
                .insert(r.post_date, r.weighted_mean);
        }
        // Later units replace earlier ones for duplicated ids
        rows.extend(unit_rows);
    }

    let (wide, dates) = pivot_predictions(&rows)?;
    let mut buildings = read_parquet(&params.buildings_path())?;
    let ids = buildings.column(ID_COLUMN)?.cast(&DataType::String)?;
    buildings.with_column(ids)?;
    let joined = buildings.left_join(&wide, [ID_COLUMN], [ID_COLUMN])?;

    summary.buildings = joined.height();
    summary.buildings_with_predictions = rows.len();
    summary.post_dates = dates
        .iter()
        .map(|d| d.format(DATE_FORMAT).to_string())
        .collect();
    write_parquet(joined, &params.aggregate_path())?;
    info!(
        "Wrote {:?}: {} buildings, {} post dates",
        params.aggregate_path(),
        summary.buildings,
        summary.post_dates.len()
    );
    Ok(summary)
}

/// Outcome of a full postprocessing run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mosaics: usize,
    pub units: BatchReport,
    pub aggregate: AggregateSummary,
}

/// Wait for the export, merge mosaics, score every admin unit, aggregate.
pub fn run_postprocessing(
    bridge: &dyn StorageBridge,
    params: &PipelineParams,
    only: Option<&[PostWindow]>,
) -> Result<RunSummary> {
    params.validate()?;
    timed("Waiting for predictions", || wait_for_predictions(bridge, params))?;
    let merged = timed("Merging mosaics", || {
        download_and_merge_all_dates(bridge, params, only)
    })?;
    let units = timed("Scoring buildings", || predict_all_admin_units(params))?;
    if !units.is_clean() {
        warn!("{} admin units failed, aggregating the rest", units.errors);
    }
    let aggregate = timed("Aggregating predictions", || aggregate_all_predictions(params))?;
    Ok(RunSummary {
        mosaics: merged.len(),
        units,
        aggregate,
    })
}

/// Load a point prediction table (Parquet or CSV) and evaluate it.
pub fn evaluate_predictions(path: &Path, params: &MetricsParams) -> Result<MetricsReport> {
    let points = read_point_predictions(path)?;
    info!(
        "Evaluating {} points with {} (threshold {})",
        points.len(),
        params.method,
        params.threshold
    );
    evaluate(&points, params)
}
