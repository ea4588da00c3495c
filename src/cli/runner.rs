use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dmgmap::api::{
    aggregate_all_predictions, download_and_merge_all_dates, evaluate_predictions,
    predict_all_admin_units, run_postprocessing, wait_for_predictions,
};
use dmgmap::core::batch::BatchReport;
use dmgmap::core::timing::timed;
use dmgmap::io::bridge::LocalFolderBridge;
use dmgmap::{PipelineParams, PostWindow};

use super::args::{CliArgs, Command, MergeArgs, MetricsArgs, RunArgs};
use super::errors::AppError;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_params(args: &CliArgs) -> Result<PipelineParams, AppError> {
    match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Ok(PipelineParams::from_json_file(path)?)
        }
        None => Ok(PipelineParams::default()),
    }
}

fn apply_run_args(params: &mut PipelineParams, run: &RunArgs) -> Result<(), AppError> {
    if let Some(v) = &run.run_name {
        params.run_name = v.clone();
    }
    if let Some(v) = &run.data_dir {
        params.data_dir = v.clone();
    }
    if let Some(v) = &run.buildings {
        params.buildings_path = Some(v.clone());
    }
    if let Some(v) = &run.admin_dir {
        params.admin_dir = Some(v.clone());
    }
    if let Some(v) = run.admin_level {
        params.admin_level = v;
    }
    if let Some(v) = run.workers {
        params.workers = v;
    }
    if params.run_name.is_empty() {
        return Err(AppError::MissingArgument {
            arg: "--run-name".to_string(),
        });
    }
    params.validate()?;
    Ok(())
}

fn apply_merge_args(
    params: &mut PipelineParams,
    merge: &MergeArgs,
) -> Result<Option<Vec<PostWindow>>, AppError> {
    apply_run_args(params, &merge.run)?;
    if let Some(v) = &merge.bridge_root {
        params.bridge_root = v.clone();
    }
    if merge.save_individual_files {
        params.save_individual_files = true;
    }
    if merge.post_windows.is_empty() {
        return Ok(None);
    }
    merge
        .post_windows
        .iter()
        .map(|s| {
            s.parse()
                .map_err(|_| AppError::InvalidPostWindow { value: s.clone() })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn check_units(report: &BatchReport) -> Result<(), AppError> {
    info!(
        "Admin units processed: {}, skipped: {}, errors: {}",
        report.processed, report.skipped, report.errors
    );
    if report.is_clean() {
        return Ok(());
    }
    let units: Vec<&str> = report.failed.iter().map(|(k, _)| k.as_str()).collect();
    Err(AppError::UnitsFailed {
        count: report.errors,
        units: units.join(", "),
    })
}

fn run_metrics(params: &mut PipelineParams, metrics: &MetricsArgs) -> Result<(), AppError> {
    let m = &mut params.metrics;
    if let Some(v) = metrics.threshold {
        m.threshold = v;
    }
    if let Some(v) = metrics.method {
        m.method = v;
    }
    if metrics.positive_year.is_some() {
        m.positive_year = metrics.positive_year;
    }
    if let Some(v) = metrics.digits {
        m.digits = v;
    }

    let report = evaluate_predictions(&metrics.input, &params.metrics)?;
    if metrics.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(dmgmap::Error::from)?
        );
        return Ok(());
    }
    let d = params.metrics.digits;
    let auc = report
        .roc_auc
        .map(|v| format!("{:.d$}", v))
        .unwrap_or_else(|| "undefined".to_string());
    println!(
        "precision={:.d$} recall={:.d$} f1={:.d$} accuracy={:.d$} roc_auc={}",
        report.precision, report.recall, report.f1, report.accuracy, auc
    );
    println!("{}", report.classification_report(d));
    Ok(())
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log);
    let mut params = load_params(&args)?;

    match &args.command {
        Command::Merge(merge) => {
            let only = apply_merge_args(&mut params, merge)?;
            let bridge = LocalFolderBridge::new(&params.bridge_root);
            if !merge.no_wait {
                timed("Waiting for predictions", || {
                    wait_for_predictions(&bridge, &params)
                })?;
            }
            let merged = timed("Merging mosaics", || {
                download_and_merge_all_dates(&bridge, &params, only.as_deref())
            })?;
            info!("{} date windows handled", merged.len());
        }
        Command::Buildings(run) => {
            apply_run_args(&mut params, run)?;
            let report = timed("Scoring buildings", || predict_all_admin_units(&params))?;
            check_units(&report)?;
        }
        Command::Aggregate(run) => {
            apply_run_args(&mut params, run)?;
            let summary = timed("Aggregating predictions", || {
                aggregate_all_predictions(&params)
            })?;
            if summary.units_failed > 0 {
                warn!("{} unit files could not be read", summary.units_failed);
            }
        }
        Command::Run(merge) => {
            let only = apply_merge_args(&mut params, merge)?;
            let bridge = LocalFolderBridge::new(&params.bridge_root);
            if merge.no_wait {
                params.poll.deadline_secs = 0.0;
            }
            let summary = run_postprocessing(&bridge, &params, only.as_deref())?;
            info!(
                "Run {} complete: {} mosaics, {} buildings in output",
                params.run_name, summary.mosaics, summary.aggregate.buildings
            );
            check_units(&summary.units)?;
        }
        Command::Metrics(metrics) => run_metrics(&mut params, metrics)?,
    }

    Ok(())
}
