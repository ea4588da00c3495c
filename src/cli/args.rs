use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use dmgmap::AggregationMethod;

#[derive(Parser)]
#[command(name = "dmgmap", version, about = "Building damage postprocessing CLI")]
pub struct CliArgs {
    /// JSON config file; flags below override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (otherwise RUST_LOG or info)
    #[arg(long, global = true, default_value_t = false)]
    pub log: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download prediction tiles and merge them into one mosaic per date window
    Merge(MergeArgs),
    /// Score buildings per admin unit from the merged mosaics
    Buildings(RunArgs),
    /// Join per-unit predictions onto the building store
    Aggregate(RunArgs),
    /// merge, buildings and aggregate in sequence
    Run(MergeArgs),
    /// Evaluate point predictions against their labels
    Metrics(MetricsArgs),
}

/// Options shared by every pipeline stage
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Name of the prediction run
    #[arg(long)]
    pub run_name: Option<String>,

    /// Local data root
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Building store (Parquet with building_id and geometry_wkb)
    #[arg(long)]
    pub buildings: Option<PathBuf>,

    /// Directory holding the admin boundary shapefiles
    #[arg(long)]
    pub admin_dir: Option<PathBuf>,

    /// Admin level used to shard buildings (1-4)
    #[arg(long)]
    pub admin_level: Option<u8>,

    /// Number of admin units processed in parallel
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Args, Clone)]
pub struct MergeArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Root of the synced export folder
    #[arg(long)]
    pub bridge_root: Option<PathBuf>,

    /// Only merge these windows (YYYY-MM-DD_YYYY-MM-DD); repeatable
    #[arg(long = "post-window")]
    pub post_windows: Vec<String>,

    /// Keep downloaded tiles next to the mosaics
    #[arg(long, default_value_t = false)]
    pub save_individual_files: bool,

    /// Do not wait for the export folder to appear
    #[arg(long, default_value_t = false)]
    pub no_wait: bool,
}

#[derive(Args, Clone)]
pub struct MetricsArgs {
    /// Point prediction table (.parquet or .csv)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Decision threshold in [0, 1]
    #[arg(long)]
    pub threshold: Option<f64>,

    /// How repeated observations of a point become samples
    #[arg(long, value_enum)]
    pub method: Option<AggregationMethod>,

    /// Only count positive dates from this year
    #[arg(long)]
    pub positive_year: Option<i32>,

    /// Decimal places in the report
    #[arg(long)]
    pub digits: Option<usize>,

    /// Print the metrics as JSON instead of a text report
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
