use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::io::bridge::PollPolicy;
use crate::types::{AggregationMethod, PostWindow};

/// Start of the full-scale invasion; observations before it are negatives.
pub const CONFLICT_START: NaiveDate = match NaiveDate::from_ymd_opt(2022, 2, 24) {
    Some(d) => d,
    None => panic!("invalid conflict start"),
};

/// Point-level evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsParams {
    /// Decision threshold in [0, 1], compared against values scaled by 255
    pub threshold: f64,
    pub method: AggregationMethod,
    /// Restrict positive dates to this calendar year
    pub positive_year: Option<i32>,
    pub conflict_start: NaiveDate,
    /// Decimal places in the classification report
    pub digits: usize,
}

impl Default for MetricsParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            method: AggregationMethod::DateWise,
            positive_year: None,
            conflict_start: CONFLICT_START,
            digits: 3,
        }
    }
}

/// Run configuration suitable for JSON config files. Every field has a
/// default so a config file only needs the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Root of local data; mosaics and outputs go to `<data_dir>/<run_name>`
    pub data_dir: PathBuf,
    pub run_name: String,
    /// Root of the synced export folder
    pub bridge_root: PathBuf,
    /// Building store; defaults to `<data_dir>/overture/ukraine_buildings.parquet`
    pub buildings_path: Option<PathBuf>,
    /// Admin boundary shapefiles; defaults to `<data_dir>/UKR_admin_boundaries`
    pub admin_dir: Option<PathBuf>,
    pub admin_level: u8,
    pub workers: usize,
    /// Keep downloaded tiles next to the mosaics instead of a temp dir
    pub save_individual_files: bool,
    pub poll: PollPolicy,
    pub metrics: MetricsParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            run_name: String::new(),
            bridge_root: PathBuf::from("drive"),
            buildings_path: None,
            admin_dir: None,
            admin_level: 3,
            workers: 3,
            save_individual_files: false,
            poll: PollPolicy::default(),
            metrics: MetricsParams::default(),
        }
    }
}

impl PipelineParams {
    /// Load from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.is_empty() {
            return Err(Error::InvalidArgument {
                arg: "run_name",
                value: String::new(),
            });
        }
        if !(1..=4).contains(&self.admin_level) {
            return Err(Error::InvalidArgument {
                arg: "admin_level",
                value: self.admin_level.to_string(),
            });
        }
        if self.workers == 0 {
            return Err(Error::InvalidArgument {
                arg: "workers",
                value: "0".into(),
            });
        }
        self.poll.validate()
    }

    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join(&self.run_name)
    }

    pub fn admin_preds_dir(&self) -> PathBuf {
        self.run_dir().join("admin_preds")
    }

    pub fn admin_preds_path(&self, admin_id: &str) -> PathBuf {
        self.admin_preds_dir().join(format!("{}.geojson", admin_id))
    }

    pub fn mosaic_path(&self, window: &PostWindow) -> PathBuf {
        self.run_dir().join(window.mosaic_file_name())
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.run_dir().join("buildings_preds.parquet")
    }

    pub fn buildings_path(&self) -> PathBuf {
        self.buildings_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("overture").join("ukraine_buildings.parquet"))
    }

    pub fn admin_dir(&self) -> PathBuf {
        self.admin_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("UKR_admin_boundaries"))
    }

    /// Bridge folder holding one sub-folder of tiles per post window.
    pub fn bridge_folder(&self) -> String {
        format!("{}_quadkeys_predictions", self.run_name)
    }
}
