//! Shared types and enums used across dmgmap.
//! Includes `PostWindow` (a post-disaster date window) and `AggregationMethod`
//! (how repeated observations of one point are turned into metric samples).
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Date format used in folder names, file names and table columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A post-disaster observation window `[start, end)`.
///
/// Written as `YYYY-MM-DD_YYYY-MM-DD` in bridge folder names and mosaic file
/// names. The start date is the reference date of the window everywhere
/// downstream (`post_date` columns, GeoJSON properties).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct PostWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PostWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Name of the merged mosaic for this window, e.g. `ukraine_2023-02-24_2023-05-24.tif`.
    pub fn mosaic_file_name(&self) -> String {
        format!("ukraine_{}.tif", self)
    }

    /// Parse the window embedded in a mosaic file stem (`ukraine_<start>_<end>`).
    pub fn from_mosaic_stem(stem: &str) -> Option<Self> {
        stem.strip_prefix("ukraine_")?.parse().ok()
    }

    /// Reference date, formatted as a column name.
    pub fn label(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }
}

impl std::fmt::Display for PostWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

impl FromStr for PostWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidArgument {
            arg: "post_window",
            value: s.to_string(),
        };
        let (start, end) = s.split_once('_').ok_or_else(invalid)?;
        let start = NaiveDate::parse_from_str(start, DATE_FORMAT).map_err(|_| invalid())?;
        let end = NaiveDate::parse_from_str(end, DATE_FORMAT).map_err(|_| invalid())?;
        if end < start {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

/// How per-date predictions of one point are turned into metric samples.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMethod {
    /// Every qualifying date is its own sample.
    DateWise,
    /// One sample per point from the mean of its qualifying dates.
    DateWiseMean,
    /// One sample per point from the median of its qualifying dates.
    DateWiseMedian,
}

impl std::fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AggregationMethod::DateWise => "date-wise",
            AggregationMethod::DateWiseMean => "date-wise-mean",
            AggregationMethod::DateWiseMedian => "date-wise-median",
        };
        write!(f, "{}", s)
    }
}
