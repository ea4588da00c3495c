//! Tabular I/O: Parquet and CSV through polars, plus the point prediction
//! table read by the metrics evaluator.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use serde_json::{Value, json};

use crate::core::processing::metrics::PointPrediction;
use crate::error::{Error, Result};
use crate::types::DATE_FORMAT;

/// Prefix of per-date prediction columns, e.g. `pred_2023-02-24`.
pub const PRED_PREFIX: &str = "pred_";

/// Read a Parquet file into a DataFrame.
pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).map_err(|_| Error::missing(path))?;
    Ok(ParquetReader::new(file).finish()?)
}

/// Read a CSV file (with header) into a DataFrame.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).map_err(|_| Error::missing(path))?;
    Ok(CsvReader::new(file).finish()?)
}

/// Read a table, choosing the format by extension (`.parquet` or `.csv`).
pub fn read_table(path: &Path) -> Result<DataFrame> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_parquet(path),
        Some("csv") => read_csv(path),
        _ => Err(Error::InvalidArgument {
            arg: "table",
            value: path.display().to_string(),
        }),
    }
}

/// Write a DataFrame to a Parquet file at `path`.
pub fn write_parquet(mut df: DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    ParquetWriter::new(writer).finish(&mut df)?;
    Ok(())
}

/// Column values as strings, casting non-string columns.
pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Convert one cell to JSON, keeping numbers and booleans typed.
pub fn any_value_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => json!(b),
        AnyValue::String(s) => json!(s),
        AnyValue::StringOwned(s) => json!(s.as_str()),
        AnyValue::Int8(v) => json!(v),
        AnyValue::Int16(v) => json!(v),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt8(v) => json!(v),
        AnyValue::UInt16(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        AnyValue::Float32(v) if v.is_finite() => json!(v),
        AnyValue::Float64(v) if v.is_finite() => json!(v),
        AnyValue::Float32(_) | AnyValue::Float64(_) => Value::Null,
        other => json!(other.to_string()),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..10)?, DATE_FORMAT).ok()
}

/// Turn a table with `id`, `aoi`, `date` and `pred_<YYYY-MM-DD>` columns into
/// point predictions. Rows without a parseable label date are dropped.
pub fn point_predictions_from_frame(df: &DataFrame) -> Result<Vec<PointPrediction>> {
    let ids = string_column(df, "id")?;
    let aois = string_column(df, "aoi")?;
    let dates = string_column(df, "date")?;

    let mut pred_columns = Vec::new();
    for name in df.get_column_names() {
        let Some(date) = name.strip_prefix(PRED_PREFIX).and_then(parse_date) else {
            continue;
        };
        let values = df.column(name.as_str())?.cast(&DataType::Float64)?;
        let values: Vec<Option<f64>> = values.f64()?.into_iter().collect();
        pred_columns.push((date, values));
    }
    if pred_columns.is_empty() {
        return Err(Error::Processing(format!(
            "no `{}<date>` columns in prediction table",
            PRED_PREFIX
        )));
    }

    let mut points = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let Some(label_date) = dates[row].as_deref().and_then(parse_date) else {
            tracing::debug!("Skipping row {} without label date", row);
            continue;
        };
        let predictions: BTreeMap<NaiveDate, Option<f64>> = pred_columns
            .iter()
            .map(|(date, values)| (*date, values[row]))
            .collect();
        points.push(PointPrediction {
            id: ids[row].clone().unwrap_or_else(|| row.to_string()),
            aoi: aois[row].clone().unwrap_or_default(),
            label_date,
            predictions,
        });
    }
    Ok(points)
}

/// Load point predictions from a Parquet or CSV file.
pub fn read_point_predictions(path: &Path) -> Result<Vec<PointPrediction>> {
    point_predictions_from_frame(&read_table(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        df![
            "id" => [1i64, 2, 3],
            "aoi" => ["UKR1", "UKR2", "UKR2"],
            "date" => [Some("2022-03-01"), Some("2022-07-15"), None],
            "pred_2021-06-01" => [Some(10.0), None, Some(3.0)],
            "pred_2022-06-01" => [Some(200.0), Some(40.0), Some(1.0)],
            "area" => [1.0, 2.0, 3.0],
        ]
        .unwrap()
    }

    #[test]
    fn parses_prediction_columns() {
        let points = point_predictions_from_frame(&frame()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].id, "1");
        assert_eq!(points[1].aoi, "UKR2");
        let d = |s| NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap();
        assert_eq!(points[0].label_date, d("2022-03-01"));
        assert_eq!(points[0].predictions.len(), 2);
        assert_eq!(points[0].predictions[&d("2022-06-01")], Some(200.0));
        assert_eq!(points[1].predictions[&d("2021-06-01")], None);
    }

    #[test]
    fn csv_and_parquet_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let pq = dir.path().join("preds.parquet");
        write_parquet(frame(), &pq).unwrap();
        assert_eq!(read_point_predictions(&pq).unwrap().len(), 2);

        let csv = dir.path().join("preds.csv");
        std::fs::write(
            &csv,
            "id,aoi,date,pred_2021-06-01,pred_2022-06-01\na,UKR1,2022-03-01,10,200\n",
        )
        .unwrap();
        let points = read_point_predictions(&csv).unwrap();
        assert_eq!(points[0].id, "a");
        assert_eq!(points[0].predictions.values().flatten().count(), 2);
    }

    #[test]
    fn unknown_extension_and_missing_columns_are_errors() {
        assert!(read_table(Path::new("preds.xlsx")).is_err());
        let df = df!["id" => ["a"], "aoi" => ["x"], "date" => ["2022-03-01"]].unwrap();
        assert!(point_predictions_from_frame(&df).is_err());
    }

    #[test]
    fn json_cells_keep_types() {
        assert_eq!(any_value_to_json(AnyValue::Int64(4)), json!(4));
        assert_eq!(any_value_to_json(AnyValue::String("a")), json!("a"));
        assert_eq!(any_value_to_json(AnyValue::Float64(f64::NAN)), Value::Null);
        assert_eq!(any_value_to_json(AnyValue::Null), Value::Null);
    }
}
