//! Point-level evaluation of damage predictions against ground truth.
//!
//! Each labelled point carries one prediction per observed post date. Dates
//! on or after the point's label date are positive samples, dates before the
//! conflict start are negative samples, and everything in between is
//! discarded as unknown. In `date-wise` mode every qualifying date is an
//! independent sample, so points observed often weigh more.
use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::core::params::MetricsParams;
use crate::error::{Error, Result};
use crate::types::AggregationMethod;

/// Predictions of one ground-truth point, one entry per post date.
#[derive(Debug, Clone)]
pub struct PointPrediction {
    pub id: String,
    pub aoi: String,
    /// Date of the damage label
    pub label_date: NaiveDate,
    /// Prediction (0-255) per post date; `None` when not observed
    pub predictions: BTreeMap<NaiveDate, Option<f64>>,
}

/// Binary samples, `1` = damaged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Samples {
    pub y_true: Vec<u8>,
    pub y_pred: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_samples(samples: &Samples) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in samples.y_true.iter().zip(&samples.y_pred) {
            match (t, p) {
                (0, 0) => cm.tn += 1,
                (0, _) => cm.fp += 1,
                (_, 0) => cm.fn_ += 1,
                _ => cm.tp += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn errors(&self) -> usize {
        self.fp + self.fn_
    }
}

/// Scores of the damaged class plus accuracy and ROC-AUC.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// `None` when the samples hold a single class
    pub roc_auc: Option<f64>,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Area under the ROC curve from the Mann-Whitney statistic, ties counted
/// as one half.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Option<f64> {
    let mut ranked: Vec<(f64, u8)> = scores.iter().copied().zip(y_true.iter().copied()).collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n_pos = ranked.iter().filter(|(_, t)| *t != 0).count();
    let n_neg = ranked.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    // Average ranks over ties
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < ranked.len() {
        let mut j = i;
        while j < ranked.len() && ranked[j].0 == ranked[i].0 {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        let pos_in_tie = ranked[i..j].iter().filter(|(_, t)| *t != 0).count();
        rank_sum_pos += avg_rank * pos_in_tie as f64;
        i = j;
    }
    let u = rank_sum_pos - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

/// Build the positive and negative samples of every point.
///
/// A missing or NaN prediction never reaches the threshold: in `date-wise`
/// mode it is a sample predicted as undamaged. Mean and median skip missing
/// values, and a class whose qualifying dates are all missing is predicted
/// as undamaged.
pub fn collect_samples(points: &[PointPrediction], params: &MetricsParams) -> Samples {
    let threshold = params.threshold * 255.0;
    let mut samples = Samples::default();

    for point in points {
        let mut positives = Vec::new();
        let mut negatives = Vec::new();
        for (&date, v) in &point.predictions {
            let v = v.filter(|v| !v.is_nan());
            let in_year = params.positive_year.is_none_or(|y| date.year() == y);
            if date >= point.label_date && in_year {
                positives.push(v);
            }
            if date < params.conflict_start {
                negatives.push(v);
            }
        }

        for (values, label) in [(positives, 1u8), (negatives, 0u8)] {
            if values.is_empty() {
                continue;
            }
            let observed: Vec<f64> = values.iter().flatten().copied().collect();
            let scores = match params.method {
                AggregationMethod::DateWise => values,
                _ if observed.is_empty() => vec![None],
                AggregationMethod::DateWiseMean => vec![Some(mean(&observed))],
                AggregationMethod::DateWiseMedian => vec![Some(median(&observed))],
            };
            for v in scores {
                samples.y_true.push(label);
                samples.y_pred.push(u8::from(v.is_some_and(|v| v >= threshold)));
            }
        }
    }
    samples
}

/// Evaluate point predictions under `params`.
pub fn evaluate(points: &[PointPrediction], params: &MetricsParams) -> Result<MetricsReport> {
    if !(0.0..=1.0).contains(&params.threshold) {
        return Err(Error::InvalidArgument {
            arg: "threshold",
            value: params.threshold.to_string(),
        });
    }
    let samples = collect_samples(points, params);
    if samples.y_true.is_empty() {
        return Err(Error::Processing(
            "no positive or negative samples in the prediction table".into(),
        ));
    }
    Ok(report_from_samples(&samples))
}

pub fn report_from_samples(samples: &Samples) -> MetricsReport {
    let confusion = ConfusionMatrix::from_samples(samples);
    let precision = ratio(confusion.tp, confusion.tp + confusion.fp);
    let recall = ratio(confusion.tp, confusion.tp + confusion.fn_);
    let scores: Vec<f64> = samples.y_pred.iter().map(|&p| p as f64).collect();
    MetricsReport {
        precision,
        recall,
        f1: f1_score(precision, recall),
        roc_auc: roc_auc(&samples.y_true, &scores),
        accuracy: ratio(confusion.tp + confusion.tn, confusion.total()),
        confusion,
    }
}

impl MetricsReport {
    /// Text table with per-class precision, recall, f1 and support, followed
    /// by accuracy, macro and support-weighted averages.
    pub fn classification_report(&self, digits: usize) -> String {
        let cm = &self.confusion;
        let classes = [
            (
                "no damage",
                ratio(cm.tn, cm.tn + cm.fn_),
                ratio(cm.tn, cm.tn + cm.fp),
                cm.tn + cm.fp,
            ),
            ("damaged", self.precision, self.recall, cm.tp + cm.fn_),
        ];
        let total = cm.total();
        let width = "weighted avg".len();
        let col = (digits + 2).max("f1-score".len());

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>width$} {:>col$} {:>col$} {:>col$} {:>col$}\n",
            "", "precision", "recall", "f1-score", "support"
        );
        let mut macro_avg = [0.0; 3];
        let mut weighted_avg = [0.0; 3];
        for (name, p, r, support) in classes {
            let f = f1_score(p, r);
            let _ = writeln!(
                out,
                "{:>width$} {:>col$.digits$} {:>col$.digits$} {:>col$.digits$} {:>col$}",
                name, p, r, f, support
            );
            for (k, v) in [p, r, f].into_iter().enumerate() {
                macro_avg[k] += v / 2.0;
                weighted_avg[k] += v * ratio(support, total);
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:>width$} {:>col$} {:>col$} {:>col$.digits$} {:>col$}",
            "accuracy", "", "", self.accuracy, total
        );
        for (name, avg) in [("macro avg", macro_avg), ("weighted avg", weighted_avg)] {
            let _ = writeln!(
                out,
                "{:>width$} {:>col$.digits$} {:>col$.digits$} {:>col$.digits$} {:>col$}",
                name, avg[0], avg[1], avg[2], total
            );
        }
        out
    }
}
