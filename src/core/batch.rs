//! Bounded worker pool for skip-if-done batch jobs.
//!
//! Every key whose output already exists is skipped up front; the rest run on
//! a dedicated rayon pool. A failing key, whether it returns `Err` or panics,
//! is logged and counted without stopping its siblings. Workers share one
//! process, so an abort such as running out of memory stops all of them; a
//! rerun resumes since finished keys are skipped.
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Outcome counts of a batch run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Keys that failed, with their error message
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Run `task` for every key not yet `is_done`, on at most `workers` threads.
pub fn run_pending<K, D, T>(keys: &[K], is_done: D, task: T, workers: usize) -> Result<BatchReport>
where
    K: Display + Sync,
    D: Fn(&K) -> bool,
    T: Fn(&K) -> Result<()> + Sync,
{
    if workers == 0 {
        return Err(Error::InvalidArgument {
            arg: "workers",
            value: workers.to_string(),
        });
    }

    let (done, pending): (Vec<&K>, Vec<&K>) = keys.iter().partition(|k| is_done(k));
    let mut report = BatchReport {
        skipped: done.len(),
        ..BatchReport::default()
    };
    info!(
        "{} tasks pending, {} already done, {} workers",
        pending.len(),
        report.skipped,
        workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(Error::external)?;

    let outcomes: Vec<(String, std::result::Result<(), String>)> = pool.install(|| {
        pending
            .par_iter()
            .map(|key| {
                let outcome = match catch_unwind(AssertUnwindSafe(|| task(key))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(payload) => Err(panic_message(payload)),
                };
                (key.to_string(), outcome)
            })
            .collect()
    });

    for (key, outcome) in outcomes {
        match outcome {
            Ok(()) => report.processed += 1,
            Err(msg) => {
                warn!("Task {} failed: {}", key, msg);
                report.errors += 1;
                report.failed.push((key, msg));
            }
        }
    }
    Ok(report)
}
