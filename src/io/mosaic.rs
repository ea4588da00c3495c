//! Per-window mosaics: merge staged tiles with `gdalwarp` and discover the
//! mosaics already built for a run.
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::PostWindow;

/// What `merge_tiles` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The output already existed and was left untouched
    Skipped,
    Merged { tiles: usize },
}

/// Merge `tiles` into a single GeoTIFF at `output`.
///
/// An existing `output` is never rewritten. Where tiles overlap, the
/// warper's write order decides (later tiles win).
pub fn merge_tiles(tiles: &[PathBuf], output: &Path) -> Result<MergeOutcome> {
    if output.exists() {
        info!("Mosaic {:?} already exists, skipping", output);
        return Ok(MergeOutcome::Skipped);
    }
    if tiles.is_empty() {
        return Err(Error::missing(output));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cmd = Command::new("gdalwarp");
    cmd.args(["-of", "GTiff", "-q"]).args(tiles).arg(output);
    info!("Merging {} tiles into {:?}", tiles.len(), output);
    let status = cmd
        .status()
        .map_err(|e| Error::External(format!("gdalwarp exec error: {}", e)))?;
    if !status.success() {
        // Do not leave a partial mosaic behind, it would be skipped next time
        if output.exists() {
            if let Err(e) = std::fs::remove_file(output) {
                warn!("Could not remove partial mosaic {:?}: {}", output, e);
            }
        }
        return Err(Error::External(format!("gdalwarp failed with {}", status)));
    }
    Ok(MergeOutcome::Merged { tiles: tiles.len() })
}

/// Windows of every `ukraine_<start>_<end>.tif` in `run_dir`, sorted.
pub fn find_post_windows(run_dir: &Path) -> Result<Vec<PostWindow>> {
    let mut windows = Vec::new();
    for entry in std::fs::read_dir(run_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tif") {
            continue;
        }
        if let Some(w) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(PostWindow::from_mosaic_stem)
        {
            windows.push(w);
        }
    }
    windows.sort();
    Ok(windows)
}
