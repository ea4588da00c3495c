use gdal::raster::ResampleAlg;
use gdal::{Dataset, errors::GdalError as GdalCrateError};
use geo::Rect;
use ndarray::{Array3, Array4, Axis, s};
use std::path::Path;
use thiserror::Error;

/// Errors encountered when using GDAL reader
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
    #[error("Window {0:?} does not overlap the raster")]
    EmptyWindow(Rect<f64>),
    #[error("Rasters do not share a grid: {0}")]
    GridMismatch(String),
}

/// Metadata extracted from a GDAL-supported dataset
#[derive(Debug, Clone)]
pub struct GdalMetadata {
    /// Width (pixels) of the raster
    pub size_x: usize,
    /// Height (lines) of the raster
    pub size_y: usize,
    /// Number of raster bands
    pub bands: usize,
    /// Affine geotransform coefficients ([origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height])
    pub geotransform: [f64; 6],
    /// Projection as `EPSG:XXXX` when an authority code is present, WKT otherwise
    pub projection: String,
}

/// Pixel window `(col_off, row_off, width, height)` inside a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

/// Bands of one window, with the geotransform of the window's upper-left corner.
#[derive(Debug, Clone)]
pub struct WindowRead {
    /// Shape (band, y, x)
    pub data: Array3<f64>,
    pub geotransform: [f64; 6],
}

/// Reader for prediction rasters (GeoTIFF mosaics) via GDAL
pub struct GdalRasterReader {
    pub dataset: Dataset,
    pub metadata: GdalMetadata,
}

// Helper to extract EPSG code from WKT authority tag
fn parse_epsg(wkt: &str) -> Option<String> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    if let Some(idx) = wkt.rfind(KEY) {
        let start = idx + KEY.len();
        if let Some(end) = wkt[start..].find('"') {
            let code = &wkt[start..start + end];
            return Some(format!("EPSG:{}", code));
        }
    }
    None
}

/// Compute the pixel window covering `bounds`, clamped to the raster.
///
/// Offsets are floored and far edges ceiled so every pixel touching the
/// bounds is included. Returns `None` when the bounds miss the raster.
pub fn window_from_bounds(
    geotransform: &[f64; 6],
    size_x: usize,
    size_y: usize,
    bounds: &Rect<f64>,
) -> Option<PixelWindow> {
    let (x0, dx, y0, dy) = (geotransform[0], geotransform[1], geotransform[3], geotransform[5]);
    if dx == 0.0 || dy == 0.0 {
        return None;
    }

    let cols = [(bounds.min().x - x0) / dx, (bounds.max().x - x0) / dx];
    let rows = [(bounds.min().y - y0) / dy, (bounds.max().y - y0) / dy];
    let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64) as usize;

    let col_start = clamp(cols[0].min(cols[1]).floor(), size_x);
    let col_end = clamp(cols[0].max(cols[1]).ceil(), size_x);
    let row_start = clamp(rows[0].min(rows[1]).floor(), size_y);
    let row_end = clamp(rows[0].max(rows[1]).ceil(), size_y);

    if col_end <= col_start || row_end <= row_start {
        return None;
    }
    Some(PixelWindow {
        col_off: col_start,
        row_off: row_start,
        width: col_end - col_start,
        height: row_end - row_start,
    })
}

impl GdalRasterReader {
    /// Open a GDAL-supported raster (GeoTIFF mosaic or tile)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GdalError> {
        let dataset = Dataset::open(path.as_ref())?;
        let (size_x, size_y) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;
        if bands == 0 {
            return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
        }
        let geotransform = match dataset.geo_transform() {
            Ok(gt) => gt,
            Err(_) => [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        };
        let proj = dataset.projection();
        let projection = if proj.starts_with("EPSG:") {
            proj
        } else if let Some(code) = parse_epsg(&proj) {
            code
        } else {
            proj
        };
        Ok(GdalRasterReader {
            dataset,
            metadata: GdalMetadata {
                size_x: size_x as usize,
                size_y: size_y as usize,
                bands,
                geotransform,
                projection,
            },
        })
    }

    /// Pixel window of this raster covering `bounds`
    pub fn window(&self, bounds: &Rect<f64>) -> Result<PixelWindow, GdalError> {
        window_from_bounds(
            &self.metadata.geotransform,
            self.metadata.size_x,
            self.metadata.size_y,
            bounds,
        )
        .ok_or(GdalError::EmptyWindow(*bounds))
    }

    /// Read every band inside `window` as an f64 array of shape (band, height, width).
    /// Values are passed through untouched, nodata included.
    pub fn read_window(&self, window: PixelWindow) -> Result<WindowRead, GdalError> {
        let shape = (window.width, window.height);
        let mut data = Array3::<f64>::zeros((self.metadata.bands, window.height, window.width));
        for idx in 1..=self.metadata.bands {
            let band = self.dataset.rasterband(idx)?;
            let buf = band.read_as::<f64>(
                (window.col_off as isize, window.row_off as isize),
                shape,
                shape,
                Some(ResampleAlg::NearestNeighbour),
            )?;
            let data_vec = buf.data().to_vec();
            let array = ndarray::Array2::from_shape_vec((window.height, window.width), data_vec)
                .map_err(|_| {
                    GdalError::DimensionMismatch(window.width, window.height, shape.0, shape.1)
                })?;
            data.index_axis_mut(Axis(0), idx - 1).assign(&array);
        }

        let gt = self.metadata.geotransform;
        let geotransform = [
            gt[0] + window.col_off as f64 * gt[1] + window.row_off as f64 * gt[2],
            gt[1],
            gt[2],
            gt[3] + window.col_off as f64 * gt[4] + window.row_off as f64 * gt[5],
            gt[4],
            gt[5],
        ];
        Ok(WindowRead { data, geotransform })
    }

    /// Read the part of the raster covering `bounds`
    pub fn read_within(&self, bounds: &Rect<f64>) -> Result<WindowRead, GdalError> {
        let window = self.window(bounds)?;
        self.read_window(window)
    }
}

// Relative tolerance on pixel size and on lattice offsets
const GRID_TOLERANCE: f64 = 1e-6;

/// Pixel window covering `bounds` on the unbounded lattice of `geotransform`:
/// `(col, row, width, height)`, offsets possibly negative or past the raster.
fn lattice_window(geotransform: &[f64; 6], bounds: &Rect<f64>) -> Option<(isize, isize, usize, usize)> {
    let (x0, dx, y0, dy) = (geotransform[0], geotransform[1], geotransform[3], geotransform[5]);
    if dx == 0.0 || dy == 0.0 {
        return None;
    }
    let cols = [(bounds.min().x - x0) / dx, (bounds.max().x - x0) / dx];
    let rows = [(bounds.min().y - y0) / dy, (bounds.max().y - y0) / dy];
    let col_start = cols[0].min(cols[1]).floor() as isize;
    let col_end = cols[0].max(cols[1]).ceil() as isize;
    let row_start = rows[0].min(rows[1]).floor() as isize;
    let row_end = rows[0].max(rows[1]).ceil() as isize;
    if col_end <= col_start || row_end <= row_start {
        return None;
    }
    Some((
        col_start,
        row_start,
        (col_end - col_start) as usize,
        (row_end - row_start) as usize,
    ))
}

/// Offset in whole pixels of the raster at `geotransform` on the lattice of
/// `reference`. `None` when pixel sizes differ or the origin falls between
/// lattice nodes.
fn lattice_offset(reference: &[f64; 6], geotransform: &[f64; 6]) -> Option<(isize, isize)> {
    let tol = GRID_TOLERANCE * reference[1].abs();
    if [1, 2, 4, 5]
        .iter()
        .any(|&i| (reference[i] - geotransform[i]).abs() > tol)
    {
        return None;
    }
    let col = (geotransform[0] - reference[0]) / reference[1];
    let row = (geotransform[3] - reference[3]) / reference[5];
    if (col - col.round()).abs() > GRID_TOLERANCE || (row - row.round()).abs() > GRID_TOLERANCE {
        return None;
    }
    Some((col.round() as isize, row.round() as isize))
}

/// Clip every raster in `paths` to `bounds` and stack the windows along a new
/// leading date axis, giving shape (date, band, y, x).
///
/// Each raster is windowed with its own geotransform and placed on the pixel
/// lattice of the first one, so mosaics with different extents line up by
/// location. Cells a raster does not cover are NaN. Rasters with another
/// pixel size, projection or band count, or off the lattice, are rejected.
/// Returns the stack, the geotransform of its upper-left pixel and the
/// projection; `EmptyWindow` when no raster overlaps `bounds`.
pub fn read_stack_within<P: AsRef<Path>>(
    paths: &[P],
    bounds: &Rect<f64>,
) -> Result<(Array4<f64>, [f64; 6], String), GdalError> {
    let readers = paths
        .iter()
        .map(|p| GdalRasterReader::open(p))
        .collect::<Result<Vec<_>, _>>()?;
    let first = readers
        .first()
        .ok_or_else(|| GdalError::UnsupportedFormat("No rasters to stack".into()))?;
    let reference = first.metadata.geotransform;
    let bands = first.metadata.bands;
    let projection = first.metadata.projection.clone();
    let (col0, row0, width, height) =
        lattice_window(&reference, bounds).ok_or(GdalError::EmptyWindow(*bounds))?;

    let mut stack = Array4::from_elem((readers.len(), bands, height, width), f64::NAN);
    let mut covered = false;
    for (i, (reader, path)) in readers.iter().zip(paths).enumerate() {
        let meta = &reader.metadata;
        let path = path.as_ref();
        if meta.bands != bands {
            return Err(GdalError::GridMismatch(format!(
                "{:?} has {} bands, expected {}",
                path, meta.bands, bands
            )));
        }
        if meta.projection != projection {
            return Err(GdalError::GridMismatch(format!(
                "{:?} is in {}, expected {}",
                path, meta.projection, projection
            )));
        }
        let (dc, dr) = lattice_offset(&reference, &meta.geotransform).ok_or_else(|| {
            GdalError::GridMismatch(format!(
                "{:?} has geotransform {:?}, not on the lattice of {:?}",
                path, meta.geotransform, reference
            ))
        })?;

        // Part of the target window this raster covers, in lattice pixels
        let c_start = col0.max(dc);
        let c_end = (col0 + width as isize).min(dc + meta.size_x as isize);
        let r_start = row0.max(dr);
        let r_end = (row0 + height as isize).min(dr + meta.size_y as isize);
        if c_end <= c_start || r_end <= r_start {
            continue;
        }
        let window = PixelWindow {
            col_off: (c_start - dc) as usize,
            row_off: (r_start - dr) as usize,
            width: (c_end - c_start) as usize,
            height: (r_end - r_start) as usize,
        };
        let read = reader.read_window(window)?;
        let (x, y) = ((c_start - col0) as usize, (r_start - row0) as usize);
        stack
            .index_axis_mut(Axis(0), i)
            .slice_mut(s![.., y..y + window.height, x..x + window.width])
            .assign(&read.data);
        covered = true;
    }
    if !covered {
        return Err(GdalError::EmptyWindow(*bounds));
    }

    let geotransform = [
        reference[0] + col0 as f64 * reference[1] + row0 as f64 * reference[2],
        reference[1],
        reference[2],
        reference[3] + col0 as f64 * reference[4] + row0 as f64 * reference[5],
        reference[4],
        reference[5],
    ];
    Ok((stack, geotransform, projection))
}
