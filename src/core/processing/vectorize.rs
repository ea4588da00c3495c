//! Pixel vectorization: turn a (date, y, x) prediction cube into one square
//! polygon per pixel carrying one value per date.
use chrono::NaiveDate;
use geo::{Coord, Polygon, Rect};
use ndarray::{Array2, Array3, Array4, ArrayD, Axis, Ix3, IxDyn};

use crate::error::{Error, Result};

/// Named axis of a raster cube.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Dim {
    Date,
    Band,
    Y,
    X,
}

/// Georeferenced n-dimensional raster values with named axes.
#[derive(Debug, Clone)]
pub struct RasterCube {
    pub data: ArrayD<f64>,
    pub dims: Vec<Dim>,
    /// Geotransform of the upper-left corner of the cube
    pub geotransform: [f64; 6],
    pub crs: String,
    /// One entry per index along the `Date` axis
    pub dates: Vec<NaiveDate>,
}

impl RasterCube {
    pub fn new(
        data: ArrayD<f64>,
        dims: Vec<Dim>,
        geotransform: [f64; 6],
        crs: impl Into<String>,
        dates: Vec<NaiveDate>,
    ) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(Error::Dimension(format!(
                "{} axis names for a {}-dimensional array",
                dims.len(),
                data.ndim()
            )));
        }
        if let Some(axis) = dims.iter().position(|d| *d == Dim::Date) {
            if data.len_of(Axis(axis)) != dates.len() {
                return Err(Error::Dimension(format!(
                    "{} dates for a date axis of length {}",
                    dates.len(),
                    data.len_of(Axis(axis))
                )));
            }
        }
        Ok(Self {
            data,
            dims,
            geotransform,
            crs: crs.into(),
            dates,
        })
    }

    /// Cube from a stack of per-date band windows, shape (date, band, y, x).
    pub fn from_stack(
        stack: Array4<f64>,
        geotransform: [f64; 6],
        crs: impl Into<String>,
        dates: Vec<NaiveDate>,
    ) -> Result<Self> {
        Self::new(
            stack.into_dyn(),
            vec![Dim::Date, Dim::Band, Dim::Y, Dim::X],
            geotransform,
            crs,
            dates,
        )
    }

    /// Pixel size `(dx, dy)` from the geotransform.
    pub fn resolution(&self) -> (f64, f64) {
        (self.geotransform[1], self.geotransform[5])
    }

    /// Reduce to a (date, y, x) array: a singleton band axis is dropped,
    /// anything else that is not exactly date/y/x is rejected.
    pub fn into_date_yx(self) -> Result<Array3<f64>> {
        if !self.dims.contains(&Dim::Date) {
            return Err(Error::Dimension("raster cube has no date axis".into()));
        }

        let mut data = self.data;
        let mut dims = self.dims;
        while let Some(axis) = dims.iter().position(|d| *d == Dim::Band) {
            if data.len_of(Axis(axis)) != 1 {
                return Err(Error::Dimension(format!(
                    "band axis of length {} cannot be squeezed",
                    data.len_of(Axis(axis))
                )));
            }
            data = data.index_axis_move(Axis(axis), 0);
            dims.remove(axis);
        }

        if dims.len() != 3 {
            return Err(Error::Dimension(format!(
                "expected (date, y, x), got {:?}",
                dims
            )));
        }
        let position = |dim: Dim| {
            dims.iter()
                .position(|d| *d == dim)
                .ok_or_else(|| Error::Dimension(format!("missing {:?} axis in {:?}", dim, dims)))
        };
        let order = [position(Dim::Date)?, position(Dim::Y)?, position(Dim::X)?];

        data.permuted_axes(IxDyn(&order))
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::Dimension(e.to_string()))
    }
}

/// One square polygon per pixel with one value column per date.
#[derive(Debug, Clone)]
pub struct PixelPolygons {
    pub polygons: Vec<Polygon<f64>>,
    /// Shape (pixel, date), rows in the same order as `polygons`
    pub values: Array2<f64>,
    pub dates: Vec<NaiveDate>,
    pub crs: String,
}

impl PixelPolygons {
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}

/// Vectorize a prediction cube.
///
/// Pixels are emitted row-major (y outer, x inner). Each polygon is the
/// axis-aligned square of half side `|dx| / 2` around the cell center, which
/// tiles the raster footprint exactly when pixels are square.
pub fn vectorize_cube(cube: RasterCube) -> Result<PixelPolygons> {
    let geotransform = cube.geotransform;
    let crs = cube.crs.clone();
    let dates = cube.dates.clone();
    let data = cube.into_date_yx()?;
    let (n_dates, height, width) = data.dim();

    let (x0, dx, y0, dy) = (geotransform[0], geotransform[1], geotransform[3], geotransform[5]);
    let half = dx.abs() / 2.0;

    let mut polygons = Vec::with_capacity(height * width);
    for row in 0..height {
        let cy = y0 + (row as f64 + 0.5) * dy;
        for col in 0..width {
            let cx = x0 + (col as f64 + 0.5) * dx;
            polygons.push(
                Rect::new(
                    Coord { x: cx - half, y: cy - half },
                    Coord { x: cx + half, y: cy + half },
                )
                .to_polygon(),
            );
        }
    }

    let values = Array2::from_shape_fn((height * width, n_dates), |(pixel, date)| {
        data[[date, pixel / width, pixel % width]]
    });

    Ok(PixelPolygons {
        polygons,
        values,
        dates,
        crs,
    })
}
