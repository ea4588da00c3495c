//! I/O layer: GDAL-backed raster windows, mosaic merging, the export bridge,
//! building and admin-boundary loaders, per-unit GeoJSON files and Parquet /
//! CSV tables.
pub mod admin;
pub mod bridge;
pub mod buildings;
pub mod geojson;
pub mod mosaic;
pub mod table;
pub mod wkb;

pub mod gdal;
pub use gdal::{GdalError, GdalMetadata, GdalRasterReader};
pub use wkb::WkbError;
