//! Core building blocks: run configuration, the bounded batch pool, stage
//! timing and the geometric processing primitives. These are consumed by the
//! high-level `api` module.
pub mod batch;
pub mod params;
pub mod processing;
pub mod timing;
