//! Per-building damage scoring: pixel vectorization, building overlay,
//! admin-unit sharding and point-level metrics.
pub mod metrics;
pub mod overlay;
pub mod partition;
pub mod vectorize;
