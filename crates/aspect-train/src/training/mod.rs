//! Per-aspect linear classifier training pipeline.
//!
//! Input pipeline, linear model, metrics, and the per-target train/evaluate
//! loop that produces one ranked word-weight report per aspect column.

pub mod data;
pub mod metrics;
pub mod model;
pub mod trainer;
