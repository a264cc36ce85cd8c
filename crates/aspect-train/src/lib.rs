//! Aspect Classifier Training
//!
//! Trains one bag-of-words logistic-regression classifier per aspect column
//! of the restaurant-review dataset and reports the learned per-token weights.
//!
//! # Modules
//!
//! - [`training`] — Input pipeline, linear model, metrics and per-target trainer
//! - [`report`] — Ranked `token\tweight` reports
//! - [`driver`] — Sequential run over every aspect column
//! - [`device`] — Compute device selection

pub mod device;
pub mod driver;
pub mod report;
pub mod training;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::driver::run;
    pub use crate::report::{rank_weights, write_weights};
    pub use crate::training::data::{
        Batch, BatchPipeline, CsvExampleSource, Example, ExampleSource, PipelineConfig,
    };
    pub use crate::training::model::LinearClassifier;
    pub use crate::training::trainer::{train_and_report, TargetSummary};
    pub use aspect_core::{AspectColumn, AspectError, Params, RunConfig, VocabIndex};
}
