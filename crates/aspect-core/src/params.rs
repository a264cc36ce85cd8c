//! Model hyperparameters loaded from JSON.
//!
//! A run reads `params.json` from the model directory and merges
//! `dataset_params.json` from the data directory on top of it, key by key.

use crate::{require_file, AspectError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Hyperparameters shared by every target in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Size of the model's weight table; must cover the vocabulary plus OOV buckets.
    pub vocab_size: usize,
    /// Token sequences are truncated to this many tokens.
    pub sentence_max_len: usize,
    pub batch_size: usize,
    /// Shuffle buffer for training input; 0 disables shuffling.
    pub shuffle_buffer_size: usize,
    /// Total optimizer steps per target.
    pub train_steps: u64,
    pub num_oov_buckets: u32,
    pub pad_word: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    /// Base seed for shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_seed() -> u64 {
    42
}

impl Params {
    /// Load model params from `model_json` and merge `dataset_json` over them.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing, is not a JSON object, or the
    /// merged object lacks a required field.
    pub fn load(model_json: &Path, dataset_json: &Path) -> Result<Self> {
        let mut merged = read_object(model_json)?;
        merged.extend(read_object(dataset_json)?);
        let params: Params = serde_json::from_value(Value::Object(merged))?;
        params.validate()
    }

    /// Ensure values are usable for training.
    ///
    /// # Errors
    ///
    /// Returns [`AspectError::Config`] describing the first invalid value.
    pub fn validate(self) -> Result<Self> {
        if self.batch_size == 0 {
            return Err(config("batch_size must be greater than 0"));
        }
        if self.sentence_max_len == 0 {
            return Err(config("sentence_max_len must be greater than 0"));
        }
        if self.train_steps == 0 {
            return Err(config("train_steps must be greater than 0"));
        }
        if self.vocab_size == 0 {
            return Err(config("vocab_size must be greater than 0"));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(config("learning_rate must be positive"));
        }
        Ok(self)
    }
}

fn read_object(path: &Path) -> Result<Map<String, Value>> {
    require_file(path)?;
    let contents = std::fs::read_to_string(path)?;
    match serde_json::from_str(&contents)? {
        Value::Object(map) => Ok(map),
        _ => Err(AspectError::Config(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
    }
}

fn config(message: &str) -> AspectError {
    AspectError::Config(message.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
