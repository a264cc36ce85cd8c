//! Core types, configuration, and errors for aspect classifier training.
//!
//! This crate holds everything shared between the input pipeline and the
//! trainer: the fixed review-dataset schema, the vocabulary index, the
//! hyperparameter and run configuration, and the error taxonomy.

use std::path::{Path, PathBuf};

pub mod params;
pub mod schema;
pub mod vocab;

pub use params::Params;
pub use schema::{AspectColumn, AspectRecord, RecordParser, ASPECT_COUNT, SCHEMA_FIELDS};
pub use vocab::{VocabIndex, UNKNOWN_TOKEN};

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Name of the vocabulary file inside the data directory.
pub const VOCAB_FILE: &str = "words.txt";
/// Name of the training CSV inside the data directory.
pub const TRAIN_FILE: &str = "train.csv";
/// Name of the evaluation CSV inside the data directory.
pub const EVAL_FILE: &str = "valid.csv";
/// Name of the model hyperparameter JSON inside the model directory.
pub const MODEL_PARAMS_FILE: &str = "params.json";
/// Name of the dataset parameter JSON inside the data directory.
pub const DATASET_PARAMS_FILE: &str = "dataset_params.json";

/// Options for one full run over every aspect column.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory containing `words.txt`, `train.csv`, `valid.csv` and `dataset_params.json`.
    pub data_dir: PathBuf,
    /// Base directory for per-target model output; also holds `params.json`.
    pub model_dir: PathBuf,
    /// Device selector: `cpu` or a GPU ordinal such as `0`.
    pub device: String,
    /// Save a checkpoint every this many optimizer steps.
    pub save_checkpoints_steps: u64,
    /// Minimum wall-clock seconds between evaluations during training.
    pub throttle_secs: u64,
    /// Whether to train; when false the existing checkpoint is evaluated and reported.
    pub train: bool,
    /// Whether to write per-example evaluation predictions.
    pub predict: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("../data"),
            model_dir: PathBuf::from("../experiments/linear"),
            device: "0".to_string(),
            save_checkpoints_steps: 1000,
            throttle_secs: 240,
            train: true,
            predict: true,
        }
    }
}

impl RunConfig {
    /// Path of the vocabulary file.
    pub fn vocab_path(&self) -> PathBuf {
        self.data_dir.join(VOCAB_FILE)
    }

    /// Path of the training CSV.
    pub fn train_path(&self) -> PathBuf {
        self.data_dir.join(TRAIN_FILE)
    }

    /// Path of the evaluation CSV.
    pub fn eval_path(&self) -> PathBuf {
        self.data_dir.join(EVAL_FILE)
    }

    /// Path of the model hyperparameter JSON.
    pub fn model_params_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_PARAMS_FILE)
    }

    /// Path of the dataset parameter JSON.
    pub fn dataset_params_path(&self) -> PathBuf {
        self.data_dir.join(DATASET_PARAMS_FILE)
    }

    /// Output directory for one target column.
    pub fn target_dir(&self, target: AspectColumn) -> PathBuf {
        self.model_dir.join(target.name())
    }

    /// Every input file a run needs, in the order they are checked.
    pub fn required_files(&self) -> [PathBuf; 5] {
        [
            self.model_params_path(),
            self.dataset_params_path(),
            self.vocab_path(),
            self.train_path(),
            self.eval_path(),
        ]
    }

    /// Fail with [`AspectError::MissingFile`] on the first required input that does not exist,
    /// then [`validate`](Self::validate) the options.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing file or invalid option.
    pub fn check_required_files(&self) -> Result<()> {
        for path in self.required_files() {
            require_file(&path)?;
        }
        self.validate()
    }

    /// Reject option values no run can use.
    ///
    /// # Errors
    ///
    /// Returns [`AspectError::Config`] when `save_checkpoints_steps` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.save_checkpoints_steps == 0 {
            return Err(AspectError::Config(
                "save_checkpoints_steps must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Return [`AspectError::MissingFile`] unless `path` is an existing file.
pub fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AspectError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Whether structured JSON output was requested.
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum AspectError {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required input file does not exist.
    #[error("Missing required file: {}", path.display())]
    MissingFile {
        /// The path that was expected to exist.
        path: PathBuf,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A row does not match the fixed schema.
    #[error("Schema mismatch at line {line}: {message}")]
    Schema {
        /// 1-based line number in the source file (0 when parsed standalone).
        line: usize,
        /// Description of the mismatch.
        message: String,
    },

    /// Vocabulary construction or lookup failure.
    #[error("Vocabulary error: {0}")]
    Vocab(String),

    /// Model construction, training, or checkpoint failure.
    #[error("Model error: {0}")]
    Model(String),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, AspectError>`.
pub type Result<T> = std::result::Result<T, AspectError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_defaults_match_cli() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.data_dir, PathBuf::from("../data"));
        assert_eq!(cfg.model_dir, PathBuf::from("../experiments/linear"));
        assert_eq!(cfg.device, "0");
        assert_eq!(cfg.save_checkpoints_steps, 1000);
        assert_eq!(cfg.throttle_secs, 240);
        assert!(cfg.train);
        assert!(cfg.predict);
    }

    #[test]
    fn test_validate_rejects_zero_checkpoint_interval() {
        let cfg = RunConfig {
            save_checkpoints_steps: 0,
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(AspectError::Config(_))));
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_target_dir_uses_column_name() {
        let cfg = RunConfig {
            model_dir: PathBuf::from("out"),
            ..RunConfig::default()
        };
        assert_eq!(
            cfg.target_dir(AspectColumn::DishTaste),
            PathBuf::from("out/dish_taste")
        );
    }

    #[test]
    fn test_missing_file_reported_first() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            data_dir: dir.path().join("data"),
            model_dir: dir.path().join("model"),
            ..RunConfig::default()
        };
        match cfg.check_required_files() {
            Err(AspectError::MissingFile { path }) => {
                assert_eq!(path, dir.path().join("model").join("params.json"));
            }
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[test]
    fn test_required_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            data_dir: dir.path().to_path_buf(),
            model_dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        };
        for path in cfg.required_files() {
            std::fs::write(path, "").unwrap();
        }
        assert!(cfg.check_required_files().is_ok());
    }

    #[test]
    fn test_logging_config_default() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.level, "info");
        assert!(!cfg.is_json());
        let json = LoggingConfig {
            format: "JSON".to_string(),
            ..LoggingConfig::default()
        };
        assert!(json.is_json());
    }

    #[test]
    fn test_error_display() {
        let err = AspectError::Schema {
            line: 3,
            message: "expected 23 fields, found 2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Schema mismatch at line 3: expected 23 fields, found 2"
        );
    }
}
