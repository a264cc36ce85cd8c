//! Sequential run over every aspect column.
//!
//! All inputs are validated before the first target starts. Targets then run
//! one after another; the first error ends the run.

use crate::device::select_device;
use crate::training::trainer::{train_and_report, TargetSummary};
use aspect_core::{AspectColumn, AspectError, Params, Result, RunConfig, VocabIndex};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared read-only state for every target of a run.
#[derive(Debug)]
pub struct RunContext {
    pub params: Params,
    pub vocab: Arc<VocabIndex>,
}

/// Check inputs, load params and vocabulary, and validate that they agree.
///
/// # Errors
///
/// Returns the first missing file, malformed JSON, or inconsistent setting.
pub fn prepare(run: &RunConfig) -> Result<RunContext> {
    run.check_required_files()?;
    let params = Params::load(&run.model_params_path(), &run.dataset_params_path())?;
    let vocab = VocabIndex::from_file(&run.vocab_path(), params.num_oov_buckets)?;

    if params.vocab_size < vocab.total_size() {
        return Err(AspectError::Config(format!(
            "vocab_size {} is smaller than {} vocabulary tokens plus {} OOV buckets",
            params.vocab_size,
            vocab.len(),
            vocab.num_oov_buckets()
        )));
    }
    match vocab.lookup(&params.pad_word) {
        Ok(pad_id) => debug!(pad_word = %params.pad_word, pad_id, "Resolved pad word"),
        Err(e) => debug!(pad_word = %params.pad_word, error = %e, "Pad word has no id"),
    }

    Ok(RunContext {
        params,
        vocab: Arc::new(vocab),
    })
}

/// Train and report every aspect column in schema order.
///
/// # Errors
///
/// Fails before any training on configuration errors, and stops at the first
/// target that fails.
pub fn run(run: &RunConfig) -> Result<Vec<TargetSummary>> {
    let ctx = prepare(run)?;
    let device = select_device(&run.device);
    info!(
        targets = AspectColumn::ALL.len(),
        vocab_size = ctx.params.vocab_size,
        train_steps = ctx.params.train_steps,
        "Starting run"
    );

    let mut summaries = Vec::with_capacity(AspectColumn::ALL.len());
    for target in AspectColumn::ALL {
        summaries.push(train_and_report(
            target,
            &ctx.params,
            run,
            &ctx.vocab,
            &device,
        )?);
    }

    info!(targets = summaries.len(), "Run complete");
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_inputs(dir: &Path, vocab_size: usize) -> RunConfig {
        let run = RunConfig {
            data_dir: dir.join("data"),
            model_dir: dir.join("model"),
            ..RunConfig::default()
        };
        std::fs::create_dir_all(&run.data_dir).unwrap();
        std::fs::create_dir_all(&run.model_dir).unwrap();
        std::fs::write(
            run.model_params_path(),
            r#"{"sentence_max_len": 5, "batch_size": 2, "shuffle_buffer_size": 4,
                "train_steps": 2, "num_oov_buckets": 1, "pad_word": "<pad>"}"#,
        )
        .unwrap();
        std::fs::write(
            run.dataset_params_path(),
            format!(r#"{{"vocab_size": {vocab_size}}}"#),
        )
        .unwrap();
        std::fs::write(run.vocab_path(), "<pad>\ngood\nbad\n").unwrap();
        std::fs::write(run.train_path(), "header\n").unwrap();
        std::fs::write(run.eval_path(), "header\n").unwrap();
        run
    }

    #[test]
    fn test_prepare_loads_shared_state() {
        let dir = tempfile::tempdir().unwrap();
        let run = write_inputs(dir.path(), 4);
        let ctx = prepare(&run).unwrap();
        assert_eq!(ctx.params.vocab_size, 4);
        assert_eq!(ctx.vocab.len(), 3);
        assert_eq!(ctx.vocab.lookup("<pad>").unwrap(), 0);
    }

    #[test]
    fn test_prepare_rejects_small_vocab_size() {
        let dir = tempfile::tempdir().unwrap();
        let run = write_inputs(dir.path(), 3);
        let err = prepare(&run).unwrap_err();
        assert!(matches!(err, AspectError::Config(_)));
    }

    #[test]
    fn test_missing_file_fails_before_any_target() {
        let dir = tempfile::tempdir().unwrap();
        let run = write_inputs(dir.path(), 4);
        std::fs::remove_file(run.eval_path()).unwrap();

        let err = super::run(&run).unwrap_err();
        assert!(matches!(err, AspectError::MissingFile { .. }));
        for target in AspectColumn::ALL {
            assert!(!run.target_dir(target).exists());
        }
    }
}
