//! Train, evaluate and report one aspect column.
//!
//! A target moves through [`TrainingPhase`]s in order:
//!
//! ```text
//! Configured → Training ⇄ Evaluating → WeightsExtracted → Reported → Done
//! ```
//!
//! Evaluation interleaves with training at most once per `throttle_secs` of
//! wall time and always runs once after the final step.

use crate::report::{rank_weights, write_weights, WEIGHTS_FILE};
use crate::training::data::{BatchPipeline, CsvExampleSource, PipelineConfig};
use crate::training::metrics::ValidationMetrics;
use crate::training::model::{Evaluation, LinearClassifier};
use aspect_core::{require_file, AspectColumn, Params, Result, RunConfig, VocabIndex};
use candle_core::Device;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Checkpoint file name inside a target's model directory.
pub const CHECKPOINT_FILE: &str = "model.safetensors";

/// Per-example evaluation output file name.
pub const PREDICTIONS_FILE: &str = "predictions.txt";

/// Training steps between progress log lines.
const LOG_EVERY_STEPS: u64 = 100;

/// Lifecycle of one target's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Configured,
    Training,
    Evaluating,
    WeightsExtracted,
    Reported,
    Done,
}

/// What a finished target produced.
#[derive(Debug, Clone)]
pub struct TargetSummary {
    pub target: AspectColumn,
    /// Optimizer steps taken in this run (0 when training was disabled or had no input).
    pub steps: u64,
    /// Evaluation passes run, interleaved ones included.
    pub evaluations: usize,
    /// Checkpoints written during this run.
    pub checkpoints: usize,
    pub eval_loss: f64,
    pub eval_metrics: ValidationMetrics,
    pub eval_examples: usize,
    pub checkpoint_path: PathBuf,
    pub weights_path: PathBuf,
    pub predictions_path: Option<PathBuf>,
}

/// Trains and reports a single target column.
pub struct TargetTrainer<'a> {
    target: AspectColumn,
    params: &'a Params,
    run: &'a RunConfig,
    vocab: Arc<VocabIndex>,
    device: Device,
    model_dir: PathBuf,
    phase: TrainingPhase,
    evaluations: usize,
    checkpoints: usize,
}

impl<'a> TargetTrainer<'a> {
    pub fn new(
        target: AspectColumn,
        params: &'a Params,
        run: &'a RunConfig,
        vocab: Arc<VocabIndex>,
        device: &Device,
    ) -> Self {
        Self {
            target,
            params,
            run,
            vocab,
            device: device.clone(),
            model_dir: run.target_dir(target),
            phase: TrainingPhase::Configured,
            evaluations: 0,
            checkpoints: 0,
        }
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Shuffled, repeating input over the training CSV.
    pub fn train_pipeline(&self) -> BatchPipeline {
        self.pipeline(self.run.train_path(), PipelineConfig::training(self.params))
    }

    /// Single ordered pass over the evaluation CSV.
    pub fn eval_pipeline(&self) -> BatchPipeline {
        self.pipeline(self.run.eval_path(), PipelineConfig::evaluation(self.params))
    }

    /// Run the whole lifecycle and write the weight report.
    ///
    /// # Errors
    ///
    /// Invalid run options, or any input, model, or write failure, abort the
    /// target and are returned as is.
    pub fn run(mut self) -> Result<TargetSummary> {
        self.run.validate()?;
        info!(aspect = %self.target, model_dir = %self.model_dir.display(), "Training target");
        std::fs::create_dir_all(&self.model_dir)?;
        let checkpoint_path = self.model_dir.join(CHECKPOINT_FILE);

        let mut model = LinearClassifier::new(self.params.vocab_size, &self.device)?;
        let (steps, evaluation) = if self.run.train {
            self.train(&model, &checkpoint_path)?
        } else {
            require_file(&checkpoint_path)?;
            model.load(&checkpoint_path)?;
            info!(path = %checkpoint_path.display(), "Loaded checkpoint, skipping training");
            (0, self.evaluate(&model)?)
        };

        let weights = model.weights()?;
        self.enter(TrainingPhase::WeightsExtracted);
        let ranked = rank_weights(&weights, &self.vocab);

        let weights_path = self.model_dir.join(WEIGHTS_FILE);
        write_weights(&ranked, &weights_path)?;
        let predictions_path = if self.run.predict {
            Some(self.write_predictions(&model)?)
        } else {
            None
        };
        self.enter(TrainingPhase::Reported);

        info!(
            aspect = %self.target,
            steps,
            eval_loss = evaluation.loss,
            metrics = %evaluation.metrics,
            "Finished target"
        );
        self.enter(TrainingPhase::Done);

        Ok(TargetSummary {
            target: self.target,
            steps,
            evaluations: self.evaluations,
            checkpoints: self.checkpoints,
            eval_loss: evaluation.loss,
            eval_metrics: evaluation.metrics,
            eval_examples: evaluation.examples,
            checkpoint_path,
            weights_path,
            predictions_path,
        })
    }

    fn train(
        &mut self,
        model: &LinearClassifier,
        checkpoint_path: &Path,
    ) -> Result<(u64, Evaluation)> {
        let mut optimizer = model.optimizer(self.params)?;
        let mut batches = self.train_pipeline().batches()?;
        let throttle = Duration::from_secs(self.run.throttle_secs);
        let train_steps = self.params.train_steps;

        self.enter(TrainingPhase::Training);
        let mut last_eval = Instant::now();
        let mut window_loss = 0.0_f64;
        let mut window_steps = 0u64;
        let mut steps = 0u64;
        let mut last_saved = None;

        while steps < train_steps {
            let Some(batch) = batches.next() else {
                warn!(
                    aspect = %self.target,
                    steps,
                    train_steps,
                    "Training input ended early"
                );
                break;
            };
            window_loss += f64::from(model.train_step(&batch?, &mut optimizer)?);
            window_steps += 1;
            steps += 1;

            if steps % LOG_EVERY_STEPS == 0 {
                info!(
                    aspect = %self.target,
                    step = steps,
                    loss = window_loss / window_steps as f64,
                    "Training"
                );
                window_loss = 0.0;
                window_steps = 0;
            }
            if steps % self.run.save_checkpoints_steps == 0 {
                self.save_checkpoint(model, checkpoint_path, steps)?;
                last_saved = Some(steps);
            }
            if steps < train_steps && last_eval.elapsed() >= throttle {
                self.evaluate(model)?;
                self.enter(TrainingPhase::Training);
                last_eval = Instant::now();
            }
        }
        // Stops the prefetch worker.
        drop(batches);

        if last_saved != Some(steps) {
            self.save_checkpoint(model, checkpoint_path, steps)?;
        }
        let evaluation = self.evaluate(model)?;
        Ok((steps, evaluation))
    }

    fn save_checkpoint(
        &mut self,
        model: &LinearClassifier,
        checkpoint_path: &Path,
        step: u64,
    ) -> Result<()> {
        model.save(checkpoint_path)?;
        self.checkpoints += 1;
        debug!(step, path = %checkpoint_path.display(), "Saved checkpoint");
        Ok(())
    }

    fn evaluate(&mut self, model: &LinearClassifier) -> Result<Evaluation> {
        self.enter(TrainingPhase::Evaluating);
        let evaluation = model.evaluate(self.eval_pipeline().batches()?)?;
        self.evaluations += 1;
        info!(
            aspect = %self.target,
            examples = evaluation.examples,
            loss = evaluation.loss,
            metrics = %evaluation.metrics,
            "Evaluation"
        );
        Ok(evaluation)
    }

    /// One `predicted\tprobability\tlabel` line per evaluation example, in file order.
    fn write_predictions(&self, model: &LinearClassifier) -> Result<PathBuf> {
        let path = self.model_dir.join(PREDICTIONS_FILE);
        let mut out = BufWriter::new(std::fs::File::create(&path)?);
        let mut written = 0usize;
        for batch in self.eval_pipeline().batches()? {
            let batch = batch?;
            let probabilities = model.predict_proba(&batch)?;
            for (p, label) in probabilities.iter().zip(&batch.labels) {
                writeln!(out, "{}\t{p}\t{label}", u8::from(*p > 0.5))?;
            }
            written += batch.len();
        }
        out.flush()?;
        info!(path = %path.display(), examples = written, "Wrote predictions");
        Ok(path)
    }

    fn pipeline(&self, path: PathBuf, config: PipelineConfig) -> BatchPipeline {
        let source = CsvExampleSource::new(
            path,
            Arc::clone(&self.vocab),
            self.target,
            self.params.sentence_max_len,
        );
        BatchPipeline::new(Arc::new(source), config)
    }

    fn enter(&mut self, phase: TrainingPhase) {
        debug!(aspect = %self.target, from = ?self.phase, to = ?phase, "Phase change");
        self.phase = phase;
    }
}

/// Train `target` end to end and write its reports.
///
/// # Errors
///
/// See [`TargetTrainer::run`].
pub fn train_and_report(
    target: AspectColumn,
    params: &Params,
    run: &RunConfig,
    vocab: &Arc<VocabIndex>,
    device: &Device,
) -> Result<TargetSummary> {
    TargetTrainer::new(target, params, run, Arc::clone(vocab), device).run()
}
