//! Sparse bag-of-words linear classifier.
//!
//! Each token id owns one scalar weight in a `[table_size, 1]` table. An
//! example's logit is the bias plus the sum of the weights of its ids, one
//! term per occurrence; padding positions are masked out.
//!
//! ```text
//! ids [B, L] → Embedding(table_size, 1) → [B, L] ⊙ mask → Σ_L → + bias → logits [B]
//! ```

use crate::training::data::Batch;
use crate::training::metrics::{MetricsAccumulator, ValidationMetrics};
use aspect_core::{AspectError, Params, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, Optimizer, VarBuilder, VarMap};
use std::path::Path;

/// Result of one full evaluation pass.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Mean per-example logistic loss.
    pub loss: f64,
    pub metrics: ValidationMetrics,
    pub examples: usize,
}

/// Binary logistic-regression model over token ids.
pub struct LinearClassifier {
    varmap: VarMap,
    embedding: candle_nn::Embedding,
    weights: Tensor,
    bias: Tensor,
    table_size: usize,
    device: Device,
}

impl LinearClassifier {
    /// Create a model with zero-initialised weights and bias.
    pub fn new(table_size: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let weights = vb
            .get_with_hints((table_size, 1), "weights", candle_nn::init::ZERO)
            .map_err(model_err("Failed to create weight table"))?;
        let bias = vb
            .get_with_hints(1, "bias", candle_nn::init::ZERO)
            .map_err(model_err("Failed to create bias"))?;

        Ok(Self {
            varmap,
            embedding: candle_nn::Embedding::new(weights.clone(), 1),
            weights,
            bias,
            table_size,
            device: device.clone(),
        })
    }

    /// AdamW over every model variable.
    pub fn optimizer(&self, params: &Params) -> Result<candle_nn::AdamW> {
        candle_nn::AdamW::new(
            self.varmap.all_vars(),
            candle_nn::ParamsAdamW {
                lr: params.learning_rate,
                weight_decay: params.weight_decay,
                ..Default::default()
            },
        )
        .map_err(model_err("Failed to create optimizer"))
    }

    /// Logits of shape `[batch.len()]`.
    pub fn forward_logits(&self, batch: &Batch) -> Result<Tensor> {
        let (rows, width) = (batch.len(), batch.width());
        if width == 0 {
            return Tensor::zeros(rows, DType::F32, &self.device)
                .and_then(|zeros| zeros.broadcast_add(&self.bias))
                .map_err(model_err("Failed to build empty-row logits"));
        }
        if let Some(&max_id) = batch.ids.iter().flatten().max() {
            if max_id as usize >= self.table_size {
                return Err(AspectError::Model(format!(
                    "token id {max_id} is outside the weight table of size {}",
                    self.table_size
                )));
            }
        }

        let ids = Tensor::from_vec(batch.flat_ids(), (rows, width), &self.device)
            .map_err(model_err("Failed to create id tensor"))?;
        let mask = Tensor::from_vec(batch.mask(), (rows, width), &self.device)
            .map_err(model_err("Failed to create mask tensor"))?;

        self.embedding
            .forward(&ids)
            .and_then(|per_token| per_token.squeeze(2))
            .and_then(|per_token| per_token.mul(&mask))
            .and_then(|masked| masked.sum(1))
            .and_then(|summed| summed.broadcast_add(&self.bias))
            .map_err(model_err("Forward pass failed"))
    }

    /// One optimizer step on `batch`; returns the batch loss.
    pub fn train_step(&self, batch: &Batch, optimizer: &mut candle_nn::AdamW) -> Result<f32> {
        let logits = self.forward_logits(batch)?;
        let targets = self.targets(batch)?;
        let loss = logistic_loss(&logits, &targets).map_err(model_err("Loss computation failed"))?;
        optimizer
            .backward_step(&loss)
            .map_err(model_err("Backward step failed"))?;
        loss
            .to_scalar::<f32>()
            .map_err(model_err("Loss scalar failed"))
    }

    /// Mean loss and confusion-matrix metrics over every batch; label 1 is predicted when the logit is positive.
    pub fn evaluate<I>(&self, batches: I) -> Result<Evaluation>
    where
        I: IntoIterator<Item = Result<Batch>>,
    {
        let mut total_loss = 0.0;
        let mut examples = 0usize;
        let mut accumulator = MetricsAccumulator::default();

        for batch in batches {
            let batch = batch?;
            let logits = self.forward_logits(&batch)?;
            let targets = self.targets(&batch)?;
            let loss = logistic_loss(&logits, &targets)
                .and_then(|l| l.to_scalar::<f32>())
                .map_err(model_err("Eval loss failed"))?;
            let logits: Vec<f32> = logits.to_vec1().map_err(model_err("Eval logits to vec"))?;

            let predictions: Vec<i64> = logits.iter().map(|&z| i64::from(z > 0.0)).collect();
            accumulator.update(&predictions, &batch.labels);
            total_loss += f64::from(loss) * batch.len() as f64;
            examples += batch.len();
        }

        let loss = if examples > 0 {
            total_loss / examples as f64
        } else {
            0.0
        };
        Ok(Evaluation {
            loss,
            metrics: accumulator.finish(),
            examples,
        })
    }

    /// Probability of label 1 for each example in `batch`.
    pub fn predict_proba(&self, batch: &Batch) -> Result<Vec<f32>> {
        let logits = self.forward_logits(batch)?;
        candle_nn::ops::sigmoid(&logits)
            .and_then(|p| p.to_vec1())
            .map_err(model_err("Sigmoid failed"))
    }

    /// The learned per-id weights, `table_size` long.
    pub fn weights(&self) -> Result<Vec<f32>> {
        self.weights
            .flatten_all()
            .and_then(|w| w.to_vec1())
            .map_err(model_err("Failed to read weights"))
    }

    pub fn bias(&self) -> Result<f32> {
        self.bias
            .flatten_all()
            .and_then(|b| b.to_vec1::<f32>())
            .map(|b| b.first().copied().unwrap_or(0.0))
            .map_err(model_err("Failed to read bias"))
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    /// Write all variables to a safetensors checkpoint.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.varmap
            .save(path)
            .map_err(model_err("Failed to save checkpoint"))
    }

    /// Overwrite all variables from a safetensors checkpoint.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.varmap
            .load(path)
            .map_err(model_err("Failed to load checkpoint"))
    }

    fn targets(&self, batch: &Batch) -> Result<Tensor> {
        let labels: Vec<f32> = batch.labels.iter().map(|&l| l as f32).collect();
        Tensor::from_vec(labels, batch.len(), &self.device)
            .map_err(model_err("Failed to create label tensor"))
    }
}

/// Numerically stable mean binary cross-entropy on logits:
/// `max(z, 0) - z·y + ln(1 + e^{-|z|})`.
fn logistic_loss(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let positive = logits.relu()?;
    let agreement = logits.mul(targets)?;
    let softplus = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    ((positive - agreement)? + softplus)?.mean_all()
}

fn model_err(context: &'static str) -> impl Fn(candle_core::Error) -> AspectError {
    move |e| AspectError::Model(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
