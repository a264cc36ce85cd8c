//! Validation metrics for aspect classifier evaluation.
//!
//! Class 1 = positive sentiment (raw label 1), class 0 = negative (raw label -1).
//! Evaluation is streamed batch by batch, so counts are accumulated
//! incrementally and turned into ratios at the end.

/// Validation metrics computed from a confusion matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub fpr: f64,
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_count: usize,
}

/// Running confusion-matrix counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAccumulator {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_count: usize,
}

impl MetricsAccumulator {
    /// Add one batch of predicted and ground-truth labels.
    ///
    /// Pairs with labels outside {0, 1} are ignored.
    pub fn update(&mut self, predictions: &[i64], labels: &[i64]) {
        assert_eq!(
            predictions.len(),
            labels.len(),
            "predictions and labels must have same length"
        );
        for (&pred, &label) in predictions.iter().zip(labels) {
            match (pred, label) {
                (1, 1) => self.tp += 1,
                (1, 0) => self.fp += 1,
                (0, 0) => self.tn += 1,
                (0, 1) => self.fn_count += 1,
                _ => {}
            }
        }
    }

    /// Number of counted pairs.
    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_count
    }

    pub fn finish(self) -> ValidationMetrics {
        let Self {
            tp,
            fp,
            tn,
            fn_count,
        } = self;
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_count);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        ValidationMetrics {
            accuracy: ratio(tp + tn, self.total()),
            precision,
            recall,
            f1,
            fpr: ratio(fp, fp + tn),
            tp,
            fp,
            tn,
            fn_count,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Compute validation metrics from a single set of predictions.
pub fn compute_validation_metrics(predictions: &[i64], labels: &[i64]) -> ValidationMetrics {
    let mut acc = MetricsAccumulator::default();
    acc.update(predictions, labels);
    acc.finish()
}

impl std::fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc={:.4} prec={:.4} rec={:.4} f1={:.4} fpr={:.4} (tp={} fp={} tn={} fn={})",
            self.accuracy,
            self.precision,
            self.recall,
            self.f1,
            self.fpr,
            self.tp,
            self.fp,
            self.tn,
            self.fn_count,
        )
    }
}
