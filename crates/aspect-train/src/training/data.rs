//! Example transformation, shuffling, batching and padding for aspect training.
//!
//! A CSV line becomes an [`Example`] (token ids plus raw label), examples with
//! labels other than -1/1 are dropped, and the survivors are remapped to a
//! binary label. [`BatchPipeline`] then shuffles, repeats, batches and pads them.

use aspect_core::{
    require_file, AspectColumn, AspectError, AspectRecord, Params, RecordParser, Result,
    VocabIndex,
};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// Padding id appended to short sequences within a batch.
pub const PAD_ID: u32 = 0;

/// One training example: truncated token ids and a label.
///
/// Before [`remap_label`] the label is the raw column value; after it, 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub ids: Vec<u32>,
    pub label: i64,
}

/// Build the example for `target` from a decoded record.
///
/// Keeps the first `max_len` tokens and maps each through the vocabulary.
///
/// # Errors
///
/// Fails only if a token cannot be looked up (no OOV buckets configured).
pub fn transform(
    record: &AspectRecord,
    target: AspectColumn,
    vocab: &VocabIndex,
    max_len: usize,
) -> Result<Example> {
    let ids = record
        .tokens
        .iter()
        .take(max_len)
        .map(|token| vocab.lookup(token))
        .collect::<Result<Vec<u32>>>()?;
    Ok(Example {
        ids,
        label: record.label(target),
    })
}

/// Whether the example carries a usable binary sentiment (-1 or 1).
pub fn keep_binary_label(example: &Example) -> bool {
    example.label == -1 || example.label == 1
}

/// Map label 1 to 1 and everything else to 0.
pub fn remap_label(mut example: Example) -> Example {
    example.label = i64::from(example.label == 1);
    example
}

// ---------------------------------------------------------------------------
// Example sources
// ---------------------------------------------------------------------------

/// Boxed stream of examples produced by one pass over a source.
pub type ExampleIter = Box<dyn Iterator<Item = Result<Example>> + Send>;

/// A restartable origin of examples.
pub trait ExampleSource: Send + Sync {
    /// Begin a fresh pass over the examples.
    fn open(&self) -> Result<ExampleIter>;

    /// Short description used in logs and errors.
    fn describe(&self) -> String;
}

impl ExampleSource for Vec<Example> {
    fn open(&self) -> Result<ExampleIter> {
        Ok(Box::new(self.clone().into_iter().map(Ok)))
    }

    fn describe(&self) -> String {
        format!("in-memory ({} examples)", self.len())
    }
}

/// Examples for one target read line by line from a review CSV.
///
/// The header line is skipped; every other line must match the schema.
/// Filtering and label remapping are applied, so the stream yields only
/// binary-labelled examples.
#[derive(Debug, Clone)]
pub struct CsvExampleSource {
    path: PathBuf,
    vocab: Arc<VocabIndex>,
    target: AspectColumn,
    max_len: usize,
}

impl CsvExampleSource {
    pub fn new(
        path: impl Into<PathBuf>,
        vocab: Arc<VocabIndex>,
        target: AspectColumn,
        max_len: usize,
    ) -> Self {
        Self {
            path: path.into(),
            vocab,
            target,
            max_len,
        }
    }
}

impl ExampleSource for CsvExampleSource {
    fn open(&self) -> Result<ExampleIter> {
        require_file(&self.path)?;
        let file = std::fs::File::open(&self.path)?;
        let vocab = Arc::clone(&self.vocab);
        let (target, max_len) = (self.target, self.max_len);

        let examples = BufReader::new(file)
            .lines()
            .enumerate()
            .skip(1)
            .map(move |(i, line)| {
                let record = RecordParser::parse_at(&line?, i + 1)?;
                transform(&record, target, &vocab, max_len)
            })
            .filter(|example| example.as_ref().map_or(true, keep_binary_label))
            .map(|example| example.map(remap_label));
        Ok(Box::new(examples))
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.path.display(), self.target)
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// A group of examples with ids right-padded to the longest sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Padded id rows; every row has length [`Batch::width`].
    pub ids: Vec<Vec<u32>>,
    /// Unpadded length of each row.
    pub lengths: Vec<usize>,
    pub labels: Vec<i64>,
}

impl Batch {
    /// Pad `examples` with [`PAD_ID`] to the longest sequence among them.
    pub fn from_examples(examples: Vec<Example>) -> Self {
        let width = examples.iter().map(|e| e.ids.len()).max().unwrap_or(0);
        let mut ids = Vec::with_capacity(examples.len());
        let mut lengths = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        for Example { ids: mut row, label } in examples {
            lengths.push(row.len());
            row.resize(width, PAD_ID);
            ids.push(row);
            labels.push(label);
        }
        Self {
            ids,
            lengths,
            labels,
        }
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Padded sequence length.
    pub fn width(&self) -> usize {
        self.ids.first().map_or(0, Vec::len)
    }

    /// Row-major ids, `len() * width()` long.
    pub fn flat_ids(&self) -> Vec<u32> {
        self.ids.iter().flatten().copied().collect()
    }

    /// Row-major 1.0/0.0 mask marking real (non-padding) positions.
    pub fn mask(&self) -> Vec<f32> {
        let width = self.width();
        self.lengths
            .iter()
            .flat_map(|&len| (0..width).map(move |pos| if pos < len { 1.0 } else { 0.0 }))
            .collect()
    }
}

/// Shuffle, repeat, batch and prefetch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Bounded shuffle buffer; 0 keeps stream order.
    pub shuffle_buffer_size: usize,
    pub batch_size: usize,
    /// Reopen the source at the end of every pass until a pass comes back empty.
    pub repeat: bool,
    /// Build the next batch on a background thread.
    pub prefetch: bool,
    /// Base seed; pass `n` shuffles with `seed + n`.
    pub seed: u64,
}

impl PipelineConfig {
    /// Prefetched input for training; shuffles and repeats only with a non-empty shuffle buffer.
    pub fn training(params: &Params) -> Self {
        Self {
            shuffle_buffer_size: params.shuffle_buffer_size,
            batch_size: params.batch_size,
            repeat: params.shuffle_buffer_size > 0,
            prefetch: true,
            seed: params.seed,
        }
    }

    /// Single ordered pass for evaluation.
    pub fn evaluation(params: &Params) -> Self {
        Self {
            shuffle_buffer_size: 0,
            batch_size: params.batch_size,
            repeat: false,
            prefetch: true,
            seed: params.seed,
        }
    }
}

/// Turns an [`ExampleSource`] into a lazy stream of padded batches.
pub struct BatchPipeline {
    source: Arc<dyn ExampleSource>,
    config: PipelineConfig,
}

impl BatchPipeline {
    pub fn new(source: Arc<dyn ExampleSource>, config: PipelineConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a new stream of batches from the beginning of the source.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is zero, the source cannot be opened, or
    /// the prefetch thread cannot be spawned.
    pub fn batches(&self) -> Result<Batches> {
        if self.config.batch_size == 0 {
            return Err(AspectError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        let batcher = Batcher {
            stream: ExampleStream::new(Arc::clone(&self.source), self.config)?,
            batch_size: self.config.batch_size,
        };
        if !self.config.prefetch {
            return Ok(Batches::Direct(batcher));
        }

        // Rendezvous channel: the worker holds at most one finished batch.
        let (tx, rx) = mpsc::sync_channel(0);
        std::thread::Builder::new()
            .name("batch-prefetch".to_string())
            .spawn(move || {
                for batch in batcher {
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Batches::Prefetched(rx))
    }
}

/// Iterator over padded batches, optionally fed by a prefetch thread.
pub enum Batches {
    Direct(Batcher),
    Prefetched(Receiver<Result<Batch>>),
}

impl Iterator for Batches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Direct(batcher) => batcher.next(),
            Self::Prefetched(rx) => rx.recv().ok(),
        }
    }
}

/// Groups consecutive examples into padded batches.
pub struct Batcher {
    stream: ExampleStream,
    batch_size: usize,
}

impl Iterator for Batcher {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut examples = Vec::with_capacity(self.batch_size);
        while examples.len() < self.batch_size {
            match self.stream.next() {
                Some(Ok(example)) => examples.push(example),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        if examples.is_empty() {
            None
        } else {
            Some(Ok(Batch::from_examples(examples)))
        }
    }
}

/// Example stream with optional bounded shuffling and indefinite repetition.
struct ExampleStream {
    source: Arc<dyn ExampleSource>,
    config: PipelineConfig,
    current: ExampleIter,
    buffer: Vec<Example>,
    rng: ChaCha8Rng,
    epoch: u64,
    emitted_this_epoch: usize,
    finished: bool,
}

impl ExampleStream {
    fn new(source: Arc<dyn ExampleSource>, config: PipelineConfig) -> Result<Self> {
        let current = source.open()?;
        Ok(Self {
            source,
            config,
            current,
            buffer: Vec::with_capacity(config.shuffle_buffer_size),
            rng: epoch_rng(config.seed, 0),
            epoch: 0,
            emitted_this_epoch: 0,
            finished: false,
        })
    }

    /// Next example of the current pass, drawn from the shuffle buffer when enabled.
    fn next_in_epoch(&mut self) -> Option<Result<Example>> {
        let capacity = self.config.shuffle_buffer_size;
        if capacity == 0 {
            return self.current.next();
        }
        while self.buffer.len() < capacity {
            match self.current.next() {
                Some(Ok(example)) => self.buffer.push(example),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        let slot = self.rng.gen_range(0..self.buffer.len());
        Some(Ok(self.buffer.swap_remove(slot)))
    }

    /// Begin the next pass; returns false when the pass just finished was empty.
    fn restart(&mut self) -> Result<bool> {
        if self.emitted_this_epoch == 0 {
            tracing::warn!(source = %self.source.describe(), "Input pass yielded no examples");
            return Ok(false);
        }
        self.epoch += 1;
        self.current = self.source.open()?;
        self.rng = epoch_rng(self.config.seed, self.epoch);
        self.emitted_this_epoch = 0;
        tracing::trace!(source = %self.source.describe(), epoch = self.epoch, "Restarted input pass");
        Ok(true)
    }
}

impl Iterator for ExampleStream {
    type Item = Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.next_in_epoch() {
                Some(Ok(example)) => {
                    self.emitted_this_epoch += 1;
                    return Some(Ok(example));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None if !self.config.repeat => self.finished = true,
                None => match self.restart() {
                    Ok(true) => {}
                    Ok(false) => self.finished = true,
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                },
            }
        }
        None
    }
}

fn epoch_rng(seed: u64, epoch: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn example(len: usize, label: i64) -> Example {
        Example {
            ids: (1..=len as u32).collect(),
            label,
        }
    }

    fn config(shuffle: usize, batch: usize, repeat: bool, prefetch: bool) -> PipelineConfig {
        PipelineConfig {
            shuffle_buffer_size: shuffle,
            batch_size: batch,
            repeat,
            prefetch,
            seed: 7,
        }
    }

    fn pipeline(examples: Vec<Example>, cfg: PipelineConfig) -> BatchPipeline {
        BatchPipeline::new(Arc::new(examples), cfg)
    }

    fn record(tokens: &[&str], label: i64) -> AspectRecord {
        AspectRecord {
            content: String::new(),
            id: 1,
            aspects: [label; aspect_core::ASPECT_COUNT],
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_transform_truncates_from_start() {
        let vocab = VocabIndex::from_tokens(["a", "b", "c", "d", "e"], 1).unwrap();
        let rec = record(&["a", "b", "c", "d", "e"], 1);
        let ex = transform(&rec, AspectColumn::DishTaste, &vocab, 3).unwrap();
        assert_eq!(ex.ids, vec![0, 1, 2]);
        assert_eq!(ex.label, 1);
    }

    #[test]
    fn test_transform_short_sequence_unchanged() {
        let vocab = VocabIndex::from_tokens(["a", "b"], 1).unwrap();
        let rec = record(&["b", "a"], -1);
        let ex = transform(&rec, AspectColumn::DishTaste, &vocab, 10).unwrap();
        assert_eq!(ex.ids, vec![1, 0]);
        assert_eq!(ex.label, -1);
    }

    #[test]
    fn test_filter_keeps_only_plus_minus_one() {
        let labels = [-2, -1, 0, 1, -2];
        let kept: Vec<i64> = labels
            .iter()
            .map(|&l| example(1, l))
            .filter(keep_binary_label)
            .map(|e| e.label)
            .collect();
        assert_eq!(kept, vec![-1, 1]);
    }

    #[test]
    fn test_filter_drops_out_of_range() {
        assert!(!keep_binary_label(&example(1, 2)));
        assert!(!keep_binary_label(&example(1, -3)));
    }

    #[test]
    fn test_remap_law() {
        assert_eq!(remap_label(example(1, 1)).label, 1);
        assert_eq!(remap_label(example(1, -1)).label, 0);
    }

    #[test]
    fn test_padding_to_longest_in_batch() {
        let batch = Batch::from_examples(vec![example(3, 1), example(7, 0), example(5, 1)]);
        assert_eq!(batch.width(), 7);
        assert_eq!(batch.lengths, vec![3, 7, 5]);
        assert_eq!(batch.ids[0], vec![1, 2, 3, 0, 0, 0, 0]);
        assert_eq!(batch.ids[1], vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(batch.ids[2], vec![1, 2, 3, 4, 5, 0, 0]);
    }

    #[test]
    fn test_mask_marks_real_positions() {
        let batch = Batch::from_examples(vec![example(1, 1), example(3, 0)]);
        assert_eq!(batch.mask(), vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(batch.flat_ids(), vec![1, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_single_pass_keeps_order_and_short_tail() {
        let examples: Vec<Example> = (1..=5).map(|n| example(n, 1)).collect();
        let batches: Vec<Batch> = pipeline(examples, config(0, 2, false, false))
            .batches()
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[0].lengths, vec![1, 2]);
        assert_eq!(batches[2].lengths, vec![5]);
    }

    #[test]
    fn test_prefetch_preserves_contents_and_order() {
        let examples: Vec<Example> = (1..=9).map(|n| example(n % 4, n as i64 % 2)).collect();
        let direct: Vec<Batch> = pipeline(examples.clone(), config(0, 4, false, false))
            .batches()
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let prefetched: Vec<Batch> = pipeline(examples, config(0, 4, false, true))
            .batches()
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(direct, prefetched);
    }

    #[test]
    fn test_repeat_runs_past_one_pass() {
        let examples: Vec<Example> = (1..=3).map(|n| example(n, 1)).collect();
        let batches: Vec<Batch> = pipeline(examples, config(0, 2, true, true))
            .batches()
            .unwrap()
            .take(5)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|b| b.len() == 2));
        // Passes are concatenated: 1,2 | 3,1 | 2,3 | ...
        assert_eq!(batches[1].lengths, vec![3, 1]);
    }

    #[test]
    fn test_shuffle_is_a_permutation_per_pass() {
        let examples: Vec<Example> = (1..=20).map(|n| example(n, 1)).collect();
        let batches: Vec<Batch> = pipeline(examples, config(8, 5, true, false))
            .batches()
            .unwrap()
            .take(4)
            .collect::<Result<_>>()
            .unwrap();
        let mut lengths: Vec<usize> = batches.iter().flat_map(|b| b.lengths.clone()).collect();
        assert_ne!(lengths, (1..=20).collect::<Vec<_>>());
        lengths.sort_unstable();
        assert_eq!(lengths, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_is_deterministic_for_seed() {
        let examples: Vec<Example> = (1..=12).map(|n| example(n, 1)).collect();
        let run = || -> Vec<Batch> {
            pipeline(examples.clone(), config(4, 3, true, false))
                .batches()
                .unwrap()
                .take(6)
                .collect::<Result<_>>()
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_repeat_on_empty_source_ends_stream() {
        let mut batches = pipeline(Vec::new(), config(4, 2, true, false))
            .batches()
            .unwrap();
        assert!(batches.next().is_none());
        assert!(batches.next().is_none());
    }

    #[test]
    fn test_training_config_repeats_only_with_shuffle_buffer() {
        let mut params = Params {
            vocab_size: 4,
            sentence_max_len: 8,
            batch_size: 2,
            shuffle_buffer_size: 16,
            train_steps: 10,
            num_oov_buckets: 1,
            pad_word: "<pad>".to_string(),
            learning_rate: 0.1,
            weight_decay: 0.0,
            seed: 1,
        };
        assert!(PipelineConfig::training(&params).repeat);

        params.shuffle_buffer_size = 0;
        let single_pass = PipelineConfig::training(&params);
        assert!(!single_pass.repeat);
        let examples: Vec<Example> = (1..=3).map(|n| example(n, 1)).collect();
        let total: usize = pipeline(examples, single_pass)
            .batches()
            .unwrap()
            .map(|b| b.unwrap().len())
            .sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = pipeline(vec![example(1, 1)], config(0, 0, false, false)).batches();
        assert!(matches!(result, Err(AspectError::Config(_))));
    }

    #[test]
    fn test_csv_source_filters_and_remaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.csv");
        let mut body = aspect_core::SCHEMA_FIELDS.join(",");
        for label in [-2, -1, 0, 1, -2] {
            let mut fields = vec!["c".to_string(), "1".to_string()];
            fields.extend(std::iter::repeat(label.to_string()).take(aspect_core::ASPECT_COUNT));
            fields.push("a b".to_string());
            body.push('\n');
            body.push_str(&fields.join(","));
        }
        std::fs::write(&path, body).unwrap();

        let vocab = Arc::new(VocabIndex::from_tokens(["a", "b"], 1).unwrap());
        let source = CsvExampleSource::new(&path, vocab, AspectColumn::ServiceWaitTime, 10);
        let labels: Vec<i64> = source
            .open()
            .unwrap()
            .map(|e| e.unwrap().label)
            .collect();
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn test_csv_source_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valid.csv");
        std::fs::write(&path, "header\nnot,enough,fields\n").unwrap();
        let vocab = Arc::new(VocabIndex::from_tokens(["a"], 1).unwrap());
        let source = CsvExampleSource::new(&path, vocab, AspectColumn::DishLook, 5);
        let first = source.open().unwrap().next().unwrap();
        match first {
            Err(AspectError::Schema { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected schema error, got {other:?}"),
        }
    }
}
