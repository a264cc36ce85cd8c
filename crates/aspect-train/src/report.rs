//! Ranked per-token weight reports.
//!
//! Output format: one `token\tweight` line per vocabulary id, highest weight first.

use aspect_core::{Result, VocabIndex};
use std::io::{BufWriter, Write};
use std::path::Path;

/// File name of the weight report inside a target's model directory.
pub const WEIGHTS_FILE: &str = "word_weights.txt";

/// Pair weight `i` with `vocab.reverse_lookup(i)` and sort by weight, descending.
///
/// The sort is stable, so equal weights keep ascending id order. Every id
/// produces one entry; OOV ids each appear as `UNK`.
pub fn rank_weights(weights: &[f32], vocab: &VocabIndex) -> Vec<(String, f32)> {
    let mut ranked: Vec<(String, f32)> = weights
        .iter()
        .enumerate()
        .map(|(id, &w)| (vocab.reverse_lookup(id).to_string(), w))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// Write `pairs` to `path`, replacing any existing file.
///
/// # Errors
///
/// Returns [`aspect_core::AspectError::Io`] if the file cannot be created or written.
pub fn write_weights(pairs: &[(String, f32)], path: &Path) -> Result<()> {
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    for (token, weight) in pairs {
        writeln!(out, "{token}\t{weight}")?;
    }
    out.flush()?;
    tracing::info!(path = %path.display(), entries = pairs.len(), "Wrote word weights");
    Ok(())
}
