//! Token ↔ id index built from a one-token-per-line vocabulary file.
//!
//! Ids `0..len()` are the file's line numbers. Tokens missing from the file
//! hash into one of `num_oov_buckets` extra ids appended after the real
//! vocabulary, so every token has an id in `0..total_size()`.

use crate::{require_file, AspectError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Token returned by [`VocabIndex::reverse_lookup`] for ids outside the real vocabulary.
pub const UNKNOWN_TOKEN: &str = "UNK";

/// Immutable vocabulary index, built once per run and shared by reference.
#[derive(Debug, Clone)]
pub struct VocabIndex {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
    num_oov_buckets: u32,
}

impl VocabIndex {
    /// Load the vocabulary file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AspectError::MissingFile`] if the file does not exist, and
    /// [`AspectError::Vocab`] if a token appears twice.
    pub fn from_file(path: &Path, num_oov_buckets: u32) -> Result<Self> {
        require_file(path)?;
        let file = std::fs::File::open(path)?;
        let mut tokens = Vec::new();
        for line in BufReader::new(file).lines() {
            tokens.push(line?.trim_end().to_string());
        }
        let index = Self::from_tokens(tokens, num_oov_buckets)?;
        tracing::info!(
            path = %path.display(),
            vocab_size = index.len(),
            num_oov_buckets,
            "Loaded vocabulary"
        );
        Ok(index)
    }

    /// Build an index from tokens in id order.
    ///
    /// # Errors
    ///
    /// Returns [`AspectError::Vocab`] on duplicate tokens or if the vocabulary
    /// does not fit in `u32` ids.
    pub fn from_tokens<I, S>(tokens: I, num_oov_buckets: u32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let total = tokens.len() as u64 + u64::from(num_oov_buckets);
        if total > u64::from(u32::MAX) {
            return Err(AspectError::Vocab(format!(
                "vocabulary of {total} ids does not fit in u32"
            )));
        }

        let mut ids = HashMap::with_capacity(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            if let Some(previous) = ids.insert(token.clone(), id as u32) {
                return Err(AspectError::Vocab(format!(
                    "duplicate token {token:?} at lines {} and {}",
                    previous + 1,
                    id + 1
                )));
            }
        }

        Ok(Self {
            tokens,
            ids,
            num_oov_buckets,
        })
    }

    /// Id for `token`: its line index, or a hashed out-of-vocabulary bucket.
    ///
    /// # Errors
    ///
    /// Returns [`AspectError::Vocab`] for an unknown token when there are no OOV buckets.
    pub fn lookup(&self, token: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(token) {
            return Ok(id);
        }
        if self.num_oov_buckets == 0 {
            return Err(AspectError::Vocab(format!(
                "token {token:?} is not in the vocabulary and no OOV buckets are configured"
            )));
        }
        let bucket = fingerprint(token) % u64::from(self.num_oov_buckets);
        Ok(self.tokens.len() as u32 + bucket as u32)
    }

    /// Token for `id`, or [`UNKNOWN_TOKEN`] for OOV and out-of-range ids.
    #[must_use]
    pub fn reverse_lookup(&self, id: usize) -> &str {
        self.tokens
            .get(id)
            .map_or(UNKNOWN_TOKEN, String::as_str)
    }

    /// Number of real vocabulary tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the vocabulary file had no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of out-of-vocabulary buckets.
    #[must_use]
    pub fn num_oov_buckets(&self) -> u32 {
        self.num_oov_buckets
    }

    /// Real vocabulary plus OOV buckets: one past the largest id `lookup` can return.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.tokens.len() + self.num_oov_buckets as usize
    }
}

/// Stable 64-bit fingerprint: the first eight bytes of SHA-256, big-endian.
fn fingerprint(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
