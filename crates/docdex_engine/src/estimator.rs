//! Cardinality estimation for non-unique indexes.

use crate::error::{EngineError, EngineResult};
use docdex_codec::CodecError;
use std::collections::HashMap;

/// Tracks the cardinality of a non-unique index.
///
/// The estimator is fed one hash per maintenance operation and answers
/// selectivity queries for the planner. It is owned exclusively by its
/// index: the commit path updates it, and a structural rebuild takes an
/// exclusive section. The counters are serializable so recovery can
/// skip the rebuild when they are not stale.
///
/// This implementation counts exactly. The interface is the contract;
/// a probabilistic structure can replace the internals without touching
/// callers.
#[derive(Debug, Default)]
pub struct CardinalityEstimator {
    counts: HashMap<u64, u32>,
    total: u64,
}

impl CardinalityEstimator {
    /// Creates an empty estimator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one inserted value hash.
    pub fn insert(&mut self, hash: u64) {
        *self.counts.entry(hash).or_insert(0) += 1;
        self.total += 1;
    }

    /// Records one removed value hash.
    ///
    /// Returns false if the hash was not tracked; the counters are left
    /// unchanged in that case.
    pub fn remove(&mut self, hash: u64) -> bool {
        match self.counts.get_mut(&hash) {
            Some(count) if *count > 1 => {
                *count -= 1;
                self.total -= 1;
                true
            }
            Some(_) => {
                self.counts.remove(&hash);
                self.total -= 1;
                true
            }
            None => false,
        }
    }

    /// Selectivity estimate in `(0, 1]`.
    ///
    /// The ratio of distinct values to total entries; an empty index
    /// estimates 1.0 (every lookup would be maximally selective).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.counts.len() as f64 / self.total as f64).max(f64::MIN_POSITIVE)
    }

    /// Total number of tracked entries.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct tracked hashes.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Drops all counters, ahead of a rebuild.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.total = 0;
    }

    /// Serializes the counters for persistence.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 12 * self.counts.len());
        out.extend_from_slice(&(self.counts.len() as u32).to_be_bytes());
        let mut entries: Vec<_> = self.counts.iter().collect();
        entries.sort_unstable_by_key(|(hash, _)| **hash);
        for (hash, count) in entries {
            out.extend_from_slice(&hash.to_be_bytes());
            out.extend_from_slice(&count.to_be_bytes());
        }
        out
    }

    /// Restores an estimator from serialized counters.
    ///
    /// # Errors
    ///
    /// Returns an error on truncated input.
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let truncated = |offset: usize, expected: usize| {
            EngineError::from(CodecError::Truncated { offset, expected })
        };

        let header = bytes.get(..4).ok_or_else(|| truncated(0, 4))?;
        let mut buf4 = [0u8; 4];
        buf4.copy_from_slice(header);
        let count = u32::from_be_bytes(buf4) as usize;

        let mut estimator = Self::new();
        let mut offset = 4;
        for _ in 0..count {
            let slice = bytes
                .get(offset..offset + 12)
                .ok_or_else(|| truncated(offset, 12))?;
            let mut buf8 = [0u8; 8];
            buf8.copy_from_slice(&slice[..8]);
            buf4.copy_from_slice(&slice[8..]);
            let per_hash = u32::from_be_bytes(buf4);
            // A zero counter is never written; accepting one would let a
            // later remove drive `total` below zero.
            if per_hash == 0 {
                return Err(CodecError::encoding_failure(
                    "estimator counter must be positive",
                )
                .into());
            }
            estimator
                .counts
                .insert(u64::from_be_bytes(buf8), per_hash);
            estimator.total += u64::from(per_hash);
            offset += 12;
        }
        Ok(estimator)
    }
}
