//! Substrate trait definitions.

use crate::error::SubstrateResult;
use std::collections::BTreeMap;

/// A snapshot of the substrate at a point in time.
///
/// Reads performed under a snapshot observe exactly the writes committed
/// before the snapshot was taken, regardless of concurrent commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot {
    sequence: u64,
}

impl Snapshot {
    /// Creates a snapshot at the given commit sequence.
    #[must_use]
    pub const fn at(sequence: u64) -> Self {
        Self { sequence }
    }

    /// Returns the commit sequence this snapshot observes.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.sequence
    }
}

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Sets `key` to `value`.
    Put {
        /// The key to write.
        key: Vec<u8>,
        /// The value to store.
        value: Vec<u8>,
    },
    /// Removes `key`.
    Delete {
        /// The key to remove.
        key: Vec<u8>,
    },
}

/// A set of writes applied atomically.
///
/// Batches are also the transaction overlay for read-own-writes cursors:
/// [`WriteBatch::overlay`] exposes the net effect of the batch keyed by
/// byte string, last write per key winning.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stages a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Returns the staged operations in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if no operations are staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discards all staged operations.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Drops every operation staged after the first `len`, rolling the
    /// batch back to an earlier mark.
    pub fn truncate(&mut self, len: usize) {
        self.ops.truncate(len);
    }

    /// Returns the pending effect of this batch on `key`.
    ///
    /// `Some(Some(value))` is a staged put, `Some(None)` a staged
    /// delete, `None` means the batch does not touch the key.
    #[must_use]
    pub fn pending(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops.iter().rev().find_map(|op| match op {
            BatchOp::Put { key: k, value } if k == key => Some(Some(value.as_slice())),
            BatchOp::Delete { key: k } if k == key => Some(None),
            _ => None,
        })
    }

    /// Returns the net effect of the batch as an ordered map.
    ///
    /// `Some(value)` is a pending put, `None` a pending delete. Later
    /// operations on the same key shadow earlier ones.
    #[must_use]
    pub fn overlay(&self) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        let mut map = BTreeMap::new();
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), Some(value.clone()));
                }
                BatchOp::Delete { key } => {
                    map.insert(key.clone(), None);
                }
            }
        }
        map
    }
}

/// Options controlling a cursor's view of the substrate.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Snapshot to read under. `None` reads the latest committed state.
    pub snapshot: Option<Snapshot>,
    /// Inclusive lower bound enforced natively by the substrate.
    pub lower_bound: Option<Vec<u8>>,
    /// Exclusive upper bound enforced natively by the substrate.
    pub upper_bound: Option<Vec<u8>>,
    /// Uncommitted writes merged over the snapshot view.
    ///
    /// When an overlay is present the substrate cannot honor native
    /// bounds; callers must bounds-check every step themselves.
    pub overlay: Option<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl ReadOptions {
    /// Creates read options under the given snapshot.
    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::default()
        }
    }

    /// Sets the native inclusive lower bound.
    #[must_use]
    pub fn lower_bound(mut self, bound: Vec<u8>) -> Self {
        self.lower_bound = Some(bound);
        self
    }

    /// Sets the native exclusive upper bound.
    #[must_use]
    pub fn upper_bound(mut self, bound: Vec<u8>) -> Self {
        self.upper_bound = Some(bound);
        self
    }

    /// Merges a transaction's uncommitted writes over the view.
    #[must_use]
    pub fn overlay(mut self, batch: &WriteBatch) -> Self {
        self.overlay = Some(batch.overlay());
        self
    }
}

/// A bidirectional cursor over an ordered key range.
///
/// Cursors are exclusively owned by their creator and release their
/// resources deterministically on drop. They are not `Sync`; one cursor
/// serves exactly one iterator.
pub trait Cursor {
    /// Positions at the first key `>= key`.
    fn seek(&mut self, key: &[u8]);

    /// Positions at the last key `<= key`.
    fn seek_for_prev(&mut self, key: &[u8]);

    /// Advances to the next key in ascending order.
    fn next(&mut self);

    /// Moves to the previous key in ascending order.
    fn prev(&mut self);

    /// Returns true if the cursor is positioned on an entry.
    fn valid(&self) -> bool;

    /// Returns the current key. Only meaningful while [`Cursor::valid`].
    fn key(&self) -> &[u8];

    /// Returns the current value. Only meaningful while [`Cursor::valid`].
    fn value(&self) -> &[u8];

    /// Reports any corruption observed while iterating.
    ///
    /// An invalid cursor with a non-ok status means the scan failed
    /// rather than reached the end of its range.
    fn status(&self) -> SubstrateResult<()>;
}

/// An ordered byte-keyed storage substrate.
///
/// Substrates are **opaque byte stores** with a total order on keys.
/// DocDex owns all key layout interpretation; substrates do not understand
/// index entries or value encodings.
///
/// # Invariants
///
/// - `write` applies all operations of a batch atomically
/// - `get` under a snapshot observes exactly the state at that snapshot
/// - cursors iterate in byte-lexicographic key order
/// - implementations must be `Send + Sync` for concurrent transactions
pub trait Substrate: Send + Sync {
    /// Reads the value stored at `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is stale or the stored data is
    /// corrupted.
    fn get(&self, key: &[u8], snapshot: Option<Snapshot>) -> SubstrateResult<Option<Vec<u8>>>;

    /// Applies a batch of writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate is closed or the write fails.
    fn write(&self, batch: WriteBatch) -> SubstrateResult<()>;

    /// Takes a snapshot of the current committed state.
    fn snapshot(&self) -> Snapshot;

    /// Opens a cursor with the given read options.
    ///
    /// # Errors
    ///
    /// Returns an error if the substrate is closed.
    fn cursor(&self, opts: ReadOptions) -> SubstrateResult<Box<dyn Cursor>>;
}
