//! In-memory substrate with snapshot isolation.

use crate::error::{SubstrateError, SubstrateResult};
use crate::substrate::{BatchOp, Cursor, ReadOptions, Snapshot, Substrate, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// One committed version of a key. `None` is a tombstone.
#[derive(Debug, Clone)]
struct Version {
    sequence: u64,
    value: Option<Vec<u8>>,
}

/// An in-memory ordered substrate.
///
/// Keys map to version chains ordered by commit sequence; a snapshot at
/// sequence `s` observes the newest version with `sequence <= s`. Suitable
/// for unit tests, integration tests, and ephemeral indexes.
///
/// # Thread Safety
///
/// The substrate is thread-safe. Cursors materialize their visible range
/// at creation, so they never block concurrent writers.
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<Version>>>,
    sequence: RwLock<u64>,
    closed: AtomicBool,
}

impl MemorySubstrate {
    /// Creates a new empty substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the substrate closed; all further operations fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns the number of live (non-tombstone) keys at the latest state.
    #[must_use]
    pub fn live_len(&self) -> usize {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|versions| matches!(versions.last(), Some(v) if v.value.is_some()))
            .count()
    }

    fn check_open(&self) -> SubstrateResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubstrateError::Closed);
        }
        Ok(())
    }

    fn visible<'a>(versions: &'a [Version], snapshot: Option<Snapshot>) -> Option<&'a Vec<u8>> {
        let limit = snapshot.map_or(u64::MAX, Snapshot::sequence);
        versions
            .iter()
            .rev()
            .find(|v| v.sequence <= limit)
            .and_then(|v| v.value.as_ref())
    }
}

impl Substrate for MemorySubstrate {
    fn get(&self, key: &[u8], snapshot: Option<Snapshot>) -> SubstrateResult<Option<Vec<u8>>> {
        self.check_open()?;
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .and_then(|versions| Self::visible(versions, snapshot))
            .cloned())
    }

    fn write(&self, batch: WriteBatch) -> SubstrateResult<()> {
        self.check_open()?;
        if batch.is_empty() {
            return Ok(());
        }

        // Sequence and entry locks are taken together so concurrent
        // batches commit with distinct sequences.
        let mut sequence = self.sequence.write();
        let mut entries = self.entries.write();
        *sequence += 1;
        let committed = *sequence;

        for op in batch.ops() {
            let (key, value) = match op {
                BatchOp::Put { key, value } => (key, Some(value.clone())),
                BatchOp::Delete { key } => (key, None),
            };
            entries.entry(key.clone()).or_default().push(Version {
                sequence: committed,
                value,
            });
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::at(*self.sequence.read())
    }

    fn cursor(&self, opts: ReadOptions) -> SubstrateResult<Box<dyn Cursor>> {
        self.check_open()?;

        let entries = self.entries.read();
        let lower = opts
            .lower_bound
            .as_ref()
            .map_or(Bound::Unbounded, |b| Bound::Included(b.clone()));
        let upper = opts
            .upper_bound
            .as_ref()
            .map_or(Bound::Unbounded, |b| Bound::Excluded(b.clone()));

        let mut view: BTreeMap<Vec<u8>, Vec<u8>> = entries
            .range::<Vec<u8>, _>((lower, upper))
            .filter_map(|(key, versions)| {
                Self::visible(versions, opts.snapshot).map(|value| (key.clone(), value.clone()))
            })
            .collect();

        // A merged view cannot rely on native bounds; the overlay is
        // clipped here but callers still self-check per step.
        if let Some(overlay) = &opts.overlay {
            for (key, pending) in overlay {
                if let Some(bound) = &opts.lower_bound {
                    if key < bound {
                        continue;
                    }
                }
                if let Some(bound) = &opts.upper_bound {
                    if key >= bound {
                        continue;
                    }
                }
                match pending {
                    Some(value) => {
                        view.insert(key.clone(), value.clone());
                    }
                    None => {
                        view.remove(key);
                    }
                }
            }
        }

        let pairs: Vec<(Vec<u8>, Vec<u8>)> = view.into_iter().collect();
        Ok(Box::new(MemoryCursor {
            pairs,
            position: None,
        }))
    }
}

/// Cursor over a materialized snapshot view.
struct MemoryCursor {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    /// Index into `pairs`, or `None` when unpositioned/exhausted.
    position: Option<usize>,
}

impl Cursor for MemoryCursor {
    fn seek(&mut self, key: &[u8]) {
        let index = self.pairs.partition_point(|(k, _)| k.as_slice() < key);
        self.position = (index < self.pairs.len()).then_some(index);
    }

    fn seek_for_prev(&mut self, key: &[u8]) {
        let index = self.pairs.partition_point(|(k, _)| k.as_slice() <= key);
        self.position = index.checked_sub(1);
    }

    fn next(&mut self) {
        self.position = match self.position {
            Some(i) if i + 1 < self.pairs.len() => Some(i + 1),
            _ => None,
        };
    }

    fn prev(&mut self) {
        self.position = self.position.and_then(|i| i.checked_sub(1));
    }

    fn valid(&self) -> bool {
        self.position.is_some()
    }

    fn key(&self) -> &[u8] {
        self.position
            .map(|i| self.pairs[i].0.as_slice())
            .unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        self.position
            .map(|i| self.pairs[i].1.as_slice())
            .unwrap_or_default()
    }

    fn status(&self) -> SubstrateResult<()> {
        // The materialized view cannot observe corruption after creation.
        Ok(())
    }
}
