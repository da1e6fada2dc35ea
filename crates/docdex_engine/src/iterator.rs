//! The index iterator family.
//!
//! Four cursor variants share one interface:
//!
//! - [`EqualityIterator`] resolves one lookup value at a time, cache
//!   first, falling back to a bounded substrate scan that refills the
//!   cache (negative results included).
//! - [`UniquePointIterator`] answers an all-equality lookup on a unique
//!   index with a single point read.
//! - [`RangeScanIterator`] walks one or more two-sided ranges, with the
//!   traversal direction and bounds-checking mode fixed at compile time.
//! - [`InExpansionIterator`] replays a batch of equality lookups by
//!   re-arming a wrapped [`EqualityIterator`] per value.
//!
//! The variant is selected once at construction by [`new_cursor`]; no
//! per-step branching on direction or checking mode remains inside the
//! scan loops. Iterators are exclusively owned by one transaction and
//! release their substrate cursors on drop or [`IndexCursor::reset`].

use crate::cache::{lookup_cache_key, open_payload, LookupCache};
use crate::compiler::{CompiledCondition, CompiledRange, RangeFormat};
use crate::error::EngineResult;
use crate::postings::{decode_postings, encode_postings, Posting};
use crate::types::{DocumentId, ScanDirection};
use docdex_codec::{
    decode_doc_id, decode_entry_value, decode_value_tuple, encode_lookup, entry_prefix,
    IndexKeyKind, KeyBounds, Value,
};
use docdex_substrate::{Cursor, ReadOptions, Snapshot, Substrate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a cursor needs to read one index.
#[derive(Clone)]
pub struct ScanContext {
    /// The storage substrate holding the entries.
    pub substrate: Arc<dyn Substrate>,
    /// The lookup cache fronting the substrate.
    pub cache: Arc<LookupCache>,
    /// Physical key layout of the index.
    pub kind: IndexKeyKind,
    /// Identifier of the index being scanned.
    pub index_id: u64,
    /// Number of indexed fields.
    pub arity: usize,
    /// Snapshot the scan reads under.
    pub snapshot: Snapshot,
    /// The transaction's uncommitted writes, when it reads its own
    /// writes. Forces the bounds-checked scan variant and bypasses the
    /// shared cache.
    pub overlay: Option<Arc<BTreeMap<Vec<u8>, Option<Vec<u8>>>>>,
}

impl ScanContext {
    fn reads_own_writes(&self) -> bool {
        self.overlay.is_some()
    }

    /// Read options for a cursor relying on native bound enforcement.
    fn native_options(&self, bounds: &KeyBounds) -> ReadOptions {
        ReadOptions::with_snapshot(self.snapshot)
            .lower_bound(bounds.start().to_vec())
            .upper_bound(bounds.end().to_vec())
    }

    /// Read options for a self-checking cursor over the merged view.
    fn merged_options(&self) -> ReadOptions {
        let mut opts = ReadOptions::with_snapshot(self.snapshot);
        opts.overlay = self.overlay.as_deref().cloned();
        opts
    }
}

/// The shared cursor interface.
///
/// `next` and `next_covering` append at most `limit` results and report
/// whether more remain; callers cancel by not calling again.
pub trait IndexCursor {
    /// Appends up to `limit` document ids in scan order.
    ///
    /// # Errors
    ///
    /// Propagates substrate corruption; such a scan is not retried.
    fn next(&mut self, limit: usize, out: &mut Vec<DocumentId>) -> EngineResult<bool>;

    /// Appends up to `limit` covering hits in scan order.
    ///
    /// # Errors
    ///
    /// Propagates substrate corruption; such a scan is not retried.
    fn next_covering(&mut self, limit: usize, out: &mut Vec<Posting>) -> EngineResult<bool>;

    /// Re-targets this cursor at a new range without reallocating.
    ///
    /// Returns false if the variant cannot serve the range, in which
    /// case the cursor is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the new range's lookup value cannot be
    /// encoded.
    fn rearm(&mut self, range: &CompiledRange) -> EngineResult<bool>;

    /// Returns the cursor to its unseeked state, releasing any
    /// substrate cursor it holds.
    fn reset(&mut self);

    /// Discards up to `count` results; returns how many were skipped.
    ///
    /// # Errors
    ///
    /// Propagates substrate corruption.
    fn skip(&mut self, count: usize) -> EngineResult<usize>;
}

/// Decodes one substrate entry into a posting.
fn posting_from_entry(kind: IndexKeyKind, key: &[u8], value: &[u8]) -> EngineResult<Posting> {
    let tuple = decode_value_tuple(key)?;
    let (doc_id, stored) = match kind {
        IndexKeyKind::Unique => {
            let (id, stored) = decode_entry_value(kind, value)?;
            // decode_entry_value always yields an id for unique entries.
            (id.unwrap_or_default(), stored)
        }
        IndexKeyKind::NonUnique => {
            let (_, stored) = decode_entry_value(kind, value)?;
            (decode_doc_id(key)?, stored)
        }
    };
    Ok(Posting {
        doc_id: DocumentId::new(doc_id),
        tuple,
        stored,
    })
}

/// Runs one bounded scan to completion, accumulating postings in
/// ascending key order.
pub(crate) fn scan_bounds(ctx: &ScanContext, bounds: &KeyBounds) -> EngineResult<Vec<Posting>> {
    if bounds.is_empty() {
        return Ok(Vec::new());
    }
    let mut postings = Vec::new();
    if ctx.reads_own_writes() {
        let mut cursor = ctx.substrate.cursor(ctx.merged_options())?;
        cursor.seek(bounds.start());
        while cursor.valid() && bounds.contains(cursor.key()) {
            postings.push(posting_from_entry(ctx.kind, cursor.key(), cursor.value())?);
            cursor.next();
        }
        cursor.status()?;
    } else {
        let mut cursor = ctx.substrate.cursor(ctx.native_options(bounds))?;
        cursor.seek(bounds.start());
        while cursor.valid() {
            postings.push(posting_from_entry(ctx.kind, cursor.key(), cursor.value())?);
            cursor.next();
        }
        cursor.status()?;
    }
    Ok(postings)
}

// ---------------------------------------------------------------------
// Equality iterator
// ---------------------------------------------------------------------

enum BufferState {
    Unseeked,
    Replaying,
    Exhausted,
}

/// Cache-fronted iterator over one equality lookup value.
pub struct EqualityIterator {
    ctx: ScanContext,
    bounds: KeyBounds,
    cache_key: Vec<u8>,
    reverse: bool,
    buffer: Vec<Posting>,
    position: usize,
    state: BufferState,
}

impl EqualityIterator {
    /// Creates an iterator over one pure-equality range.
    ///
    /// # Errors
    ///
    /// Returns an error if the range carries no equality tuple or the
    /// tuple cannot be encoded.
    pub fn new(ctx: ScanContext, range: &CompiledRange, reverse: bool) -> EngineResult<Self> {
        let tuple = range.equality.as_deref().unwrap_or_default();
        let cache_key = lookup_cache_key(tuple)?;
        Ok(Self {
            ctx,
            bounds: range.bounds.clone(),
            cache_key,
            reverse,
            buffer: Vec::new(),
            position: 0,
            state: BufferState::Unseeked,
        })
    }

    /// Fills the replay buffer: cache first, substrate on a miss.
    fn seek(&mut self) -> EngineResult<()> {
        self.buffer.clear();
        self.position = 0;

        // Uncommitted writes must not be served from or written to the
        // shared cache.
        let use_cache = !self.ctx.reads_own_writes();

        if use_cache {
            if let Some(payload) = self.ctx.cache.find(&self.cache_key) {
                let raw = open_payload(&payload)?;
                self.buffer = decode_postings(&raw)?;
                if self.reverse {
                    self.buffer.reverse();
                }
                self.state = BufferState::Replaying;
                return Ok(());
            }
        }

        let postings = scan_bounds(&self.ctx, &self.bounds)?;
        if use_cache {
            // Empty results are cached too, as a negative marker.
            let serialized = encode_postings(&postings)?;
            self.ctx.cache.insert(&self.cache_key, &serialized);
        }
        self.buffer = postings;
        if self.reverse {
            self.buffer.reverse();
        }
        self.state = BufferState::Replaying;
        Ok(())
    }

    fn ensure_seeked(&mut self) -> EngineResult<()> {
        if matches!(self.state, BufferState::Unseeked) {
            self.seek()?;
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn drain(&mut self, limit: usize) -> std::ops::Range<usize> {
        let take = limit.min(self.remaining());
        let range = self.position..self.position + take;
        self.position += take;
        if self.remaining() == 0 {
            self.state = BufferState::Exhausted;
        }
        range
    }
}

impl IndexCursor for EqualityIterator {
    fn next(&mut self, limit: usize, out: &mut Vec<DocumentId>) -> EngineResult<bool> {
        self.ensure_seeked()?;
        let range = self.drain(limit);
        out.extend(self.buffer[range].iter().map(|p| p.doc_id));
        Ok(self.remaining() > 0)
    }

    fn next_covering(&mut self, limit: usize, out: &mut Vec<Posting>) -> EngineResult<bool> {
        self.ensure_seeked()?;
        let range = self.drain(limit);
        out.extend_from_slice(&self.buffer[range]);
        Ok(self.remaining() > 0)
    }

    fn rearm(&mut self, range: &CompiledRange) -> EngineResult<bool> {
        let Some(tuple) = range.equality.as_deref() else {
            return Ok(false);
        };
        self.cache_key = lookup_cache_key(tuple)?;
        self.bounds = range.bounds.clone();
        self.buffer.clear();
        self.position = 0;
        self.state = BufferState::Unseeked;
        Ok(true)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.position = 0;
        self.state = BufferState::Unseeked;
    }

    fn skip(&mut self, count: usize) -> EngineResult<usize> {
        self.ensure_seeked()?;
        let range = self.drain(count);
        Ok(range.len())
    }
}

// ---------------------------------------------------------------------
// Unique point iterator
// ---------------------------------------------------------------------

/// Single-result iterator for an all-equality lookup on a unique index.
pub struct UniquePointIterator {
    ctx: ScanContext,
    key: Vec<u8>,
    tuple: Vec<Value>,
    done: bool,
}

impl UniquePointIterator {
    /// Creates an iterator for one full equality tuple.
    ///
    /// # Errors
    ///
    /// Returns an error if the range carries no equality tuple or the
    /// tuple cannot be encoded.
    pub fn new(ctx: ScanContext, range: &CompiledRange) -> EngineResult<Self> {
        let tuple = range.equality.clone().unwrap_or_default();
        let key = Self::entry_key(&ctx, &tuple)?;
        Ok(Self {
            ctx,
            key,
            tuple,
            done: false,
        })
    }

    fn entry_key(ctx: &ScanContext, tuple: &[Value]) -> EngineResult<Vec<u8>> {
        let mut key = entry_prefix(ctx.kind, ctx.index_id).to_vec();
        key.extend_from_slice(&encode_lookup(tuple)?);
        Ok(key)
    }

    /// Performs the point read, honoring the transaction overlay.
    fn lookup(&self) -> EngineResult<Option<Posting>> {
        let stored_value = match self
            .ctx
            .overlay
            .as_deref()
            .and_then(|overlay| overlay.get(&self.key))
        {
            // Pending delete shadows the committed entry.
            Some(None) => return Ok(None),
            Some(Some(value)) => Some(value.clone()),
            None => self.ctx.substrate.get(&self.key, Some(self.ctx.snapshot))?,
        };
        let Some(value) = stored_value else {
            return Ok(None);
        };
        let (doc_id, stored) = decode_entry_value(self.ctx.kind, &value)?;
        Ok(Some(Posting {
            doc_id: DocumentId::new(doc_id.unwrap_or_default()),
            tuple: self.tuple.clone(),
            stored,
        }))
    }
}

impl IndexCursor for UniquePointIterator {
    fn next(&mut self, limit: usize, out: &mut Vec<DocumentId>) -> EngineResult<bool> {
        if self.done || limit == 0 {
            return Ok(!self.done);
        }
        if let Some(posting) = self.lookup()? {
            out.push(posting.doc_id);
        }
        self.done = true;
        Ok(false)
    }

    fn next_covering(&mut self, limit: usize, out: &mut Vec<Posting>) -> EngineResult<bool> {
        if self.done || limit == 0 {
            return Ok(!self.done);
        }
        if let Some(posting) = self.lookup()? {
            out.push(posting);
        }
        self.done = true;
        Ok(false)
    }

    fn rearm(&mut self, range: &CompiledRange) -> EngineResult<bool> {
        let Some(tuple) = range.equality.clone() else {
            return Ok(false);
        };
        self.key = Self::entry_key(&self.ctx, &tuple)?;
        self.tuple = tuple;
        self.done = false;
        Ok(true)
    }

    fn reset(&mut self) {
        self.done = false;
    }

    fn skip(&mut self, count: usize) -> EngineResult<usize> {
        if self.done || count == 0 {
            return Ok(0);
        }
        let skipped = usize::from(self.lookup()?.is_some());
        self.done = true;
        Ok(skipped)
    }
}

// ---------------------------------------------------------------------
// Range scan iterator
// ---------------------------------------------------------------------

/// Bounded range scan, monomorphized over direction and checking mode.
///
/// `CHECKED` validates bounds on every step and is required whenever a
/// transaction overlay is merged into the view; the unchecked variant
/// relies on the substrate's native bound enforcement.
pub struct RangeScanIterator<const REVERSE: bool, const CHECKED: bool> {
    ctx: ScanContext,
    ranges: Vec<KeyBounds>,
    current: usize,
    cursor: Option<Box<dyn Cursor>>,
    exhausted: bool,
}

impl<const REVERSE: bool, const CHECKED: bool> RangeScanIterator<REVERSE, CHECKED> {
    /// Creates a scan over the given ranges, consumed front to back.
    #[must_use]
    pub fn new(ctx: ScanContext, ranges: Vec<KeyBounds>) -> Self {
        Self {
            ctx,
            ranges,
            current: 0,
            cursor: None,
            exhausted: false,
        }
    }

    /// Opens and positions a cursor for the current range.
    fn open_cursor(&mut self) -> EngineResult<()> {
        let bounds = &self.ranges[self.current];
        let mut cursor = if CHECKED {
            self.ctx.substrate.cursor(self.ctx.merged_options())?
        } else {
            self.ctx.substrate.cursor(self.ctx.native_options(bounds))?
        };
        if REVERSE {
            cursor.seek_for_prev(bounds.end());
            // The end boundary is exclusive; a self-checking cursor may
            // land on or past it.
            if CHECKED {
                while cursor.valid() && cursor.key() >= bounds.end() {
                    cursor.prev();
                }
            }
        } else {
            cursor.seek(bounds.start());
        }
        self.cursor = Some(cursor);
        Ok(())
    }

    /// Moves to the next range, or marks the scan exhausted.
    fn advance_range(&mut self) {
        self.cursor = None;
        self.current += 1;
        if self.current >= self.ranges.len() {
            self.exhausted = true;
        }
    }

    /// Emits up to `limit` postings through `sink`.
    fn emit(
        &mut self,
        limit: usize,
        mut sink: impl FnMut(Posting),
    ) -> EngineResult<bool> {
        let mut taken = 0;
        while taken < limit && !self.exhausted {
            if self.ranges.get(self.current).is_none() {
                self.exhausted = true;
                break;
            }
            if self.ranges[self.current].is_empty() {
                self.advance_range();
                continue;
            }
            if self.cursor.is_none() {
                self.open_cursor()?;
            }
            let bounds = &self.ranges[self.current];
            let Some(cursor) = self.cursor.as_mut() else {
                break;
            };

            if !cursor.valid() {
                cursor.status()?;
                self.advance_range();
                continue;
            }
            if CHECKED && !bounds.contains(cursor.key()) {
                self.advance_range();
                continue;
            }

            sink(posting_from_entry(self.ctx.kind, cursor.key(), cursor.value())?);
            taken += 1;
            if REVERSE {
                cursor.prev();
            } else {
                cursor.next();
            }
        }
        Ok(!self.exhausted && self.has_pending()?)
    }

    /// Returns true if the current cursor still points at an in-range
    /// entry or further ranges remain.
    fn has_pending(&mut self) -> EngineResult<bool> {
        if self.current + 1 < self.ranges.len() {
            return Ok(true);
        }
        let Some(bounds) = self.ranges.get(self.current) else {
            return Ok(false);
        };
        match self.cursor.as_ref() {
            Some(cursor) => {
                if !cursor.valid() {
                    cursor.status()?;
                    return Ok(false);
                }
                Ok(!CHECKED || bounds.contains(cursor.key()))
            }
            None => Ok(!bounds.is_empty()),
        }
    }
}

impl<const REVERSE: bool, const CHECKED: bool> IndexCursor for RangeScanIterator<REVERSE, CHECKED> {
    fn next(&mut self, limit: usize, out: &mut Vec<DocumentId>) -> EngineResult<bool> {
        self.emit(limit, |posting| out.push(posting.doc_id))
    }

    fn next_covering(&mut self, limit: usize, out: &mut Vec<Posting>) -> EngineResult<bool> {
        self.emit(limit, |posting| out.push(posting))
    }

    fn rearm(&mut self, range: &CompiledRange) -> EngineResult<bool> {
        self.ranges.clear();
        self.ranges.push(range.bounds.clone());
        self.current = 0;
        self.cursor = None;
        self.exhausted = false;
        Ok(true)
    }

    fn reset(&mut self) {
        self.current = 0;
        self.cursor = None;
        self.exhausted = false;
    }

    fn skip(&mut self, count: usize) -> EngineResult<usize> {
        let mut skipped = 0;
        self.emit(count, |_| skipped += 1)?;
        Ok(skipped)
    }
}

// ---------------------------------------------------------------------
// IN-expansion iterator
// ---------------------------------------------------------------------

/// Replays a batch of equality lookups through one wrapped iterator.
pub struct InExpansionIterator {
    ranges: Vec<CompiledRange>,
    position: usize,
    inner: EqualityIterator,
}

impl InExpansionIterator {
    /// Creates an expansion over the compiled equality ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup value cannot be encoded.
    pub fn new(ctx: ScanContext, ranges: Vec<CompiledRange>, reverse: bool) -> EngineResult<Self> {
        let first = ranges.first().cloned().unwrap_or(CompiledRange {
            bounds: KeyBounds::new(Vec::new(), Vec::new()),
            equality: Some(Vec::new()),
        });
        let inner = EqualityIterator::new(ctx, &first, reverse)?;
        Ok(Self {
            ranges,
            position: 0,
            inner,
        })
    }

    /// Re-arms the inner iterator for the next equality value.
    ///
    /// Returns false once the batch is exhausted.
    fn advance(&mut self) -> EngineResult<bool> {
        loop {
            self.position += 1;
            let Some(range) = self.ranges.get(self.position) else {
                return Ok(false);
            };
            if range.bounds.is_empty() {
                continue;
            }
            if self.inner.rearm(range)? {
                return Ok(true);
            }
        }
    }

    fn run(
        &mut self,
        limit: usize,
        mut step: impl FnMut(&mut EqualityIterator, usize) -> EngineResult<(usize, bool)>,
    ) -> EngineResult<bool> {
        if self.position >= self.ranges.len() {
            return Ok(false);
        }
        let mut taken = 0;
        loop {
            let (produced, more) = step(&mut self.inner, limit - taken)?;
            taken += produced;
            if taken >= limit {
                return Ok(more || self.position + 1 < self.ranges.len());
            }
            if !self.advance()? {
                return Ok(false);
            }
        }
    }
}

impl IndexCursor for InExpansionIterator {
    fn next(&mut self, limit: usize, out: &mut Vec<DocumentId>) -> EngineResult<bool> {
        self.run(limit, |inner, budget| {
            let before = out.len();
            let more = inner.next(budget, out)?;
            Ok((out.len() - before, more))
        })
    }

    fn next_covering(&mut self, limit: usize, out: &mut Vec<Posting>) -> EngineResult<bool> {
        self.run(limit, |inner, budget| {
            let before = out.len();
            let more = inner.next_covering(budget, out)?;
            Ok((out.len() - before, more))
        })
    }

    fn rearm(&mut self, range: &CompiledRange) -> EngineResult<bool> {
        if !self.inner.rearm(range)? {
            return Ok(false);
        }
        self.ranges = vec![range.clone()];
        self.position = 0;
        Ok(true)
    }

    fn reset(&mut self) {
        self.position = 0;
        if let Some(first) = self.ranges.first().cloned() {
            // Re-arming with the first range also resets the buffer.
            let _ = self.inner.rearm(&first);
        }
    }

    fn skip(&mut self, count: usize) -> EngineResult<usize> {
        let mut skipped = 0;
        self.run(count, |inner, budget| {
            let n = inner.skip(budget)?;
            skipped += n;
            Ok((n, inner.remaining() > 0))
        })?;
        Ok(skipped)
    }
}

// ---------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------

/// A cursor over nothing, for conditions that cannot match.
struct EmptyCursor;

impl IndexCursor for EmptyCursor {
    fn next(&mut self, _limit: usize, _out: &mut Vec<DocumentId>) -> EngineResult<bool> {
        Ok(false)
    }

    fn next_covering(&mut self, _limit: usize, _out: &mut Vec<Posting>) -> EngineResult<bool> {
        Ok(false)
    }

    fn rearm(&mut self, _range: &CompiledRange) -> EngineResult<bool> {
        Ok(false)
    }

    fn reset(&mut self) {}

    fn skip(&mut self, _count: usize) -> EngineResult<usize> {
        Ok(0)
    }
}

/// Selects and builds the cursor variant for a compiled condition.
///
/// Keyed by three booleans resolved once here: unique layout, reverse
/// traversal, and whether the transaction's overlay forces the
/// bounds-checked scan.
///
/// # Errors
///
/// Returns an error if a lookup value cannot be encoded.
pub fn new_cursor(
    ctx: ScanContext,
    compiled: &CompiledCondition,
    direction: ScanDirection,
) -> EngineResult<Box<dyn IndexCursor>> {
    if compiled.is_guaranteed_empty() {
        return Ok(Box::new(EmptyCursor));
    }
    let reverse = direction.is_reverse();
    let checked = ctx.reads_own_writes();

    match compiled.format {
        RangeFormat::EqualityOnly => {
            let range = &compiled.ranges[0];
            let full_tuple = range
                .equality
                .as_ref()
                .is_some_and(|tuple| tuple.len() == ctx.arity);
            if ctx.kind.is_unique() && full_tuple {
                return Ok(Box::new(UniquePointIterator::new(ctx, range)?));
            }
            Ok(Box::new(EqualityIterator::new(ctx, range, reverse)?))
        }
        RangeFormat::InExpansion => Ok(Box::new(InExpansionIterator::new(
            ctx,
            compiled.ranges.clone(),
            reverse,
        )?)),
        RangeFormat::OperatorsAndValues => {
            let ranges: Vec<KeyBounds> = compiled
                .ranges
                .iter()
                .map(|range| range.bounds.clone())
                .collect();
            let cursor: Box<dyn IndexCursor> = match (reverse, checked) {
                (false, false) => Box::new(RangeScanIterator::<false, false>::new(ctx, ranges)),
                (false, true) => Box::new(RangeScanIterator::<false, true>::new(ctx, ranges)),
                (true, false) => Box::new(RangeScanIterator::<true, false>::new(ctx, ranges)),
                (true, true) => Box::new(RangeScanIterator::<true, true>::new(ctx, ranges)),
            };
            Ok(cursor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::compiler::compile;
    use crate::condition::{Comparator, SearchCondition};
    use crate::definition::IndexDefinition;
    use crate::types::IndexId;
    use docdex_codec::{encode_entry, Value};
    use docdex_substrate::{MemorySubstrate, WriteBatch};

    fn context(substrate: Arc<MemorySubstrate>, kind: IndexKeyKind) -> ScanContext {
        let snapshot = substrate.snapshot();
        ScanContext {
            substrate,
            cache: Arc::new(LookupCache::new(CacheConfig::new())),
            kind,
            index_id: 7,
            arity: 1,
            snapshot,
            overlay: None,
        }
    }

    fn seed_non_unique(values: &[(&str, u64)]) -> Arc<MemorySubstrate> {
        let substrate = Arc::new(MemorySubstrate::new());
        let mut batch = WriteBatch::new();
        for (value, doc) in values {
            let entry = encode_entry(
                IndexKeyKind::NonUnique,
                7,
                &[Value::from(*value)],
                *doc,
                &[],
            )
            .unwrap();
            batch.put(entry.key, entry.value);
        }
        substrate.write(batch).unwrap();
        substrate
    }

    fn compiled_eq(def: &IndexDefinition, value: &str) -> CompiledCondition {
        let condition = SearchCondition::new(1)
            .with(0, Comparator::Eq(Value::from(value)))
            .unwrap();
        compile(def, &condition, ScanDirection::Forward).unwrap()
    }

    fn ids(cursor: &mut dyn IndexCursor, limit: usize) -> Vec<u64> {
        let mut out = Vec::new();
        while cursor.next(limit, &mut out).unwrap() {}
        out.iter().map(|id| id.as_u64()).collect()
    }

    #[test]
    fn equality_hits_in_key_order() {
        let substrate = seed_non_unique(&[("a", 2), ("a", 1), ("b", 3)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let ctx = context(substrate, IndexKeyKind::NonUnique);

        let compiled = compiled_eq(&def, "a");
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(ids(cursor.as_mut(), 10), vec![1, 2]);
    }

    #[test]
    fn miss_populates_cache_and_hit_replays_it() {
        let substrate = seed_non_unique(&[("a", 1)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let ctx = context(substrate.clone(), IndexKeyKind::NonUnique);
        let cache = ctx.cache.clone();

        let compiled = compiled_eq(&def, "a");
        let mut cursor = new_cursor(ctx.clone(), &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(ids(cursor.as_mut(), 10), vec![1]);
        assert_eq!(cache.len(), 1);

        // Mutate storage without invalidating: a second iterator must be
        // served from the cache and not observe the new entry.
        let entry = encode_entry(IndexKeyKind::NonUnique, 7, &[Value::from("a")], 9, &[]).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(entry.key, entry.value);
        substrate.write(batch).unwrap();

        let mut second = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(ids(second.as_mut(), 10), vec![1]);
    }

    #[test]
    fn negative_lookup_is_cached() {
        let substrate = seed_non_unique(&[("a", 1)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let ctx = context(substrate, IndexKeyKind::NonUnique);
        let cache = ctx.cache.clone();

        let compiled = compiled_eq(&def, "zz");
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();
        assert!(ids(cursor.as_mut(), 10).is_empty());
        // The empty marker is a real entry.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn forward_and_reverse_visit_the_same_ids() {
        let values: Vec<(String, u64)> = (0..1_000).map(|i| ("v".to_string(), i)).collect();
        let refs: Vec<(&str, u64)> = values.iter().map(|(s, i)| (s.as_str(), *i)).collect();
        let substrate = seed_non_unique(&refs);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);

        let compiled = compiled_eq(&def, "v");
        let mut fwd = new_cursor(
            context(substrate.clone(), IndexKeyKind::NonUnique),
            &compiled,
            ScanDirection::Forward,
        )
        .unwrap();
        let mut rev = new_cursor(
            context(substrate, IndexKeyKind::NonUnique),
            &compiled,
            ScanDirection::Reverse,
        )
        .unwrap();

        let forward = ids(fwd.as_mut(), 7);
        let mut reverse = ids(rev.as_mut(), 7);
        assert_eq!(forward.len(), 1_000);
        reverse.reverse();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn range_scan_respects_limits_and_more_flag() {
        let substrate = seed_non_unique(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let condition = SearchCondition::new(1)
            .with(0, Comparator::Ge(Value::from("b")))
            .unwrap();
        let compiled = compile(&def, &condition, ScanDirection::Forward).unwrap();

        let ctx = context(substrate, IndexKeyKind::NonUnique);
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();

        let mut out = Vec::new();
        let more = cursor.next(2, &mut out).unwrap();
        assert!(more);
        assert_eq!(out.iter().map(|d| d.as_u64()).collect::<Vec<_>>(), [2, 3]);

        let more = cursor.next(2, &mut out).unwrap();
        assert!(!more);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn reverse_range_scan_descends() {
        let substrate = seed_non_unique(&[("a", 1), ("b", 2), ("c", 3)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let condition = SearchCondition::new(1)
            .with(0, Comparator::Le(Value::from("b")))
            .unwrap();
        let compiled = compile(&def, &condition, ScanDirection::Reverse).unwrap();

        let ctx = context(substrate, IndexKeyKind::NonUnique);
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Reverse).unwrap();
        assert_eq!(ids(cursor.as_mut(), 10), vec![2, 1]);
    }

    #[test]
    fn overlay_forces_checked_scan_and_sees_own_writes() {
        let substrate = seed_non_unique(&[("a", 1)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);

        // Stage an uncommitted entry for "a" and a delete of doc 1.
        let staged = encode_entry(IndexKeyKind::NonUnique, 7, &[Value::from("a")], 5, &[]).unwrap();
        let committed =
            encode_entry(IndexKeyKind::NonUnique, 7, &[Value::from("a")], 1, &[]).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(staged.key, staged.value);
        batch.delete(committed.key);

        let mut ctx = context(substrate, IndexKeyKind::NonUnique);
        ctx.overlay = Some(Arc::new(batch.overlay()));

        let compiled = compiled_eq(&def, "a");
        let mut cursor = new_cursor(ctx.clone(), &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(ids(cursor.as_mut(), 10), vec![5]);
        // Read-own-writes scans never touch the shared cache.
        assert!(ctx.cache.is_empty());
    }

    #[test]
    fn in_expansion_concatenates_streams() {
        let substrate = seed_non_unique(&[("a", 1), ("a", 2), ("c", 3), ("d", 9)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let condition = SearchCondition::new(1)
            .with(
                0,
                Comparator::In(Value::from(vec![
                    Value::from("c"),
                    Value::from("a"),
                    Value::from("b"),
                ])),
            )
            .unwrap();
        let compiled = compile(&def, &condition, ScanDirection::Forward).unwrap();
        assert_eq!(compiled.format, RangeFormat::InExpansion);

        let ctx = context(substrate, IndexKeyKind::NonUnique);
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(ids(cursor.as_mut(), 2), vec![1, 2, 3]);
    }

    #[test]
    fn unique_point_lookup() {
        let substrate = Arc::new(MemorySubstrate::new());
        let entry = encode_entry(IndexKeyKind::Unique, 7, &[Value::from("a")], 42, &[]).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(entry.key, entry.value);
        substrate.write(batch).unwrap();

        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]).unique();
        let compiled = compiled_eq(&def, "a");
        let ctx = context(substrate, IndexKeyKind::Unique);
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(ids(cursor.as_mut(), 10), vec![42]);
    }

    #[test]
    fn rearm_reuses_the_equality_iterator() {
        let substrate = seed_non_unique(&[("a", 1), ("b", 2)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let ctx = context(substrate, IndexKeyKind::NonUnique);

        let first = compiled_eq(&def, "a");
        let second = compiled_eq(&def, "b");
        let mut cursor = EqualityIterator::new(ctx, &first.ranges[0], false).unwrap();

        let mut out = Vec::new();
        cursor.next(10, &mut out).unwrap();
        assert!(cursor.rearm(&second.ranges[0]).unwrap());
        cursor.next(10, &mut out).unwrap();
        assert_eq!(out.iter().map(|d| d.as_u64()).collect::<Vec<_>>(), [1, 2]);
    }

    #[test]
    fn skip_discards_results() {
        let substrate = seed_non_unique(&[("a", 1), ("a", 2), ("a", 3)]);
        let def = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        let ctx = context(substrate, IndexKeyKind::NonUnique);

        let compiled = compiled_eq(&def, "a");
        let mut cursor = new_cursor(ctx, &compiled, ScanDirection::Forward).unwrap();
        assert_eq!(cursor.skip(2).unwrap(), 2);
        assert_eq!(ids(cursor.as_mut(), 10), vec![3]);
    }
}
