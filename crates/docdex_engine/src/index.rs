//! The secondary index and its transactional maintainer.

use crate::cache::{lookup_cache_key, CacheConfig, LookupCache};
use crate::compiler::{compile, CompiledCondition};
use crate::condition::SearchCondition;
use crate::definition::IndexDefinition;
use crate::document::DocumentStore;
use crate::error::{EngineError, EngineResult};
use crate::estimator::CardinalityEstimator;
use crate::iterator::{new_cursor, IndexCursor, ScanContext};
use crate::postings::encode_postings;
use crate::types::{DocumentId, ScanDirection};
use docdex_codec::{
    decode_entry_value, decode_value_tuple, encode_bounds, encode_entry, KeyBounds, Value,
};
use docdex_substrate::{ReadOptions, Snapshot, Substrate, WriteBatch};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// How often a long-running rescan polls the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: usize = 1024;

/// A lookup value touched by a maintenance operation.
///
/// Kept until commit so the cache entry can be invalidated and, in
/// refill mode, re-primed.
#[derive(Debug, Clone)]
struct TouchedLookup {
    cache_key: Vec<u8>,
    tuple: Vec<Value>,
}

/// A staged unique entry, re-verified against the committed state when
/// the transaction commits.
#[derive(Debug, Clone)]
struct UniqueClaim {
    key: Vec<u8>,
    doc_id: DocumentId,
}

/// One transaction's view of an index.
///
/// Maintenance operations stage writes into the transaction's batch;
/// nothing touches the substrate, the cache, or the estimator until
/// [`SecondaryIndex::commit`]. Transactions are owned by one worker
/// thread and hold their own snapshot.
#[derive(Debug)]
pub struct IndexTransaction {
    batch: WriteBatch,
    snapshot: Snapshot,
    read_own_writes: bool,
    refill: bool,
    touched: Vec<TouchedLookup>,
    unique_claims: Vec<UniqueClaim>,
    estimator_inserts: Vec<u64>,
    estimator_removes: Vec<u64>,
}

impl IndexTransaction {
    /// The snapshot this transaction reads under.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Returns true if no maintenance write is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Looks up a staged or committed entry value for `key`.
    fn read_entry(
        &self,
        substrate: &dyn Substrate,
        key: &[u8],
    ) -> EngineResult<Option<Vec<u8>>> {
        match self.batch.pending(key) {
            Some(Some(value)) => Ok(Some(value.to_vec())),
            Some(None) => Ok(None),
            None => Ok(substrate.get(key, Some(self.snapshot))?),
        }
    }
}

/// A cost/cardinality estimate for the planner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    /// Number of key ranges the condition compiles to.
    pub ranges: usize,
    /// Expected number of matching entries.
    pub estimated_items: f64,
    /// Abstract cost: expected items plus one seek per range.
    pub estimated_cost: f64,
}

/// A secondary index over one collection.
///
/// Owns the lookup cache and the cardinality estimator; consumes the
/// storage substrate and the document store. All maintenance goes
/// through [`IndexTransaction`]s so a conflicting write rolls back
/// without partial application.
pub struct SecondaryIndex {
    definition: IndexDefinition,
    substrate: Arc<dyn Substrate>,
    documents: Arc<dyn DocumentStore>,
    cache: Arc<LookupCache>,
    estimator: Mutex<CardinalityEstimator>,
    /// Serializes commits so unique claims are checked against a stable
    /// latest state.
    commit_lock: Mutex<()>,
    shutdown: AtomicBool,
}

impl SecondaryIndex {
    /// Creates an index over the given substrate and document store.
    #[must_use]
    pub fn new(
        definition: IndexDefinition,
        substrate: Arc<dyn Substrate>,
        documents: Arc<dyn DocumentStore>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            definition,
            substrate,
            documents,
            cache: Arc::new(LookupCache::new(cache_config)),
            estimator: Mutex::new(CardinalityEstimator::new()),
            commit_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// The index definition.
    #[must_use]
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// The lookup cache fronting this index.
    #[must_use]
    pub fn cache(&self) -> &Arc<LookupCache> {
        &self.cache
    }

    /// Signals long-running scans to abort cooperatively.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------

    /// Begins a transaction under the current committed state.
    ///
    /// `read_own_writes` makes the transaction's own staged entries
    /// visible to its iterators, which forces the bounds-checked scan
    /// variant. `refill` re-primes invalidated cache entries on commit.
    #[must_use]
    pub fn begin(&self, read_own_writes: bool, refill: bool) -> IndexTransaction {
        IndexTransaction {
            batch: WriteBatch::new(),
            snapshot: self.substrate.snapshot(),
            read_own_writes,
            refill,
            touched: Vec::new(),
            unique_claims: Vec::new(),
            estimator_inserts: Vec::new(),
            estimator_removes: Vec::new(),
        }
    }

    /// Commits a transaction: applies the batch atomically, feeds the
    /// estimator, and invalidates (optionally re-primes) the touched
    /// cache entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UniqueConstraintViolation`] if another
    /// transaction committed a conflicting unique entry since this one
    /// began; nothing is applied in that case.
    pub fn commit(&self, txn: IndexTransaction) -> EngineResult<()> {
        let _serialized = self.commit_lock.lock();

        // Unique claims were checked under the transaction snapshot;
        // re-verify against the latest committed state.
        for claim in &txn.unique_claims {
            if let Some(value) = self.substrate.get(&claim.key, None)? {
                let (owner, _) = decode_entry_value(self.definition.kind(), &value)?;
                let owner = DocumentId::new(owner.unwrap_or_default());
                if owner != claim.doc_id {
                    return Err(self.conflict_error(owner)?);
                }
            }
        }

        self.substrate.write(txn.batch)?;

        {
            let mut estimator = self.estimator.lock();
            for hash in txn.estimator_inserts {
                estimator.insert(hash);
            }
            for hash in txn.estimator_removes {
                estimator.remove(hash);
            }
        }

        let refill = txn.refill || self.cache.config().always_refill;
        for lookup in txn.touched {
            self.cache.invalidate(&lookup.cache_key);
            if refill {
                self.refill_lookup(&lookup)?;
            }
        }
        Ok(())
    }

    /// Re-primes one invalidated cache entry from the committed state.
    fn refill_lookup(&self, lookup: &TouchedLookup) -> EngineResult<()> {
        let ctx = ScanContext {
            substrate: self.substrate.clone(),
            cache: self.cache.clone(),
            kind: self.definition.kind(),
            index_id: self.definition.id.as_u64(),
            arity: self.definition.arity(),
            snapshot: self.substrate.snapshot(),
            overlay: None,
        };
        let bounds = encode_bounds(
            ctx.kind,
            ctx.index_id,
            &lookup.tuple,
            true,
            &lookup.tuple,
            true,
        )?;
        let postings = crate::iterator::scan_bounds(&ctx, &bounds)?;
        let serialized = encode_postings(&postings)?;
        self.cache.insert(&lookup.cache_key, &serialized);
        debug!(results = postings.len(), "refilled cache entry");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------

    /// Stages the index entries for a newly written document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AttributeMissing`] when a non-sparse index
    /// finds no value for an indexed field, and
    /// [`EngineError::UniqueConstraintViolation`] on a conflicting
    /// unique entry; in the latter case every entry already staged for
    /// this document is rolled back first.
    pub fn insert(
        &self,
        txn: &mut IndexTransaction,
        doc_id: DocumentId,
        snapshot: &Value,
    ) -> EngineResult<()> {
        let Some(tuple) = self.extract_tuple(snapshot)? else {
            return Ok(());
        };
        let stored = self.definition.extract_stored(snapshot);
        let entry = encode_entry(
            self.definition.kind(),
            self.definition.id.as_u64(),
            &tuple,
            doc_id.as_u64(),
            &stored,
        )?;
        let rollback_mark = txn.batch.len();

        if self.definition.unique {
            if let Some(existing) = txn.read_entry(self.substrate.as_ref(), &entry.key)? {
                let (owner, _) = decode_entry_value(self.definition.kind(), &existing)?;
                let owner = DocumentId::new(owner.unwrap_or_default());
                if owner != doc_id {
                    txn.batch.truncate(rollback_mark);
                    return Err(self.conflict_error(owner)?);
                }
            }
            txn.unique_claims.push(UniqueClaim {
                key: entry.key.clone(),
                doc_id,
            });
        } else if txn.read_entry(self.substrate.as_ref(), &entry.key)?.is_some() {
            // Idempotent re-insert: one entry, one observed hash.
            return Ok(());
        }

        let lookup = lookup_cache_key(&tuple)?;
        if !self.definition.unique {
            txn.estimator_inserts
                .push(xxhash_rust::xxh3::xxh3_64(&lookup));
        }
        txn.batch.put(entry.key, entry.value);
        txn.touched.push(TouchedLookup {
            cache_key: lookup,
            tuple,
        });
        Ok(())
    }

    /// Stages removal of a document's index entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AttributeMissing`] when a non-sparse index
    /// finds no value for an indexed field.
    pub fn remove(
        &self,
        txn: &mut IndexTransaction,
        doc_id: DocumentId,
        snapshot: &Value,
    ) -> EngineResult<()> {
        let Some(tuple) = self.extract_tuple(snapshot)? else {
            return Ok(());
        };
        let entry = encode_entry(
            self.definition.kind(),
            self.definition.id.as_u64(),
            &tuple,
            doc_id.as_u64(),
            &[],
        )?;
        if txn.read_entry(self.substrate.as_ref(), &entry.key)?.is_none() {
            return Ok(());
        }

        let lookup = lookup_cache_key(&tuple)?;
        if !self.definition.unique {
            txn.estimator_removes
                .push(xxhash_rust::xxh3::xxh3_64(&lookup));
        }
        txn.batch.delete(entry.key);
        txn.touched.push(TouchedLookup {
            cache_key: lookup,
            tuple,
        });
        Ok(())
    }

    /// Stages an update of a document's index entries.
    ///
    /// A unique index whose indexed values are unchanged updates the
    /// entry in place; everything else degrades to remove-then-insert.
    ///
    /// # Errors
    ///
    /// Propagates the same errors as [`SecondaryIndex::insert`] and
    /// [`SecondaryIndex::remove`].
    pub fn update(
        &self,
        txn: &mut IndexTransaction,
        old_doc: DocumentId,
        old_snapshot: &Value,
        new_doc: DocumentId,
        new_snapshot: &Value,
    ) -> EngineResult<()> {
        let old_tuple = self.extract_tuple(old_snapshot)?;
        let new_tuple = self.extract_tuple(new_snapshot)?;

        if self.definition.unique && old_tuple.is_some() && old_tuple == new_tuple {
            // Indexed values unchanged: rewrite the entry value in place.
            let tuple = new_tuple.unwrap_or_default();
            let stored = self.definition.extract_stored(new_snapshot);
            let entry = encode_entry(
                self.definition.kind(),
                self.definition.id.as_u64(),
                &tuple,
                new_doc.as_u64(),
                &stored,
            )?;
            let lookup = lookup_cache_key(&tuple)?;
            txn.unique_claims.push(UniqueClaim {
                key: entry.key.clone(),
                doc_id: new_doc,
            });
            txn.batch.put(entry.key, entry.value);
            txn.touched.push(TouchedLookup {
                cache_key: lookup,
                tuple,
            });
            return Ok(());
        }

        self.remove(txn, old_doc, old_snapshot)?;
        self.insert(txn, new_doc, new_snapshot)
    }

    /// Dry-run conflict check, used before a write commits.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`SecondaryIndex::insert`] without
    /// staging anything.
    pub fn check_conflict(
        &self,
        txn: &IndexTransaction,
        doc_id: DocumentId,
        snapshot: &Value,
    ) -> EngineResult<()> {
        if !self.definition.unique {
            return Ok(());
        }
        let Some(tuple) = self.extract_tuple(snapshot)? else {
            return Ok(());
        };
        let entry = encode_entry(
            self.definition.kind(),
            self.definition.id.as_u64(),
            &tuple,
            doc_id.as_u64(),
            &[],
        )?;
        if let Some(existing) = txn.read_entry(self.substrate.as_ref(), &entry.key)? {
            let (owner, _) = decode_entry_value(self.definition.kind(), &existing)?;
            let owner = DocumentId::new(owner.unwrap_or_default());
            if owner != doc_id {
                return Err(self.conflict_error(owner)?);
            }
        }
        Ok(())
    }

    /// Extracts the indexed tuple, applying the sparse/missing rules.
    ///
    /// `Ok(None)` means "skip, not an error" for sparse indexes.
    fn extract_tuple(&self, snapshot: &Value) -> EngineResult<Option<Vec<Value>>> {
        let tuple = self.definition.extract(snapshot);
        if let Some(position) = tuple.iter().position(Value::is_undefined) {
            if self.definition.sparse {
                return Ok(None);
            }
            return Err(EngineError::attribute_missing(
                self.definition.fields[position].clone(),
            ));
        }
        Ok(Some(tuple))
    }

    /// Builds the violation error, naming the owning document's primary
    /// key. Resolution is eager so upstream messages can include it.
    fn conflict_error(&self, owner: DocumentId) -> EngineResult<EngineError> {
        let document_key = match self.documents.fetch(owner)? {
            Some(snapshot) => snapshot.primary_key,
            None => owner.to_string(),
        };
        Ok(EngineError::unique_violation(document_key))
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Compiles a condition against this index.
    ///
    /// # Errors
    ///
    /// Returns an error for structurally invalid conditions.
    pub fn compile_condition(
        &self,
        condition: &SearchCondition,
        direction: ScanDirection,
    ) -> EngineResult<CompiledCondition> {
        compile(&self.definition, condition, direction)
    }

    /// Opens a cursor over a compiled condition.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup value cannot be encoded.
    pub fn search(
        &self,
        txn: &IndexTransaction,
        compiled: &CompiledCondition,
        direction: ScanDirection,
    ) -> EngineResult<Box<dyn IndexCursor>> {
        let overlay = if txn.read_own_writes {
            Some(Arc::new(txn.batch.overlay()))
        } else {
            None
        };
        let ctx = ScanContext {
            substrate: self.substrate.clone(),
            cache: self.cache.clone(),
            kind: self.definition.kind(),
            index_id: self.definition.id.as_u64(),
            arity: self.definition.arity(),
            snapshot: txn.snapshot,
            overlay,
        };
        new_cursor(ctx, compiled, direction)
    }

    // -----------------------------------------------------------------
    // Planner interface
    // -----------------------------------------------------------------

    /// Selectivity of this index in `(0, 1]`; higher is more selective.
    #[must_use]
    pub fn selectivity_estimate(&self) -> f64 {
        if self.definition.unique {
            return 1.0;
        }
        self.estimator.lock().estimate()
    }

    /// Estimates the work a condition costs on this index so a planner
    /// can compare alternatives.
    ///
    /// # Errors
    ///
    /// Returns an error for structurally invalid conditions.
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_cost(
        &self,
        condition: &SearchCondition,
        direction: ScanDirection,
    ) -> EngineResult<CostEstimate> {
        let compiled = self.compile_condition(condition, direction)?;
        let ranges = compiled.ranges.len();

        let estimator = self.estimator.lock();
        let total = estimator.total() as f64;
        let per_value = if self.definition.unique {
            1.0
        } else {
            total / estimator.distinct().max(1) as f64
        };
        drop(estimator);

        let estimated_items = if compiled.is_guaranteed_empty() {
            0.0
        } else if compiled
            .ranges
            .iter()
            .all(|range| range.equality.is_some())
        {
            ranges as f64 * per_value
        } else {
            // A two-sided range gives no per-value signal; assume half
            // the index per range.
            (total / 2.0).max(1.0) * ranges as f64
        };

        Ok(CostEstimate {
            ranges,
            estimated_items,
            estimated_cost: estimated_items + ranges as f64,
        })
    }

    // -----------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------

    /// Rebuilds the cardinality estimator by a full rescan.
    ///
    /// Takes the estimator's exclusive section for the whole rebuild and
    /// polls the shutdown flag at a fixed cadence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] if shutdown was requested
    /// mid-scan; the estimator is left cleared in that case.
    pub fn rebuild_estimator(&self) -> EngineResult<()> {
        if self.definition.unique {
            return Ok(());
        }
        let mut estimator = self.estimator.lock();
        estimator.clear();

        let bounds = KeyBounds::full_range(self.definition.kind(), self.definition.id.as_u64());
        let mut cursor = self.substrate.cursor(
            ReadOptions::with_snapshot(self.substrate.snapshot())
                .lower_bound(bounds.start().to_vec())
                .upper_bound(bounds.end().to_vec()),
        )?;
        cursor.seek(bounds.start());

        let mut steps = 0usize;
        while cursor.valid() {
            if steps % SHUTDOWN_POLL_INTERVAL == 0 && self.shutdown.load(Ordering::Relaxed) {
                debug!(steps, "estimator rebuild aborted by shutdown");
                return Err(EngineError::ShuttingDown);
            }
            let tuple = decode_value_tuple(cursor.key())?;
            let lookup = lookup_cache_key(&tuple)?;
            estimator.insert(xxhash_rust::xxh3::xxh3_64(&lookup));
            steps += 1;
            cursor.next();
        }
        cursor.status()?;
        debug!(entries = steps, "estimator rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Comparator;
    use crate::document::{DocumentSnapshot, MemoryDocumentStore};
    use crate::types::IndexId;
    use docdex_substrate::MemorySubstrate;

    fn doc(x: &str) -> Value {
        Value::object(vec![("x".to_string(), Value::from(x))])
    }

    fn store_with(docs: &[(u64, &str)]) -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new());
        for (id, x) in docs {
            store.put(
                DocumentId::new(*id),
                DocumentSnapshot {
                    attributes: doc(x),
                    revision: 1,
                    primary_key: format!("docs/{id}"),
                },
            );
        }
        store
    }

    fn index(unique: bool, sparse: bool, docs: &[(u64, &str)]) -> SecondaryIndex {
        let mut definition = IndexDefinition::new(IndexId::new(7), "docs", ["x"]);
        if unique {
            definition = definition.unique();
        }
        if sparse {
            definition = definition.sparse();
        }
        SecondaryIndex::new(
            definition,
            Arc::new(MemorySubstrate::new()),
            store_with(docs),
            CacheConfig::new(),
        )
    }

    fn lookup_ids(index: &SecondaryIndex, value: &str) -> Vec<u64> {
        let condition = SearchCondition::new(1)
            .with(0, Comparator::Eq(Value::from(value)))
            .unwrap();
        let compiled = index
            .compile_condition(&condition, ScanDirection::Forward)
            .unwrap();
        let txn = index.begin(false, false);
        let mut cursor = index.search(&txn, &compiled, ScanDirection::Forward).unwrap();
        let mut out = Vec::new();
        while cursor.next(16, &mut out).unwrap() {}
        out.iter().map(|id| id.as_u64()).collect()
    }

    #[test]
    fn insert_then_lookup() {
        let index = index(false, false, &[(1, "a"), (2, "a"), (3, "b")]);
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.insert(&mut txn, DocumentId::new(2), &doc("a")).unwrap();
        index.insert(&mut txn, DocumentId::new(3), &doc("b")).unwrap();
        index.commit(txn).unwrap();

        assert_eq!(lookup_ids(&index, "a"), vec![1, 2]);
        assert_eq!(lookup_ids(&index, "b"), vec![3]);
    }

    #[test]
    fn remove_invalidates_cached_lookup() {
        let index = index(false, false, &[(1, "a"), (2, "a")]);
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.insert(&mut txn, DocumentId::new(2), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        // Prime the cache.
        assert_eq!(lookup_ids(&index, "a"), vec![1, 2]);
        assert!(!index.cache().is_empty());

        let mut txn = index.begin(false, false);
        index.remove(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        assert_eq!(lookup_ids(&index, "a"), vec![2]);
    }

    #[test]
    fn unique_conflict_names_the_owner() {
        let index = index(true, false, &[(1, "a")]);
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        let mut txn = index.begin(false, false);
        let err = index
            .insert(&mut txn, DocumentId::new(2), &doc("a"))
            .unwrap_err();
        match err {
            EngineError::UniqueConstraintViolation { document_key } => {
                assert_eq!(document_key, "docs/1");
            }
            other => panic!("expected violation, got {other}"),
        }
        // The conflicting insert staged nothing.
        assert!(txn.is_empty());
    }

    #[test]
    fn conflict_rolls_back_staged_entries() {
        let index = index(true, false, &[(1, "a")]);
        let mut seed = index.begin(false, false);
        index.insert(&mut seed, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(seed).unwrap();

        // Stage an unrelated entry, then hit a conflict inside the same
        // transaction: only the conflicting operation rolls back.
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(5), &doc("z")).unwrap();
        let staged_before = txn.batch.len();
        assert!(index.insert(&mut txn, DocumentId::new(2), &doc("a")).is_err());
        assert_eq!(txn.batch.len(), staged_before);
    }

    #[test]
    fn check_conflict_is_a_dry_run() {
        let index = index(true, false, &[(1, "a")]);
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        let txn = index.begin(false, false);
        assert!(index
            .check_conflict(&txn, DocumentId::new(2), &doc("a"))
            .is_err());
        assert!(index
            .check_conflict(&txn, DocumentId::new(2), &doc("b"))
            .is_ok());
        assert!(txn.is_empty());
    }

    #[test]
    fn sparse_index_skips_missing_fields() {
        let index = index(false, true, &[]);
        let empty = Value::object(Vec::new());
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &empty).unwrap();
        assert!(txn.is_empty());
        index.remove(&mut txn, DocumentId::new(1), &empty).unwrap();
        assert!(txn.is_empty());
    }

    #[test]
    fn non_sparse_index_reports_missing_fields() {
        let index = index(false, false, &[]);
        let empty = Value::object(Vec::new());
        let mut txn = index.begin(false, false);
        let err = index
            .insert(&mut txn, DocumentId::new(1), &empty)
            .unwrap_err();
        assert!(matches!(err, EngineError::AttributeMissing { field } if field == "x"));
    }

    #[test]
    fn reinsert_is_idempotent() {
        let index = index(false, false, &[(1, "a")]);
        for _ in 0..2 {
            let mut txn = index.begin(false, false);
            index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
            index.commit(txn).unwrap();
        }
        assert_eq!(lookup_ids(&index, "a"), vec![1]);
        let estimator = index.estimator.lock();
        assert_eq!(estimator.total(), 1);
    }

    #[test]
    fn update_with_changed_value_moves_the_entry() {
        let index = index(false, false, &[(1, "a")]);
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        let mut txn = index.begin(false, false);
        index
            .update(
                &mut txn,
                DocumentId::new(1),
                &doc("a"),
                DocumentId::new(1),
                &doc("b"),
            )
            .unwrap();
        index.commit(txn).unwrap();

        assert!(lookup_ids(&index, "a").is_empty());
        assert_eq!(lookup_ids(&index, "b"), vec![1]);
    }

    #[test]
    fn rebuild_estimator_counts_committed_entries() {
        let index = index(false, false, &[]);
        let mut txn = index.begin(false, false);
        for (id, x) in [(1u64, "a"), (2, "a"), (3, "b")] {
            index.insert(&mut txn, DocumentId::new(id), &doc(x)).unwrap();
        }
        index.commit(txn).unwrap();

        index.rebuild_estimator().unwrap();
        let estimator = index.estimator.lock();
        assert_eq!(estimator.total(), 3);
        assert_eq!(estimator.distinct(), 2);
    }

    #[test]
    fn shutdown_aborts_rebuild() {
        let index = index(false, false, &[]);
        let mut txn = index.begin(false, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        index.request_shutdown();
        assert!(matches!(
            index.rebuild_estimator(),
            Err(EngineError::ShuttingDown)
        ));
    }

    #[test]
    fn selectivity_reflects_duplicates() {
        let index = index(false, false, &[]);
        let mut txn = index.begin(false, false);
        for id in 1..=4u64 {
            index.insert(&mut txn, DocumentId::new(id), &doc("same")).unwrap();
        }
        index.commit(txn).unwrap();
        assert!((index.selectivity_estimate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_estimate_counts_ranges() {
        let index = index(false, false, &[]);
        let condition = SearchCondition::new(1)
            .with(
                0,
                Comparator::In(Value::from(vec![
                    Value::from("a"),
                    Value::from("b"),
                    Value::from("c"),
                ])),
            )
            .unwrap();
        let estimate = index
            .estimate_cost(&condition, ScanDirection::Forward)
            .unwrap();
        assert_eq!(estimate.ranges, 3);
    }

    #[test]
    fn refill_reprimes_the_cache_after_commit() {
        let index = index(false, false, &[(1, "a")]);
        let mut txn = index.begin(false, true);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();
        index.commit(txn).unwrap();

        // The committed lookup value is already cached.
        assert_eq!(index.cache().len(), 1);
    }

    #[test]
    fn read_own_writes_sees_staged_entries() {
        let index = index(false, false, &[(1, "a")]);
        let mut txn = index.begin(true, false);
        index.insert(&mut txn, DocumentId::new(1), &doc("a")).unwrap();

        let condition = SearchCondition::new(1)
            .with(0, Comparator::Eq(Value::from("a")))
            .unwrap();
        let compiled = index
            .compile_condition(&condition, ScanDirection::Forward)
            .unwrap();
        let mut cursor = index.search(&txn, &compiled, ScanDirection::Forward).unwrap();
        let mut out = Vec::new();
        while cursor.next(16, &mut out).unwrap() {}
        assert_eq!(out.iter().map(|d| d.as_u64()).collect::<Vec<_>>(), [1]);
    }
}
