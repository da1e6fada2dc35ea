//! Index definitions.

use crate::types::IndexId;
use docdex_codec::{IndexKeyKind, Value};

/// Definition of one secondary index.
///
/// The field list fixes the entry arity and comparison order for the
/// index's whole lifetime. Fields are dotted attribute paths into the
/// document snapshot.
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    /// Identifier partitioning the substrate key space.
    pub id: IndexId,
    /// Collection the indexed documents belong to.
    pub collection: String,
    /// Indexed attribute paths, in comparison order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness of value tuples.
    pub unique: bool,
    /// Whether documents missing an indexed field are skipped.
    pub sparse: bool,
    /// Extra attribute paths materialized in entries so covered queries
    /// avoid the document store.
    pub stored_fields: Vec<String>,
}

impl IndexDefinition {
    /// Creates a non-unique, non-sparse definition on the given fields.
    #[must_use]
    pub fn new<I, S>(id: IndexId, collection: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            collection: collection.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            sparse: false,
            stored_fields: Vec::new(),
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes this a sparse index.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Adds stored fields materialized alongside the key.
    #[must_use]
    pub fn stored_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stored_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Number of indexed fields.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    /// Physical key layout implied by uniqueness.
    #[must_use]
    pub const fn kind(&self) -> IndexKeyKind {
        if self.unique {
            IndexKeyKind::Unique
        } else {
            IndexKeyKind::NonUnique
        }
    }

    /// Extracts the indexed value tuple from a document snapshot.
    ///
    /// A missing attribute yields [`Value::Undefined`]; the maintainer
    /// decides whether that skips the entry (sparse) or is an error.
    #[must_use]
    pub fn extract(&self, snapshot: &Value) -> Vec<Value> {
        self.fields
            .iter()
            .map(|path| extract_path(snapshot, path))
            .collect()
    }

    /// Extracts the stored-values tuple from a document snapshot.
    ///
    /// Missing stored attributes are materialized as null; they never
    /// gate entry creation.
    #[must_use]
    pub fn extract_stored(&self, snapshot: &Value) -> Vec<Value> {
        self.stored_fields
            .iter()
            .map(|path| {
                let value = extract_path(snapshot, path);
                if value.is_undefined() {
                    Value::Null
                } else {
                    value
                }
            })
            .collect()
    }
}

/// Resolves a dotted attribute path against a document snapshot.
fn extract_path(snapshot: &Value, path: &str) -> Value {
    let mut current = snapshot;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(value) => current = value,
            None => return Value::Undefined,
        }
    }
    current.clone()
}
