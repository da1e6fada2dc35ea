//! Document store interface consumed by the index engine.

use crate::error::EngineResult;
use crate::types::DocumentId;
use docdex_codec::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A document's current state as seen by the index engine.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    /// Structured attribute values.
    pub attributes: Value,
    /// Revision of the snapshot.
    pub revision: u64,
    /// User-facing primary key, named in conflict errors.
    pub primary_key: String,
}

/// Read access to document bodies.
///
/// The maintainer extracts indexed fields through this interface and
/// resolves the owning document's primary key when reporting a unique
/// constraint violation.
pub trait DocumentStore: Send + Sync {
    /// Fetches the current snapshot of a document, or `None` if it does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn fetch(&self, id: DocumentId) -> EngineResult<Option<DocumentSnapshot>>;
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, DocumentSnapshot>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or replaces a document.
    pub fn put(&self, id: DocumentId, snapshot: DocumentSnapshot) {
        self.documents.write().insert(id, snapshot);
    }

    /// Removes a document.
    pub fn remove(&self, id: DocumentId) {
        self.documents.write().remove(&id);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn fetch(&self, id: DocumentId) -> EngineResult<Option<DocumentSnapshot>> {
        Ok(self.documents.read().get(&id).cloned())
    }
}
