//! Core type definitions for the index engine.

use std::fmt;

/// Unique identifier for an index.
///
/// Index ids partition the substrate key space; every key of an index
/// starts with its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(pub u64);

impl IndexId {
    /// Creates a new index ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx:{}", self.0)
    }
}

/// Unique identifier for a document.
///
/// Document ids are assigned by the document store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(pub u64);

impl DocumentId {
    /// Creates a new document ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc:{}", self.0)
    }
}

/// Traversal direction of an index scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDirection {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

impl ScanDirection {
    /// Returns true for descending traversal.
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        matches!(self, ScanDirection::Reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_ordering() {
        assert!(DocumentId::new(1) < DocumentId::new(2));
    }

    #[test]
    fn index_id_display() {
        assert_eq!(format!("{}", IndexId::new(42)), "idx:42");
    }

    #[test]
    fn direction_default_is_forward() {
        assert!(!ScanDirection::default().is_reverse());
    }
}
