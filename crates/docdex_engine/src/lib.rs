//! # DocDex Engine
//!
//! Secondary-index engine for DocDex.
//!
//! This crate provides:
//! - [`IndexDefinition`] and [`SecondaryIndex`], the transactional index
//!   maintainer over an ordered byte-keyed substrate
//! - [`SearchCondition`] and the condition compiler turning per-field
//!   constraints into disjoint key ranges
//! - The cache-fronted [`IndexCursor`] iterator family
//! - [`LookupCache`], a sharded, size-gated LZ4 lookup cache
//! - [`CardinalityEstimator`] backing the planner's selectivity queries
//!
//! Documents themselves live behind the [`DocumentStore`] trait; the
//! engine only reads them to extract indexed fields and to name owners
//! in unique-constraint errors.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod compiler;
mod condition;
mod definition;
mod document;
mod error;
mod estimator;
mod index;
mod iterator;
mod postings;
mod types;

pub use cache::{open_payload, CacheConfig, LookupCache};
pub use compiler::{compile, CompiledCondition, CompiledRange, RangeFormat};
pub use condition::{Comparator, SearchCondition};
pub use definition::IndexDefinition;
pub use document::{DocumentSnapshot, DocumentStore, MemoryDocumentStore};
pub use error::{EngineError, EngineResult};
pub use estimator::CardinalityEstimator;
pub use index::{CostEstimate, IndexTransaction, SecondaryIndex};
pub use iterator::{
    new_cursor, EqualityIterator, InExpansionIterator, IndexCursor, RangeScanIterator,
    ScanContext, UniquePointIterator,
};
pub use postings::{decode_postings, encode_postings, Posting};
pub use types::{DocumentId, IndexId, ScanDirection};
