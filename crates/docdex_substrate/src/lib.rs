//! # DocDex Substrate
//!
//! Ordered byte-keyed storage substrate for the DocDex index engine.
//!
//! This crate defines the storage interface the index engine consumes:
//! point reads under a snapshot, atomic write batches, and bidirectional
//! cursors over key ranges. It also provides [`MemorySubstrate`], an
//! in-memory implementation with snapshot isolation used by tests and
//! ephemeral deployments.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod substrate;

pub use error::{SubstrateError, SubstrateResult};
pub use memory::MemorySubstrate;
pub use substrate::{BatchOp, Cursor, ReadOptions, Snapshot, Substrate, WriteBatch};
