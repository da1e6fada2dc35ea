//! # DocDex Codec
//!
//! Order-preserving index key codec for DocDex.
//!
//! This crate provides:
//! - The [`Value`] model with the database's total value order
//! - An order-preserving field encoding (byte order == value order)
//! - The index entry and range-boundary byte layouts
//! - Reversible collection-name prefix compression for edge-style lookups
//!
//! The encoding is bit-exact on-disk format: changing it invalidates every
//! persisted index.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod field;
mod prefix;
mod value;

pub use entry::{
    decode_doc_id, decode_entry_value, decode_value_tuple, encode_bounds, encode_entry,
    encode_lookup, entry_prefix, strip_prefix, EncodedEntry, IndexKeyKind, KeyBounds, KeyReader,
};
pub use error::{CodecError, CodecResult};
pub use field::{
    decode_field, encode_field, encoded_max_sentinel, encoded_min_sentinel, TAG_MAX_SENTINEL,
    TAG_MIN_SENTINEL,
};
pub use prefix::{compress_lookup, decompress_lookup, register_collections, PREFIX_MARKER};
pub use value::Value;
