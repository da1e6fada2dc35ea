//! Collection-name prefix compression for lookup values.
//!
//! Edge-style lookup values are strings of the form `collection/key`,
//! and the collection segment repeats across millions of entries. When
//! the collection name is registered in the process-wide name table,
//! the segment is replaced by a marker byte and a table ordinal:
//!
//! ```text
//! [0xFF][4-byte BE ordinal][key bytes]
//! ```
//!
//! `0xFF` never occurs in UTF-8 text, so compressed and raw forms are
//! unambiguous. Values whose collection is not registered are stored as
//! raw UTF-8.
//!
//! The name table is initialized once per process. Concurrent
//! registrations race; the first to publish wins and every loser
//! discards its candidate and reads the winner's table back. Lookup
//! values compressed by one registration therefore always decompress
//! against the same table.

use crate::error::{CodecError, CodecResult};
use std::sync::OnceLock;

/// Marker byte that opens a compressed lookup value.
pub const PREFIX_MARKER: u8 = 0xFF;

static COLLECTIONS: OnceLock<Vec<String>> = OnceLock::new();

/// Registers the process-wide collection-name table.
///
/// The first registration wins; later calls (and race losers) have no
/// effect. Returns the table actually in force.
pub fn register_collections<I, S>(names: I) -> &'static [String]
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    COLLECTIONS
        .get_or_init(|| names.into_iter().map(Into::into).collect())
        .as_slice()
}

fn collections() -> Option<&'static [String]> {
    COLLECTIONS.get().map(Vec::as_slice)
}

/// Compresses a lookup value by replacing a registered leading
/// `collection/` segment with its table ordinal.
///
/// Values without a registered collection segment are returned as raw
/// UTF-8 bytes.
#[must_use]
pub fn compress_lookup(value: &str) -> Vec<u8> {
    if let Some(table) = collections() {
        for (ordinal, name) in table.iter().enumerate() {
            let Some(tail) = value.strip_prefix(name.as_str()) else {
                continue;
            };
            let Some(key) = tail.strip_prefix('/') else {
                continue;
            };
            let Ok(ordinal) = u32::try_from(ordinal) else {
                break;
            };
            let mut out = Vec::with_capacity(5 + key.len());
            out.push(PREFIX_MARKER);
            out.extend_from_slice(&ordinal.to_be_bytes());
            out.extend_from_slice(key.as_bytes());
            return out;
        }
    }
    value.as_bytes().to_vec()
}

/// Reverses [`compress_lookup`].
///
/// # Errors
///
/// Returns an error if a compressed value names an ordinal outside the
/// registered table, if no table has been registered, or if the bytes
/// are not valid UTF-8.
pub fn decompress_lookup(bytes: &[u8]) -> CodecResult<String> {
    if bytes.first() != Some(&PREFIX_MARKER) {
        return String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::encoding_failure("lookup value is not valid UTF-8"));
    }

    let ordinal_bytes = bytes.get(1..5).ok_or_else(|| CodecError::Truncated {
        offset: bytes.len(),
        expected: 5 - bytes.len(),
    })?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(ordinal_bytes);
    let ordinal = u32::from_be_bytes(buf) as usize;

    let table = collections().ok_or_else(|| {
        CodecError::encoding_failure("compressed lookup value without a registered name table")
    })?;
    let name = table.get(ordinal).ok_or_else(|| {
        CodecError::encoding_failure(format!("unregistered collection ordinal {ordinal}"))
    })?;

    let key = std::str::from_utf8(&bytes[5..])
        .map_err(|_| CodecError::encoding_failure("lookup key is not valid UTF-8"))?;
    Ok(format!("{name}/{key}"))
}
