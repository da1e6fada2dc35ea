//! Index entry and range-boundary byte layout.
//!
//! Every index key is laid out as:
//!
//! ```text
//! [1 byte index-kind tag][8-byte BE index id][encoded value tuple][8-byte BE doc id]
//! ```
//!
//! where the trailing document id is present only for non-unique indexes.
//! Unique indexes keep the document id in the entry value instead, which
//! guarantees at most one entry per distinct value tuple; non-unique
//! indexes append it to the key so documents sharing a tuple keep
//! distinct keys.
//!
//! Range boundaries append a minimum- or maximum-sentinel run in place of
//! a field to denote "all values below/above this prefix". The maximum
//! run is 9 bytes so it outlasts any trailing document id.

use crate::error::{CodecError, CodecResult};
use crate::field::{decode_field, encode_field, TAG_MAX_SENTINEL, TAG_MIN_SENTINEL};
use crate::value::Value;
use bytes::{BufMut, BytesMut};

/// Length of the `[kind][index id]` key prefix.
pub(crate) const PREFIX_LEN: usize = 9;
/// Length of an encoded document id.
const DOC_ID_LEN: usize = 8;
/// Max-sentinel run appended to upper/exclusive boundaries. One byte
/// longer than a document id so it sorts above every key continuation.
const MAX_RUN_LEN: usize = DOC_ID_LEN + 1;

/// Physical key layout of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexKeyKind {
    /// Unique index: the value tuple alone is the key.
    Unique = 0x01,
    /// Non-unique index: the document id is appended to the key.
    NonUnique = 0x02,
}

impl IndexKeyKind {
    /// Returns true for the unique layout.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, IndexKeyKind::Unique)
    }
}

impl TryFrom<u8> for IndexKeyKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(IndexKeyKind::Unique),
            0x02 => Ok(IndexKeyKind::NonUnique),
            other => Err(CodecError::UnknownTag {
                tag: other,
                offset: 0,
            }),
        }
    }
}

/// An encoded index entry: the key and its stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEntry {
    /// The substrate key.
    pub key: Vec<u8>,
    /// The substrate value: `[doc id (unique only)][encoded stored tuple]`.
    pub value: Vec<u8>,
}

/// A half-open key range `start <= key < end`.
///
/// `start` and `end` are derived boundary keys, never raw user input.
/// The invariant `start <= end` always holds; an impossible range is
/// represented as an empty range rather than signaled as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBounds {
    start: Vec<u8>,
    end: Vec<u8>,
}

impl KeyBounds {
    /// Creates bounds, clamping an inverted pair to an empty range.
    #[must_use]
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        if start > end {
            let end = start.clone();
            Self { start, end }
        } else {
            Self { start, end }
        }
    }

    /// The full key range of one index.
    #[must_use]
    pub fn full_range(kind: IndexKeyKind, index_id: u64) -> Self {
        let prefix = entry_prefix(kind, index_id);
        let mut start = prefix.to_vec();
        start.push(TAG_MIN_SENTINEL);
        let mut end = prefix.to_vec();
        end.extend(std::iter::repeat(TAG_MAX_SENTINEL).take(MAX_RUN_LEN));
        Self { start, end }
    }

    /// Inclusive start boundary.
    #[must_use]
    pub fn start(&self) -> &[u8] {
        &self.start
    }

    /// Exclusive end boundary.
    #[must_use]
    pub fn end(&self) -> &[u8] {
        &self.end
    }

    /// Returns true if no key can fall inside these bounds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns true if `key` falls inside these bounds.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && key < self.end.as_slice()
    }
}

/// Builds the `[kind][index id]` prefix shared by every key of an index.
#[must_use]
pub fn entry_prefix(kind: IndexKeyKind, index_id: u64) -> [u8; PREFIX_LEN] {
    let mut prefix = [0u8; PREFIX_LEN];
    prefix[0] = kind as u8;
    prefix[1..].copy_from_slice(&index_id.to_be_bytes());
    prefix
}

/// Strips the index prefix from a key, yielding the cache-key portion.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if the key is shorter than a prefix.
pub fn strip_prefix(key: &[u8]) -> CodecResult<&[u8]> {
    key.get(PREFIX_LEN..).ok_or_else(|| CodecError::Truncated {
        offset: key.len(),
        expected: PREFIX_LEN - key.len(),
    })
}

/// Encodes a value tuple on its own, without the index prefix.
///
/// This is the lookup-value form used as a cache key, independent of the
/// physical key layout.
pub fn encode_lookup(tuple: &[Value]) -> CodecResult<Vec<u8>> {
    let mut out = BytesMut::new();
    for value in tuple {
        encode_field(value, &mut out)?;
    }
    Ok(out.to_vec())
}

/// Encodes one index entry.
///
/// # Errors
///
/// Returns an error if any field value is not encodable.
pub fn encode_entry(
    kind: IndexKeyKind,
    index_id: u64,
    tuple: &[Value],
    doc_id: u64,
    stored_values: &[Value],
) -> CodecResult<EncodedEntry> {
    let mut key = BytesMut::with_capacity(PREFIX_LEN + 16 * tuple.len() + DOC_ID_LEN);
    key.put_slice(&entry_prefix(kind, index_id));
    for value in tuple {
        encode_field(value, &mut key)?;
    }

    let mut value = BytesMut::new();
    match kind {
        IndexKeyKind::Unique => value.put_u64(doc_id),
        IndexKeyKind::NonUnique => key.put_u64(doc_id),
    }
    for stored in stored_values {
        encode_field(stored, &mut value)?;
    }

    Ok(EncodedEntry {
        key: key.to_vec(),
        value: value.to_vec(),
    })
}

/// Encodes the boundaries of a key range over one index.
///
/// `low`/`high` are (possibly partial) value tuples; a shorter tuple
/// bounds everything extending it. Inclusivity is realized by sentinel
/// suffixing: an exclusive low or inclusive high boundary appends a
/// maximum-sentinel run that sorts above every continuation of the tuple.
///
/// # Errors
///
/// Returns an error if a boundary value is not encodable.
pub fn encode_bounds(
    kind: IndexKeyKind,
    index_id: u64,
    low: &[Value],
    low_inclusive: bool,
    high: &[Value],
    high_inclusive: bool,
) -> CodecResult<KeyBounds> {
    let prefix = entry_prefix(kind, index_id);

    let mut start = BytesMut::with_capacity(PREFIX_LEN + 16 * low.len());
    start.put_slice(&prefix);
    for value in low {
        encode_field(value, &mut start)?;
    }
    if !low_inclusive {
        start.put_bytes(TAG_MAX_SENTINEL, MAX_RUN_LEN);
    }

    let mut end = BytesMut::with_capacity(PREFIX_LEN + 16 * high.len() + MAX_RUN_LEN);
    end.put_slice(&prefix);
    for value in high {
        encode_field(value, &mut end)?;
    }
    if high_inclusive {
        end.put_bytes(TAG_MAX_SENTINEL, MAX_RUN_LEN);
    }

    Ok(KeyBounds::new(start.to_vec(), end.to_vec()))
}

/// Structured reader over an encoded index key.
///
/// Tracks field boundaries explicitly and rejects malformed input with a
/// codec error instead of misreading trailing bytes.
#[derive(Debug)]
pub struct KeyReader<'a> {
    bytes: &'a [u8],
    kind: IndexKeyKind,
    index_id: u64,
    /// End of the field region (start of the doc id for non-unique keys).
    fields_end: usize,
    offset: usize,
}

impl<'a> KeyReader<'a> {
    /// Opens a reader over an encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is shorter than its fixed regions or
    /// carries an unknown kind tag.
    pub fn new(bytes: &'a [u8]) -> CodecResult<Self> {
        if bytes.len() < PREFIX_LEN {
            return Err(CodecError::Truncated {
                offset: bytes.len(),
                expected: PREFIX_LEN - bytes.len(),
            });
        }
        let kind = IndexKeyKind::try_from(bytes[0])?;
        let mut id_buf = [0u8; 8];
        id_buf.copy_from_slice(&bytes[1..PREFIX_LEN]);

        let fields_end = match kind {
            IndexKeyKind::Unique => bytes.len(),
            IndexKeyKind::NonUnique => {
                if bytes.len() < PREFIX_LEN + DOC_ID_LEN {
                    return Err(CodecError::Truncated {
                        offset: bytes.len(),
                        expected: PREFIX_LEN + DOC_ID_LEN - bytes.len(),
                    });
                }
                bytes.len() - DOC_ID_LEN
            }
        };

        Ok(Self {
            bytes,
            kind,
            index_id: u64::from_be_bytes(id_buf),
            fields_end,
            offset: PREFIX_LEN,
        })
    }

    /// The key's layout kind.
    #[must_use]
    pub fn kind(&self) -> IndexKeyKind {
        self.kind
    }

    /// The key's index id.
    #[must_use]
    pub fn index_id(&self) -> u64 {
        self.index_id
    }

    /// Returns true while fields remain unread.
    #[must_use]
    pub fn has_fields(&self) -> bool {
        self.offset < self.fields_end
    }

    /// Decodes the next field.
    ///
    /// # Errors
    ///
    /// Returns an error if no field remains or a field straddles the doc
    /// id region.
    pub fn next_field(&mut self) -> CodecResult<Value> {
        if !self.has_fields() {
            return Err(CodecError::Truncated {
                offset: self.offset,
                expected: 1,
            });
        }
        let value = decode_field(&self.bytes[..self.fields_end], &mut self.offset)?;
        Ok(value)
    }

    /// Decodes the trailing document id of a non-unique key.
    ///
    /// # Errors
    ///
    /// Returns an error for unique keys, whose document id lives in the
    /// entry value.
    pub fn doc_id(&self) -> CodecResult<u64> {
        match self.kind {
            IndexKeyKind::Unique => Err(CodecError::encoding_failure(
                "unique keys carry no document id",
            )),
            IndexKeyKind::NonUnique => {
                let mut buf = [0u8; DOC_ID_LEN];
                buf.copy_from_slice(&self.bytes[self.fields_end..]);
                Ok(u64::from_be_bytes(buf))
            }
        }
    }
}

/// Decodes the full value tuple of an encoded key.
///
/// # Errors
///
/// Returns an error on truncated or malformed keys.
pub fn decode_value_tuple(key: &[u8]) -> CodecResult<Vec<Value>> {
    let mut reader = KeyReader::new(key)?;
    let mut tuple = Vec::new();
    while reader.has_fields() {
        tuple.push(reader.next_field()?);
    }
    Ok(tuple)
}

/// Decodes the document id of a non-unique key.
///
/// # Errors
///
/// Returns an error on malformed keys or the unique layout.
pub fn decode_doc_id(key: &[u8]) -> CodecResult<u64> {
    KeyReader::new(key)?.doc_id()
}

/// Decodes an entry value into its document id (unique layout only) and
/// stored-values tuple.
///
/// # Errors
///
/// Returns an error on truncated or malformed entry values.
pub fn decode_entry_value(
    kind: IndexKeyKind,
    value: &[u8],
) -> CodecResult<(Option<u64>, Vec<Value>)> {
    let mut offset = 0;
    let doc_id = match kind {
        IndexKeyKind::Unique => {
            let payload = value.get(..DOC_ID_LEN).ok_or(CodecError::Truncated {
                offset: value.len(),
                expected: DOC_ID_LEN - value.len(),
            })?;
            let mut buf = [0u8; DOC_ID_LEN];
            buf.copy_from_slice(payload);
            offset = DOC_ID_LEN;
            Some(u64::from_be_bytes(buf))
        }
        IndexKeyKind::NonUnique => None,
    };

    let mut stored = Vec::new();
    while offset < value.len() {
        stored.push(decode_field(value, &mut offset)?);
    }
    Ok((doc_id, stored))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&n| Value::from(n)).collect()
    }

    #[test]
    fn non_unique_entry_roundtrip() {
        let entry = encode_entry(
            IndexKeyKind::NonUnique,
            7,
            &[Value::from("a"), Value::from(5i64)],
            42,
            &[],
        )
        .unwrap();

        assert_eq!(
            decode_value_tuple(&entry.key).unwrap(),
            vec![Value::from("a"), Value::from(5i64)]
        );
        assert_eq!(decode_doc_id(&entry.key).unwrap(), 42);
        assert!(entry.value.is_empty());
    }

    #[test]
    fn unique_entry_keeps_doc_id_in_value() {
        let entry = encode_entry(IndexKeyKind::Unique, 7, &[Value::from("a")], 42, &[]).unwrap();

        assert!(decode_doc_id(&entry.key).is_err());
        let (doc_id, stored) = decode_entry_value(IndexKeyKind::Unique, &entry.value).unwrap();
        assert_eq!(doc_id, Some(42));
        assert!(stored.is_empty());
    }

    #[test]
    fn stored_values_roundtrip() {
        let stored = vec![Value::from("projected"), Value::Null];
        let entry =
            encode_entry(IndexKeyKind::NonUnique, 7, &[Value::from(1i64)], 1, &stored).unwrap();
        let (doc_id, decoded) = decode_entry_value(IndexKeyKind::NonUnique, &entry.value).unwrap();
        assert_eq!(doc_id, None);
        assert_eq!(decoded, stored);
    }

    #[test]
    fn entries_of_same_tuple_differ_by_doc_id() {
        let a = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[5]), 1, &[]).unwrap();
        let b = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[5]), 2, &[]).unwrap();
        assert_ne!(a.key, b.key);
        assert!(a.key < b.key);
    }

    #[test]
    fn key_order_follows_value_order() {
        let small = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[3]), 9, &[]).unwrap();
        let large = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[4]), 1, &[]).unwrap();
        assert!(small.key < large.key);
    }

    #[test]
    fn indexes_partition_the_key_space() {
        let a = encode_entry(IndexKeyKind::NonUnique, 1, &tuple(&[9]), 1, &[]).unwrap();
        let b = encode_entry(IndexKeyKind::NonUnique, 2, &tuple(&[0]), 1, &[]).unwrap();
        assert!(a.key < b.key);
    }

    #[test]
    fn equality_bounds_cover_all_doc_ids() {
        let bounds = encode_bounds(
            IndexKeyKind::NonUnique,
            7,
            &tuple(&[5]),
            true,
            &tuple(&[5]),
            true,
        )
        .unwrap();

        for doc_id in [0, 1, u64::MAX] {
            let entry = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[5]), doc_id, &[]).unwrap();
            assert!(bounds.contains(&entry.key), "doc id {doc_id}");
        }
        let other = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[6]), 0, &[]).unwrap();
        assert!(!bounds.contains(&other.key));
    }

    #[test]
    fn exclusive_low_skips_every_continuation() {
        let bounds = encode_bounds(
            IndexKeyKind::NonUnique,
            7,
            &tuple(&[5]),
            false,
            &tuple(&[9]),
            true,
        )
        .unwrap();

        for doc_id in [0, u64::MAX] {
            let at_five =
                encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[5]), doc_id, &[]).unwrap();
            assert!(!bounds.contains(&at_five.key), "doc id {doc_id}");
        }
        let at_six = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[6]), 0, &[]).unwrap();
        assert!(bounds.contains(&at_six.key));
    }

    #[test]
    fn exclusive_high_excludes_unique_point() {
        let bounds = encode_bounds(
            IndexKeyKind::Unique,
            7,
            &tuple(&[1]),
            true,
            &tuple(&[5]),
            false,
        )
        .unwrap();

        let at_five = encode_entry(IndexKeyKind::Unique, 7, &tuple(&[5]), 1, &[]).unwrap();
        assert!(!bounds.contains(&at_five.key));
        let at_four = encode_entry(IndexKeyKind::Unique, 7, &tuple(&[4]), 1, &[]).unwrap();
        assert!(bounds.contains(&at_four.key));
        let at_one = encode_entry(IndexKeyKind::Unique, 7, &tuple(&[1]), 1, &[]).unwrap();
        assert!(bounds.contains(&at_one.key));
    }

    #[test]
    fn partial_tuple_bounds_cover_extensions() {
        // Constrain only the first of two fields.
        let bounds = encode_bounds(
            IndexKeyKind::NonUnique,
            7,
            &[Value::from("a")],
            true,
            &[Value::from("a")],
            true,
        )
        .unwrap();

        let extended = encode_entry(
            IndexKeyKind::NonUnique,
            7,
            &[Value::from("a"), Value::from(999i64)],
            3,
            &[],
        )
        .unwrap();
        assert!(bounds.contains(&extended.key));

        let other = encode_entry(
            IndexKeyKind::NonUnique,
            7,
            &[Value::from("b"), Value::from(0i64)],
            3,
            &[],
        )
        .unwrap();
        assert!(!bounds.contains(&other.key));
    }

    #[test]
    fn inverted_bounds_become_empty() {
        let bounds = encode_bounds(
            IndexKeyKind::NonUnique,
            7,
            &tuple(&[9]),
            true,
            &tuple(&[1]),
            true,
        )
        .unwrap();
        assert!(bounds.is_empty());
    }

    #[test]
    fn full_range_brackets_entries() {
        let bounds = KeyBounds::full_range(IndexKeyKind::NonUnique, 7);
        let entry = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[0]), 0, &[]).unwrap();
        assert!(bounds.contains(&entry.key));
    }

    #[test]
    fn reader_rejects_truncated_keys() {
        assert!(KeyReader::new(&[0x02, 0, 0]).is_err());
        let entry = encode_entry(IndexKeyKind::NonUnique, 7, &tuple(&[5]), 1, &[]).unwrap();
        // Chop into the doc id region: the tuple no longer parses cleanly.
        let chopped = &entry.key[..entry.key.len() - 3];
        assert!(decode_value_tuple(chopped).is_err());
    }

    #[test]
    fn reader_rejects_unknown_kind() {
        let mut key = vec![0x77];
        key.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            KeyReader::new(&key),
            Err(CodecError::UnknownTag { .. })
        ));
    }

    #[test]
    fn lookup_encoding_matches_stripped_key() {
        let values = [Value::from("a"), Value::from(5i64)];
        let entry = encode_entry(IndexKeyKind::Unique, 7, &values, 1, &[]).unwrap();
        let lookup = encode_lookup(&values).unwrap();
        assert_eq!(strip_prefix(&entry.key).unwrap(), lookup.as_slice());
    }
}
