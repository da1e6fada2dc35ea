//! Resolved lookup results and their serialized form.

use crate::error::EngineResult;
use crate::types::DocumentId;
use bytes::{BufMut, BytesMut};
use docdex_codec::{decode_field, encode_field, CodecError, Value};

/// One resolved index hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// The matching document.
    pub doc_id: DocumentId,
    /// The indexed value tuple of the matching entry.
    pub tuple: Vec<Value>,
    /// Stored values materialized in the entry, if the index has any.
    pub stored: Vec<Value>,
}

/// Serializes a postings list.
///
/// Layout: `[4-byte BE count]` then per posting `[8-byte BE doc id]
/// [4-byte BE tuple arity][fields][4-byte BE stored arity][fields]`.
/// The leading count makes raw payloads distinguishable from compressed
/// ones: a count can never reach `0xFF000000`, so a raw payload never
/// starts with the compression marker byte.
///
/// # Errors
///
/// Returns an error if a field value is not encodable.
pub fn encode_postings(postings: &[Posting]) -> EngineResult<Vec<u8>> {
    let mut out = BytesMut::with_capacity(4 + 32 * postings.len());
    out.put_u32(u32::try_from(postings.len()).map_err(|_| {
        CodecError::encoding_failure("postings list exceeds the serializable count")
    })?);
    for posting in postings {
        out.put_u64(posting.doc_id.as_u64());
        put_tuple(&posting.tuple, &mut out)?;
        put_tuple(&posting.stored, &mut out)?;
    }
    Ok(out.to_vec())
}

/// Reverses [`encode_postings`].
///
/// # Errors
///
/// Returns an error on truncated or malformed payloads.
pub fn decode_postings(bytes: &[u8]) -> EngineResult<Vec<Posting>> {
    let mut offset = 0;
    let count = take_u32(bytes, &mut offset)? as usize;
    let mut postings = Vec::with_capacity(count);
    for _ in 0..count {
        let doc_id = DocumentId::new(take_u64(bytes, &mut offset)?);
        let tuple = take_tuple(bytes, &mut offset)?;
        let stored = take_tuple(bytes, &mut offset)?;
        postings.push(Posting {
            doc_id,
            tuple,
            stored,
        });
    }
    Ok(postings)
}

fn put_tuple(tuple: &[Value], out: &mut BytesMut) -> EngineResult<()> {
    out.put_u32(
        u32::try_from(tuple.len())
            .map_err(|_| CodecError::encoding_failure("tuple arity exceeds the encodable range"))?,
    );
    for value in tuple {
        encode_field(value, out)?;
    }
    Ok(())
}

fn take_tuple(bytes: &[u8], offset: &mut usize) -> EngineResult<Vec<Value>> {
    let arity = take_u32(bytes, offset)? as usize;
    let mut tuple = Vec::with_capacity(arity);
    for _ in 0..arity {
        tuple.push(decode_field(bytes, offset)?);
    }
    Ok(tuple)
}

fn take_u32(bytes: &[u8], offset: &mut usize) -> EngineResult<u32> {
    let slice = bytes
        .get(*offset..*offset + 4)
        .ok_or(CodecError::Truncated {
            offset: *offset,
            expected: 4,
        })?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    *offset += 4;
    Ok(u32::from_be_bytes(buf))
}

fn take_u64(bytes: &[u8], offset: &mut usize) -> EngineResult<u64> {
    let slice = bytes
        .get(*offset..*offset + 8)
        .ok_or(CodecError::Truncated {
            offset: *offset,
            expected: 8,
        })?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    *offset += 8;
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(id: u64) -> Posting {
        Posting {
            doc_id: DocumentId::new(id),
            tuple: vec![Value::from("a"), Value::from(5i64)],
            stored: vec![Value::Null],
        }
    }

    #[test]
    fn postings_roundtrip() {
        let postings = vec![posting(1), posting(2)];
        let bytes = encode_postings(&postings).unwrap();
        assert_eq!(decode_postings(&bytes).unwrap(), postings);
    }

    #[test]
    fn empty_list_roundtrips() {
        let bytes = encode_postings(&[]).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(decode_postings(&bytes).unwrap().is_empty());
    }

    #[test]
    fn raw_payload_never_starts_with_marker() {
        let bytes = encode_postings(&[posting(1)]).unwrap();
        assert_ne!(bytes[0], 0xFF);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = encode_postings(&[posting(1)]).unwrap();
        assert!(decode_postings(&bytes[..bytes.len() - 2]).is_err());
    }
}
