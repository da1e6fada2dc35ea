//! Order-preserving field encoding.
//!
//! Each field is a type tag followed by a self-delimiting, prefix-free
//! payload. Tags ascend in the database type order so that comparing two
//! encoded fields bytewise equals [`Value::cmp_order`]:
//!
//! | tag  | meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0x00 | minimum sentinel (range boundaries only)            |
//! | 0x01 | undefined                                           |
//! | 0x02 | null                                                |
//! | 0x03 | false                                               |
//! | 0x04 | true                                                |
//! | 0x05 | number, 8-byte big-endian order-transformed IEEE754 |
//! | 0x06 | string, 0x00-escaped bytes + 0x00 0x00 terminator   |
//! | 0x07 | array, encoded elements + 0x00 terminator           |
//! | 0x08 | object, (key string, value)* + 0x00 terminator      |
//! | 0xFF | maximum sentinel (range boundaries only)            |
//!
//! The 0x00 terminator sorts below every element tag, so a shorter
//! array/object with an equal prefix sorts first, matching the value order.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use bytes::{BufMut, BytesMut};

/// Tag of the synthetic minimum sentinel. Sorts below every real field.
pub const TAG_MIN_SENTINEL: u8 = 0x00;
const TAG_UNDEFINED: u8 = 0x01;
const TAG_NULL: u8 = 0x02;
const TAG_FALSE: u8 = 0x03;
const TAG_TRUE: u8 = 0x04;
const TAG_NUMBER: u8 = 0x05;
const TAG_STRING: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;
const TAG_OBJECT: u8 = 0x08;
/// Tag of the synthetic maximum sentinel. Sorts above every real field.
pub const TAG_MAX_SENTINEL: u8 = 0xFF;

/// Terminator byte closing strings, arrays and objects.
const TERMINATOR: u8 = 0x00;
/// Escape byte following 0x00 inside string payloads.
const ESCAPE: u8 = 0xFF;

/// Returns the encoded minimum sentinel field.
#[must_use]
pub fn encoded_min_sentinel() -> [u8; 1] {
    [TAG_MIN_SENTINEL]
}

/// Returns the encoded maximum sentinel field.
#[must_use]
pub fn encoded_max_sentinel() -> [u8; 1] {
    [TAG_MAX_SENTINEL]
}

/// Encodes one field value into `out`.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailure`] for NaN numbers, which have no
/// place in a total order.
pub fn encode_field(value: &Value, out: &mut BytesMut) -> CodecResult<()> {
    match value {
        Value::Undefined => out.put_u8(TAG_UNDEFINED),
        Value::Null => out.put_u8(TAG_NULL),
        Value::Bool(false) => out.put_u8(TAG_FALSE),
        Value::Bool(true) => out.put_u8(TAG_TRUE),
        Value::Number(n) => {
            if n.is_nan() {
                return Err(CodecError::encoding_failure("NaN is not encodable"));
            }
            out.put_u8(TAG_NUMBER);
            out.put_u64(order_transform(*n));
        }
        Value::String(s) => {
            out.put_u8(TAG_STRING);
            put_escaped(s.as_bytes(), out);
        }
        Value::Array(elements) => {
            out.put_u8(TAG_ARRAY);
            for element in elements {
                encode_field(element, out)?;
            }
            out.put_u8(TERMINATOR);
        }
        Value::Object(entries) => {
            out.put_u8(TAG_OBJECT);
            for (key, entry_value) in entries {
                out.put_u8(TAG_STRING);
                put_escaped(key.as_bytes(), out);
                encode_field(entry_value, out)?;
            }
            out.put_u8(TERMINATOR);
        }
    }
    Ok(())
}

/// Decodes one field starting at `*offset`, advancing the offset past it.
///
/// # Errors
///
/// Returns an error on truncated input, unknown tags, or sentinel tags,
/// which are legal only inside range boundaries.
pub fn decode_field(bytes: &[u8], offset: &mut usize) -> CodecResult<Value> {
    let tag = *bytes.get(*offset).ok_or(CodecError::Truncated {
        offset: *offset,
        expected: 1,
    })?;
    *offset += 1;

    match tag {
        TAG_UNDEFINED => Ok(Value::Undefined),
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_NUMBER => {
            let end = *offset + 8;
            let payload = bytes.get(*offset..end).ok_or(CodecError::Truncated {
                offset: *offset,
                expected: 8,
            })?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(payload);
            *offset = end;
            Ok(Value::Number(order_restore(u64::from_be_bytes(buf))))
        }
        TAG_STRING => {
            let raw = take_escaped(bytes, offset)?;
            let text = String::from_utf8(raw)
                .map_err(|_| CodecError::encoding_failure("string field is not valid UTF-8"))?;
            Ok(Value::String(text))
        }
        TAG_ARRAY => {
            let mut elements = Vec::new();
            loop {
                match bytes.get(*offset) {
                    Some(&TERMINATOR) => {
                        *offset += 1;
                        return Ok(Value::Array(elements));
                    }
                    Some(_) => elements.push(decode_field(bytes, offset)?),
                    None => {
                        return Err(CodecError::Truncated {
                            offset: *offset,
                            expected: 1,
                        })
                    }
                }
            }
        }
        TAG_OBJECT => {
            let mut entries = Vec::new();
            loop {
                match bytes.get(*offset) {
                    Some(&TERMINATOR) => {
                        *offset += 1;
                        return Ok(Value::Object(entries));
                    }
                    Some(&TAG_STRING) => {
                        *offset += 1;
                        let raw = take_escaped(bytes, offset)?;
                        let key = String::from_utf8(raw).map_err(|_| {
                            CodecError::encoding_failure("object key is not valid UTF-8")
                        })?;
                        let entry_value = decode_field(bytes, offset)?;
                        entries.push((key, entry_value));
                    }
                    Some(&other) => {
                        return Err(CodecError::UnknownTag {
                            tag: other,
                            offset: *offset,
                        })
                    }
                    None => {
                        return Err(CodecError::Truncated {
                            offset: *offset,
                            expected: 1,
                        })
                    }
                }
            }
        }
        other => Err(CodecError::UnknownTag {
            tag: other,
            offset: *offset - 1,
        }),
    }
}

/// Maps IEEE754 bits so that big-endian byte order equals numeric order.
///
/// Non-negative numbers get the sign bit set; negative numbers get all
/// bits flipped.
fn order_transform(n: f64) -> u64 {
    let bits = n.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// Inverse of [`order_transform`].
fn order_restore(ordered: u64) -> f64 {
    let bits = if ordered & (1 << 63) != 0 {
        ordered ^ (1 << 63)
    } else {
        !ordered
    };
    f64::from_bits(bits)
}

/// Writes `raw` with 0x00 escaped as 0x00 0xFF, then a 0x00 0x00 terminator.
///
/// The terminator sorts below any escaped continuation, so shorter strings
/// sort before their extensions.
fn put_escaped(raw: &[u8], out: &mut BytesMut) {
    for &byte in raw {
        if byte == TERMINATOR {
            out.put_u8(TERMINATOR);
            out.put_u8(ESCAPE);
        } else {
            out.put_u8(byte);
        }
    }
    out.put_u8(TERMINATOR);
    out.put_u8(TERMINATOR);
}

/// Reads an escaped byte sequence up to its terminator.
fn take_escaped(bytes: &[u8], offset: &mut usize) -> CodecResult<Vec<u8>> {
    let mut raw = Vec::new();
    loop {
        let byte = *bytes.get(*offset).ok_or(CodecError::Truncated {
            offset: *offset,
            expected: 2,
        })?;
        if byte != TERMINATOR {
            raw.push(byte);
            *offset += 1;
            continue;
        }
        let follow = *bytes.get(*offset + 1).ok_or(CodecError::Truncated {
            offset: *offset + 1,
            expected: 1,
        })?;
        *offset += 2;
        match follow {
            ESCAPE => raw.push(TERMINATOR),
            TERMINATOR => return Ok(raw),
            other => {
                return Err(CodecError::encoding_failure(format!(
                    "invalid escape byte {other:#04x} in string field"
                )))
            }
        }
    }
}
