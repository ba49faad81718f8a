//! # Value Codec
//!
//! Purpose: Convert `CacheValue` to and from a compact, self-describing binary
//! form for storage in the remote key-value store.
//!
//! ## Design Principles
//!
//! 1. **Pure Transform**: No keys, expiry, or I/O. Testable without a server.
//! 2. **Tagged Layout**: Every value starts with a one-byte tag, so unknown
//!    input fails with `UnknownTag` instead of being misread.
//! 3. **Compact Integers**: Lengths and integers use LEB128 varints; signed
//!    integers are zigzag-encoded first.
//! 4. **Untrusted Input**: Decode never pre-allocates more than the bytes left
//!    in the buffer and bounds recursion with `MAX_DEPTH`.
//! 5. **Symmetric Limits**: Encode enforces the same `MAX_DEPTH`, so anything
//!    that encodes also decodes.
//!
//! ## Wire Layout
//!
//! ```text
//! Payload:
//! +----------+------------+-------------+
//! | magic:1B | version:1B | value:...   |
//! +----------+------------+-------------+
//!
//! Value:
//! +--------+------------------------------------------------+
//! | tag:1B | body                                           |
//! +--------+------------------------------------------------+
//! 0x00 nil     (no body)
//! 0x01 false   (no body)
//! 0x02 true    (no body)
//! 0x03 int     zigzag varint
//! 0x04 uint    varint
//! 0x05 float   8B big-endian IEEE-754 bits
//! 0x06 str     varint len + utf-8
//! 0x07 bytes   varint len + raw
//! 0x08 chars   varint len + utf-8
//! 0x09 list    varint count + values
//! 0x0a record  varint count + (varint len + utf-8 name, value)*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};
use crate::value::{CacheValue, Shape};

/// First byte of every encoded payload.
pub const CODEC_MAGIC: u8 = 0xCF;

/// Layout version written after the magic byte.
pub const CODEC_VERSION: u8 = 1;

/// Maximum container nesting accepted by both encoder and decoder.
///
/// Values nested deeper than this are outside the supported family and fail
/// with [`CodecError::TooDeep`].
pub const MAX_DEPTH: usize = 64;

const TAG_NIL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_UINT: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_STR: u8 = 0x06;
const TAG_BYTES: u8 = 0x07;
const TAG_CHARS: u8 = 0x08;
const TAG_LIST: u8 = 0x09;
const TAG_RECORD: u8 = 0x0a;

/// Encodes a value into a new buffer.
pub fn encode(value: &CacheValue) -> CodecResult<Bytes> {
    let mut out = BytesMut::with_capacity(64);
    encode_into(value, &mut out)?;
    Ok(out.freeze())
}

/// Appends the encoded payload (header included) to `out`.
///
/// On error `out` is left as it was.
pub fn encode_into(value: &CacheValue, out: &mut BytesMut) -> CodecResult<()> {
    let start = out.len();
    out.put_u8(CODEC_MAGIC);
    out.put_u8(CODEC_VERSION);
    if let Err(err) = write_value(value, out, 0) {
        out.truncate(start);
        return Err(err);
    }
    Ok(())
}

/// Decodes a payload produced by [`encode`].
pub fn decode(mut input: &[u8]) -> CodecResult<CacheValue> {
    let magic = read_u8(&mut input)?;
    if magic != CODEC_MAGIC {
        return Err(CodecError::BadMagic { found: magic });
    }
    let version = read_u8(&mut input)?;
    if version != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let value = read_value(&mut input, 0)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.len()));
    }
    Ok(value)
}

/// Decodes a payload and requires the top-level value to have `shape`.
pub fn decode_as(input: &[u8], shape: Shape) -> CodecResult<CacheValue> {
    let value = decode(input)?;
    let found = value.shape();
    if !shape.accepts(found) {
        return Err(CodecError::ShapeMismatch {
            expected: shape,
            found,
        });
    }
    Ok(value)
}

fn write_value(value: &CacheValue, out: &mut BytesMut, depth: usize) -> CodecResult<()> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep(MAX_DEPTH));
    }

    match value {
        CacheValue::Nil => out.put_u8(TAG_NIL),
        CacheValue::Bool(false) => out.put_u8(TAG_FALSE),
        CacheValue::Bool(true) => out.put_u8(TAG_TRUE),
        CacheValue::Int(v) => {
            out.put_u8(TAG_INT);
            put_varint(out, zigzag(*v));
        }
        CacheValue::UInt(v) => {
            out.put_u8(TAG_UINT);
            put_varint(out, *v);
        }
        CacheValue::Float(v) => {
            out.put_u8(TAG_FLOAT);
            out.put_u64(v.to_bits());
        }
        CacheValue::Str(s) => {
            out.put_u8(TAG_STR);
            put_len_prefixed(out, s.as_bytes());
        }
        CacheValue::Bytes(data) => {
            out.put_u8(TAG_BYTES);
            put_len_prefixed(out, data);
        }
        CacheValue::Chars(chars) => {
            out.put_u8(TAG_CHARS);
            let text: String = chars.iter().collect();
            put_len_prefixed(out, text.as_bytes());
        }
        CacheValue::List(items) => {
            out.put_u8(TAG_LIST);
            put_varint(out, items.len() as u64);
            for item in items {
                write_value(item, out, depth + 1)?;
            }
        }
        CacheValue::Record(fields) => {
            out.put_u8(TAG_RECORD);
            put_varint(out, fields.len() as u64);
            for (name, item) in fields {
                put_len_prefixed(out, name.as_bytes());
                write_value(item, out, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn read_value(input: &mut &[u8], depth: usize) -> CodecResult<CacheValue> {
    if depth > MAX_DEPTH {
        return Err(CodecError::TooDeep(MAX_DEPTH));
    }

    let tag = read_u8(input)?;
    let value = match tag {
        TAG_NIL => CacheValue::Nil,
        TAG_FALSE => CacheValue::Bool(false),
        TAG_TRUE => CacheValue::Bool(true),
        TAG_INT => CacheValue::Int(unzigzag(read_varint(input)?)),
        TAG_UINT => CacheValue::UInt(read_varint(input)?),
        TAG_FLOAT => {
            ensure(input, 8)?;
            CacheValue::Float(f64::from_bits(input.get_u64()))
        }
        TAG_STR => CacheValue::Str(read_string(input)?),
        TAG_BYTES => {
            let len = read_len(input)?;
            CacheValue::Bytes(take(input, len)?.to_vec())
        }
        TAG_CHARS => CacheValue::Chars(read_string(input)?.chars().collect()),
        TAG_LIST => {
            let count = read_len(input)?;
            // Every item needs at least its tag byte.
            let mut items = Vec::with_capacity(count.min(input.len()));
            for _ in 0..count {
                items.push(read_value(input, depth + 1)?);
            }
            CacheValue::List(items)
        }
        TAG_RECORD => {
            let count = read_len(input)?;
            let mut fields = Vec::with_capacity(count.min(input.len() / 2));
            for _ in 0..count {
                let name = read_string(input)?;
                let item = read_value(input, depth + 1)?;
                fields.push((name, item));
            }
            CacheValue::Record(fields)
        }
        other => return Err(CodecError::UnknownTag(other)),
    };
    Ok(value)
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn put_varint(out: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        out.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

fn put_len_prefixed(out: &mut BytesMut, data: &[u8]) {
    put_varint(out, data.len() as u64);
    out.put_slice(data);
}

fn ensure(input: &[u8], len: usize) -> CodecResult<()> {
    if input.remaining() < len {
        return Err(CodecError::Truncated {
            needed: len - input.remaining(),
        });
    }
    Ok(())
}

fn read_u8(input: &mut &[u8]) -> CodecResult<u8> {
    ensure(input, 1)?;
    Ok(input.get_u8())
}

fn read_varint(input: &mut &[u8]) -> CodecResult<u64> {
    let mut result = 0u64;
    for idx in 0..10 {
        let byte = read_u8(input)?;
        let part = (byte & 0x7f) as u64;
        // The tenth byte may only carry the top bit of a u64.
        if idx == 9 && part > 1 {
            return Err(CodecError::BadVarint);
        }
        result |= part << (7 * idx);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(CodecError::BadVarint)
}

fn read_len(input: &mut &[u8]) -> CodecResult<usize> {
    usize::try_from(read_varint(input)?).map_err(|_| CodecError::BadVarint)
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> CodecResult<&'a [u8]> {
    ensure(input, len)?;
    let slice: &'a [u8] = *input;
    let (head, tail) = slice.split_at(len);
    *input = tail;
    Ok(head)
}

fn read_string(input: &mut &[u8]) -> CodecResult<String> {
    let len = read_len(input)?;
    let raw = take(input, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}
