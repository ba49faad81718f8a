//! Incremental RESP2 request parser.
//!
//! Requests arrive as arrays of bulk strings. Bytes stay in the buffer until a
//! whole request is available, so a partial read never loses data.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Longest header line accepted before the request is rejected.
const MAX_HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("protocol error")]
pub struct ProtocolError;

/// Parses one request from the front of `buffer`.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn parse_request(buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    let data = &buffer[..];
    let mut pos = 0;

    let count = match read_header(data, &mut pos, b'*')? {
        Some(count) => count,
        None => return Ok(None),
    };

    let mut args = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        let len = match read_header(data, &mut pos, b'$')? {
            Some(len) => len,
            None => return Ok(None),
        };
        let end = pos + len;
        if data.len() < end + 2 {
            return Ok(None);
        }
        if &data[end..end + 2] != b"\r\n" {
            return Err(ProtocolError);
        }
        args.push(data[pos..end].to_vec());
        pos = end + 2;
    }

    buffer.advance(pos);
    Ok(Some(args))
}

fn read_header(data: &[u8], pos: &mut usize, prefix: u8) -> Result<Option<usize>, ProtocolError> {
    let Some(&first) = data.get(*pos) else {
        return Ok(None);
    };
    if first != prefix {
        return Err(ProtocolError);
    }

    let rest = &data[*pos + 1..];
    let Some(end) = rest.windows(2).position(|window| window == b"\r\n") else {
        return if rest.len() > MAX_HEADER_LEN {
            Err(ProtocolError)
        } else {
            Ok(None)
        };
    };

    let digits = &rest[..end];
    if digits.is_empty()
        || digits.len() > MAX_HEADER_LEN
        || !digits.iter().all(u8::is_ascii_digit)
    {
        return Err(ProtocolError);
    }
    let value = digits
        .iter()
        .fold(0usize, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as usize));

    *pos += 1 + end + 2;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_complete_request() {
        let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$1\r"[..]);
        assert_eq!(parse_request(&mut buffer), Ok(None));
        assert_eq!(buffer.len(), 16);

        buffer.extend_from_slice(b"\nk\r\n*1\r\n$4\r\nPING\r\n");
        let first = parse_request(&mut buffer).unwrap().unwrap();
        assert_eq!(first, vec![b"GET".to_vec(), b"k".to_vec()]);
        let second = parse_request(&mut buffer).unwrap().unwrap();
        assert_eq!(second, vec![b"PING".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_inline_commands() {
        let mut buffer = BytesMut::from(&b"PING\r\n"[..]);
        assert_eq!(parse_request(&mut buffer), Err(ProtocolError));
    }

    #[test]
    fn rejects_bad_bulk_terminator() {
        let mut buffer = BytesMut::from(&b"*1\r\n$1\r\nab\r\n"[..]);
        assert_eq!(parse_request(&mut buffer), Err(ProtocolError));
    }
}
