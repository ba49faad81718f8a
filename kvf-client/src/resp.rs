//! # RESP2 Commands and Replies
//!
//! Purpose: Build client commands and parse server replies for the RESP2 wire
//! protocol, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Owned Commands**: A `Command` owns its arguments so it can be queued
//!    for the pipeline dispatcher on another thread.
//! 2. **Buffer Reuse**: Encoding appends to a caller-provided `BytesMut`;
//!    parsing reuses a caller-provided line buffer.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::fmt;
use std::io::BufRead;

use bytes::{BufMut, BytesMut};

use crate::error::{ClientError, ClientResult};

/// A single command: name followed by binary-safe arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with the given name, e.g. `Command::new("GET")`.
    pub fn new(name: &str) -> Self {
        Command {
            args: vec![name.as_bytes().to_vec()],
        }
    }

    /// Appends a binary argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Appends an unsigned integer argument in decimal form.
    pub fn arg_u64(self, value: u64) -> Self {
        let (digits, len) = encode_u64(value);
        self.arg(&digits[..len])
    }

    /// Command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    pub(crate) fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name()).into_owned()
    }

    /// Appends the RESP2 array encoding of this command to `out`.
    pub fn encode_into(&self, out: &mut BytesMut) {
        out.put_u8(b'*');
        put_usize(out, self.args.len());
        out.put_slice(b"\r\n");
        for arg in &self.args {
            out.put_u8(b'$');
            put_usize(out, arg.len());
            out.put_slice(b"\r\n");
            out.put_slice(arg);
            out.put_slice(b"\r\n");
        }
    }
}

// Only the name is printed; arguments may carry values or credentials.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name_lossy())
            .field("argc", &(self.args.len() - 1))
            .finish()
    }
}

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<Reply>),
}

impl Reply {
    /// Turns an error reply into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<Reply> {
        match self {
            Reply::Error(message) => Err(ClientError::Server { message }),
            other => Ok(other),
        }
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol("empty reply line"));
    }

    match line_buf[0] {
        b'+' => Ok(Reply::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(Reply::Error(line_buf[1..].to_vec())),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            read_array(reader, len, line_buf)
        }
        _ => Err(ClientError::Protocol("unknown reply type")),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<Reply> {
    if len < 0 {
        return Ok(Reply::Bulk(None));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != *b"\r\n" {
        return Err(ClientError::Protocol("bulk string missing terminator"));
    }
    Ok(Reply::Bulk(Some(data)))
}

fn read_array<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    if len <= 0 {
        return Ok(Reply::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity((len as usize).min(64));
    for _ in 0..len {
        items.push(read_reply(reader, line_buf)?);
    }
    Ok(Reply::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Protocol("connection closed by peer"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol("reply line missing CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(ClientError::Protocol("empty integer")),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol("empty integer"));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }
    Ok(if negative { -value } else { value })
}

fn put_usize(out: &mut BytesMut, value: usize) {
    let (digits, len) = encode_u64(value as u64);
    out.put_slice(&digits[..len]);
}

fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    // Stack buffer keeps conversion allocation-free.
    let mut buf = [0u8; 20];
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    let mut len = 0;
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
