//! Error types for the value codec.

use thiserror::Error;

use crate::value::Shape;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while decoding stored bytes or bridging serde types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The byte stream ended before the value was complete.
    #[error("truncated input: needed {needed} more byte(s)")]
    Truncated { needed: usize },
    /// The payload does not start with the codec magic byte.
    #[error("missing codec header (found byte {found:#04x})")]
    BadMagic { found: u8 },
    /// The payload was written by a codec version this build cannot read.
    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),
    /// A value tag outside the closed value family.
    #[error("unrecognized type tag {0:#04x}")]
    UnknownTag(u8),
    /// String, character, or field-name payload is not valid UTF-8.
    #[error("invalid utf-8 payload")]
    InvalidUtf8,
    /// A varint did not terminate within 10 bytes or overflowed.
    #[error("malformed length or integer prefix")]
    BadVarint,
    /// Nesting exceeded `MAX_DEPTH` on encode or decode.
    #[error("value nesting exceeds depth limit {0}")]
    TooDeep(usize),
    /// Bytes remained after the top-level value.
    #[error("{0} trailing byte(s) after value")]
    TrailingBytes(usize),
    /// Decoded value has a different shape than requested.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: Shape, found: Shape },
    /// Stored decimal integer could not be parsed.
    #[error("invalid integer payload {0:?}")]
    InvalidInteger(String),
    /// serde could not map between a Rust type and the value family.
    #[error("record conversion failed: {0}")]
    Record(String),
}
