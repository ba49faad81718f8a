//! # Cache Value Model
//!
//! Purpose: Describe every value the facade can store as one closed sum type,
//! so decoding has an explicit, exhaustively matchable failure mode.
//!
//! ## Design Principles
//!
//! 1. **Closed Family**: Scalars, byte sequences, character sequences, lists,
//!    and records. Nothing else can be encoded or decoded.
//! 2. **Ordered Records**: Records keep field order and names exactly as given,
//!    so a round trip is structurally identical, not just set-equal.
//! 3. **Bitwise Float Equality**: `Float` compares by bit pattern. `NaN` equals
//!    itself and `0.0 != -0.0`, matching what the codec preserves.

use std::fmt;

/// A value in the closed family supported by the codec.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// Absent value (maps to `null` / `None` through the record bridge).
    Nil,
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer that does not fit `i64`, or was produced as unsigned.
    UInt(u64),
    Float(f64),
    /// Ordered character string.
    Str(String),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
    /// Sequence of Unicode scalar values.
    Chars(Vec<char>),
    List(Vec<CacheValue>),
    /// Named fields in declaration order.
    Record(Vec<(String, CacheValue)>),
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        use CacheValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Chars(a), Chars(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Record(a), Record(b)) => a == b,
            _ => false,
        }
    }
}

impl CacheValue {
    /// Returns the shape tag of this value.
    pub fn shape(&self) -> Shape {
        match self {
            CacheValue::Nil => Shape::Nil,
            CacheValue::Bool(_) => Shape::Bool,
            CacheValue::Int(_) => Shape::Int,
            CacheValue::UInt(_) => Shape::UInt,
            CacheValue::Float(_) => Shape::Float,
            CacheValue::Str(_) => Shape::Str,
            CacheValue::Bytes(_) => Shape::Bytes,
            CacheValue::Chars(_) => Shape::Chars,
            CacheValue::List(_) => Shape::List,
            CacheValue::Record(_) => Shape::Record,
        }
    }

    /// Builds a record from `(name, value)` pairs, preserving their order.
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, CacheValue)>,
        K: Into<String>,
    {
        CacheValue::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Looks up the first field named `name` when this value is a record.
    pub fn field(&self, name: &str) -> Option<&CacheValue> {
        match self {
            CacheValue::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheValue::Int(v) => Some(*v),
            CacheValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        CacheValue::Bool(value)
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Int(value)
    }
}

impl From<i32> for CacheValue {
    fn from(value: i32) -> Self {
        CacheValue::Int(value as i64)
    }
}

impl From<u64> for CacheValue {
    fn from(value: u64) -> Self {
        CacheValue::UInt(value)
    }
}

impl From<f64> for CacheValue {
    fn from(value: f64) -> Self {
        CacheValue::Float(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Str(value.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Str(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(value)
    }
}

impl From<&[u8]> for CacheValue {
    fn from(value: &[u8]) -> Self {
        CacheValue::Bytes(value.to_vec())
    }
}

impl From<Vec<char>> for CacheValue {
    fn from(value: Vec<char>) -> Self {
        CacheValue::Chars(value)
    }
}

impl From<Vec<CacheValue>> for CacheValue {
    fn from(value: Vec<CacheValue>) -> Self {
        CacheValue::List(value)
    }
}

/// Shape tag used to request a specific variant on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Nil,
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    Chars,
    List,
    Record,
    /// Accept whatever shape was stored.
    Any,
}

impl Shape {
    /// Returns true when a value of shape `found` satisfies this request.
    pub fn accepts(self, found: Shape) -> bool {
        self == Shape::Any || self == found
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Nil => "nil",
            Shape::Bool => "bool",
            Shape::Int => "int",
            Shape::UInt => "uint",
            Shape::Float => "float",
            Shape::Str => "string",
            Shape::Bytes => "bytes",
            Shape::Chars => "chars",
            Shape::List => "list",
            Shape::Record => "record",
            Shape::Any => "any",
        };
        f.write_str(name)
    }
}
