//! # Typed Cache Operations
//!
//! Purpose: Uniform get/set with optional expiry for strings, integers, the
//! closed [`CacheValue`] family, and any serde record.
//!
//! ## Design Principles
//! 1. **Validate First**: A negative TTL fails before any network call.
//! 2. **Store-Native Primitives**: Strings are stored as raw UTF-8 and
//!    integers as decimal text; everything else goes through the codec.
//! 3. **Explicit Sentinels**: Missing strings read as `""` and missing
//!    integers as [`MISSING_INT`]; missing structured values are `NotFound`.
//! 4. **One Error Shape**: Every failure names the operation and key.

use std::time::Duration;

use kvf_client::{ClientTtl, Deadline};
use kvf_common::{decode, decode_as, encode, from_value, to_value, CacheValue, CodecError, Shape};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{CacheError, CacheResult, Operation};
use crate::handle::CacheHandle;

/// Returned by [`CacheHandle::get_int`] for a missing key.
///
/// A stored `-1` reads back identically; callers that must tell the two
/// apart should use [`CacheHandle::ttl`] or a structured value.
pub const MISSING_INT: i64 = -1;

/// Returned by [`CacheHandle::get_string`] for a missing key.
pub const MISSING_STRING: &str = "";

const EXPIRY_MUST_BE_POSITIVE: &str = "expiry must be > 0";

/// Maps a seconds TTL to the transport form: `0` is no expiry, negative is
/// rejected.
fn write_ttl(op: Operation, key: &str, ttl_seconds: i64) -> CacheResult<Option<Duration>> {
    match ttl_seconds {
        0 => Ok(None),
        secs if secs > 0 => Ok(Some(Duration::from_secs(secs as u64))),
        _ => Err(CacheError::Validation {
            op,
            key: key.to_string(),
            message: EXPIRY_MUST_BE_POSITIVE,
        }),
    }
}

impl CacheHandle {
    /// Stores a UTF-8 string.
    pub fn set_string(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
        deadline: Deadline,
    ) -> CacheResult<()> {
        self.write(Operation::SetString, key, value.as_bytes(), ttl_seconds, deadline)
    }

    /// Reads a string; a missing key yields [`MISSING_STRING`].
    pub fn get_string(&self, key: &str, deadline: Deadline) -> CacheResult<String> {
        let op = Operation::GetString;
        match self.read(op, key, deadline)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| CacheError::codec(op, key, CodecError::InvalidUtf8)),
            None => Ok(MISSING_STRING.to_string()),
        }
    }

    /// Stores an integer as decimal text.
    pub fn set_int(
        &self,
        key: &str,
        value: i64,
        ttl_seconds: i64,
        deadline: Deadline,
    ) -> CacheResult<()> {
        let payload = value.to_string();
        self.write(Operation::SetInt, key, payload.as_bytes(), ttl_seconds, deadline)
    }

    /// Reads an integer; a missing key yields [`MISSING_INT`].
    pub fn get_int(&self, key: &str, deadline: Deadline) -> CacheResult<i64> {
        let op = Operation::GetInt;
        let bytes = match self.read(op, key, deadline)? {
            Some(bytes) => bytes,
            None => return Ok(MISSING_INT),
        };
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
            .ok_or_else(|| {
                let payload = String::from_utf8_lossy(&bytes).into_owned();
                CacheError::codec(op, key, CodecError::InvalidInteger(payload))
            })
    }

    /// Stores a codec-encoded value. Values the codec cannot round-trip fail
    /// here, before any network call.
    pub fn set_value(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_seconds: i64,
        deadline: Deadline,
    ) -> CacheResult<()> {
        let op = Operation::SetValue;
        let ttl = write_ttl(op, key, ttl_seconds)?;
        let payload = encode(value).map_err(|err| CacheError::codec(op, key, err))?;
        self.write_validated(op, key, &payload, ttl, deadline)
    }

    /// Reads a codec-encoded value, requiring it to match `shape`.
    pub fn get_value(
        &self,
        key: &str,
        shape: Shape,
        deadline: Deadline,
    ) -> CacheResult<CacheValue> {
        let op = Operation::GetValue;
        let bytes = self.read_required(op, key, deadline)?;
        decode_as(&bytes, shape).map_err(|err| CacheError::codec(op, key, err))
    }

    /// Stores any serde-serializable record through the codec.
    pub fn set_record<T>(
        &self,
        key: &str,
        record: &T,
        ttl_seconds: i64,
        deadline: Deadline,
    ) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let op = Operation::SetRecord;
        let ttl = write_ttl(op, key, ttl_seconds)?;
        let payload = to_value(record)
            .and_then(|value| encode(&value))
            .map_err(|err| CacheError::codec(op, key, err))?;
        self.write_validated(op, key, &payload, ttl, deadline)
    }

    /// Reads a record written by [`CacheHandle::set_record`].
    pub fn get_record<T: DeserializeOwned>(&self, key: &str, deadline: Deadline) -> CacheResult<T> {
        let op = Operation::GetRecord;
        let bytes = self.read_required(op, key, deadline)?;
        decode(&bytes)
            .and_then(from_value)
            .map_err(|err| CacheError::codec(op, key, err))
    }

    /// Removes `key`. Returns true when something was deleted.
    pub fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<bool> {
        let op = Operation::Delete;
        trace!(%op, key, "cache op");
        self.client()
            .delete(key.as_bytes(), deadline)
            .map_err(|err| CacheError::transport(op, key, err))
    }

    /// Sets a new TTL on an existing key. Returns false when the key is
    /// missing. Unlike writes, a zero TTL is rejected here.
    pub fn expire(&self, key: &str, ttl_seconds: i64, deadline: Deadline) -> CacheResult<bool> {
        let op = Operation::Expire;
        let ttl = match write_ttl(op, key, ttl_seconds)? {
            Some(ttl) => ttl,
            None => {
                return Err(CacheError::Validation {
                    op,
                    key: key.to_string(),
                    message: EXPIRY_MUST_BE_POSITIVE,
                })
            }
        };
        trace!(%op, key, ttl_seconds, "cache op");
        self.client()
            .expire(key.as_bytes(), ttl, deadline)
            .map_err(|err| CacheError::transport(op, key, err))
    }

    /// Remaining lifetime of `key` as reported by the store.
    pub fn ttl(&self, key: &str, deadline: Deadline) -> CacheResult<ClientTtl> {
        let op = Operation::Ttl;
        trace!(%op, key, "cache op");
        self.client()
            .ttl(key.as_bytes(), deadline)
            .map_err(|err| CacheError::transport(op, key, err))
    }

    fn write(
        &self,
        op: Operation,
        key: &str,
        payload: &[u8],
        ttl_seconds: i64,
        deadline: Deadline,
    ) -> CacheResult<()> {
        let ttl = write_ttl(op, key, ttl_seconds)?;
        self.write_validated(op, key, payload, ttl, deadline)
    }

    fn write_validated(
        &self,
        op: Operation,
        key: &str,
        payload: &[u8],
        ttl: Option<Duration>,
        deadline: Deadline,
    ) -> CacheResult<()> {
        trace!(%op, key, bytes = payload.len(), ttl = ?ttl, "cache op");
        self.client()
            .set(key.as_bytes(), payload, ttl, deadline)
            .map_err(|err| CacheError::transport(op, key, err))
    }

    fn read(&self, op: Operation, key: &str, deadline: Deadline) -> CacheResult<Option<Vec<u8>>> {
        trace!(%op, key, "cache op");
        self.client()
            .get(key.as_bytes(), deadline)
            .map_err(|err| CacheError::transport(op, key, err))
    }

    fn read_required(&self, op: Operation, key: &str, deadline: Deadline) -> CacheResult<Vec<u8>> {
        self.read(op, key, deadline)?.ok_or_else(|| CacheError::NotFound {
            op,
            key: key.to_string(),
        })
    }
}
