//! Error taxonomy for the cache facade.
//!
//! Startup failures (`ConfigError`, `PoolError`) are fatal and never retried.
//! Per-call failures (`CacheError`) name the operation and key so callers can
//! log or retry on their own terms.

use std::fmt;
use std::io;
use std::path::PathBuf;

use kvf_client::ClientError;
use kvf_common::CodecError;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type CacheResult<T> = Result<T, CacheError>;

/// Missing, unreadable, or malformed configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config source is empty")]
    Empty,
    #[error("config has no `cache.usage_cache_db` section")]
    MissingSection,
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Why opening a handle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// The configuration violates a sizing or timeout invariant.
    InvalidConfig,
    /// Warm connections could not be established.
    Connect,
    /// The startup probe did not round-trip in time.
    HealthCheckFailed,
}

impl fmt::Display for PoolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolErrorKind::InvalidConfig => "invalid pool config",
            PoolErrorKind::Connect => "connect failed",
            PoolErrorKind::HealthCheckFailed => "health check failed",
        };
        f.write_str(name)
    }
}

/// Construction or health-check failure while opening a handle.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PoolError {
    pub kind: PoolErrorKind,
    message: String,
    #[source]
    source: Option<ClientError>,
}

impl PoolError {
    pub(crate) fn invalid_config(err: ConfigError) -> Self {
        PoolError {
            kind: PoolErrorKind::InvalidConfig,
            message: err.to_string(),
            source: None,
        }
    }

    pub(crate) fn from_client(kind: PoolErrorKind, err: ClientError) -> Self {
        let kind = match err {
            ClientError::InvalidOptions(_) => PoolErrorKind::InvalidConfig,
            _ => kind,
        };
        PoolError {
            kind,
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn kind(&self) -> PoolErrorKind {
        self.kind
    }
}

/// Failure of `CacheHandle::initialize`.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Operation names carried by [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetString,
    GetString,
    SetInt,
    GetInt,
    SetValue,
    GetValue,
    SetRecord,
    GetRecord,
    Delete,
    Expire,
    Ttl,
    Close,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::SetString => "set_string",
            Operation::GetString => "get_string",
            Operation::SetInt => "set_int",
            Operation::GetInt => "get_int",
            Operation::SetValue => "set_value",
            Operation::GetValue => "get_value",
            Operation::SetRecord => "set_record",
            Operation::GetRecord => "get_record",
            Operation::Delete => "delete",
            Operation::Expire => "expire",
            Operation::Ttl => "ttl",
            Operation::Close => "close",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call failures of the typed operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Caller contract violation; nothing was sent.
    #[error("{op} {key:?}: {message}")]
    Validation {
        op: Operation,
        key: String,
        message: &'static str,
    },
    /// Stored bytes could not be decoded, or a record could not be mapped.
    #[error("{op} {key:?}: {source}")]
    Codec {
        op: Operation,
        key: String,
        #[source]
        source: CodecError,
    },
    /// Structured read of a key that does not exist.
    #[error("{op} {key:?}: key not found")]
    NotFound { op: Operation, key: String },
    /// The caller's deadline elapsed before the store answered.
    #[error("{op} {key:?}: deadline elapsed")]
    Timeout { op: Operation, key: String },
    /// The handle was closed.
    #[error("{op}: cache handle is closed")]
    Closed { op: Operation },
    /// Any other transport or server failure.
    #[error("{op} {key:?}: {source}")]
    Transport {
        op: Operation,
        key: String,
        #[source]
        source: ClientError,
    },
}

impl CacheError {
    pub fn op(&self) -> Operation {
        match self {
            CacheError::Validation { op, .. }
            | CacheError::Codec { op, .. }
            | CacheError::NotFound { op, .. }
            | CacheError::Timeout { op, .. }
            | CacheError::Closed { op }
            | CacheError::Transport { op, .. } => *op,
        }
    }

    /// Key the failed call targeted, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::Validation { key, .. }
            | CacheError::Codec { key, .. }
            | CacheError::NotFound { key, .. }
            | CacheError::Timeout { key, .. }
            | CacheError::Transport { key, .. } => Some(key),
            CacheError::Closed { .. } => None,
        }
    }

    pub(crate) fn transport(op: Operation, key: &str, err: ClientError) -> Self {
        match err {
            ClientError::Timeout => CacheError::Timeout {
                op,
                key: key.to_string(),
            },
            ClientError::Closed => CacheError::Closed { op },
            source => CacheError::Transport {
                op,
                key: key.to_string(),
                source,
            },
        }
    }

    pub(crate) fn codec(op: Operation, key: &str, source: CodecError) -> Self {
        CacheError::Codec {
            op,
            key: key.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        let timeout = CacheError::transport(Operation::GetInt, "k", ClientError::Timeout);
        assert!(matches!(timeout, CacheError::Timeout { .. }));
        assert_eq!(timeout.key(), Some("k"));

        let closed = CacheError::transport(Operation::SetInt, "k", ClientError::Closed);
        assert!(matches!(closed, CacheError::Closed { op: Operation::SetInt }));
        assert_eq!(closed.key(), None);

        let server = CacheError::transport(
            Operation::Delete,
            "k",
            ClientError::Server {
                message: b"ERR boom".to_vec(),
            },
        );
        assert_eq!(server.op(), Operation::Delete);
        assert!(server.to_string().contains("delete \"k\""));
    }

    #[test]
    fn option_errors_become_invalid_config() {
        let err =
            PoolError::from_client(PoolErrorKind::Connect, ClientError::InvalidOptions("bad"));
        assert_eq!(err.kind(), PoolErrorKind::InvalidConfig);
        assert!(err.to_string().starts_with("invalid pool config"));
    }
}
