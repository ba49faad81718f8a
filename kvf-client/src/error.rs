//! Errors surfaced by the transport client.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type for the transport client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the transport client.
///
/// `Clone` so a single failure can be delivered to every caller in a
/// pipelined batch; io errors are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[source] Arc<io::Error>),
    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response to {command}")]
    UnexpectedResponse { command: String },
    /// Client options violate a sizing or timeout invariant.
    #[error("invalid client options: {0}")]
    InvalidOptions(&'static str),
    /// Address could not be resolved into a socket address.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline elapsed")]
    Timeout,
    /// The client was closed.
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Returns true for errors that leave a connection in an unknown state.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Protocol(_) | ClientError::Timeout)
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            // Socket timeouts are how deadlines surface on blocking streams.
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
            _ => ClientError::Io(Arc::new(err)),
        }
    }
}
