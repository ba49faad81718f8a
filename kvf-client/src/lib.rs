//! # KV Facade Transport Client
//!
//! Purpose: Provide a lightweight, synchronous Redis-compatible client with
//! connection pooling to minimize TCP handshake overhead.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Strategy Switch**: Per-call checkout or auto-pipelined batching, with
//!    identical results either way.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod connection;
mod deadline;
mod error;
mod local_cache;
mod pipeline;
mod pool;
mod resp;

pub use client::{ClientOptions, ClientTtl, KvClient};
pub use deadline::Deadline;
pub use error::{ClientError, ClientResult};
pub use local_cache::LocalCacheOptions;
pub use pool::{PoolOptions, PoolStats};
pub use resp::{Command, Reply};
