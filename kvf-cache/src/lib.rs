//! # KV Cache Facade
//!
//! Purpose: Load connection settings, open a health-checked connection pool,
//! and expose typed, TTL-aware get/set over a Redis-compatible store.
//!
//! ## Design Principles
//! 1. **Pipeline Clarity**: config -> handle -> typed operations, each step
//!    with its own error type.
//! 2. **Shared Handle**: One `CacheHandle` serves any number of threads.
//! 3. **Deadline Per Call**: Every blocking operation takes a `Deadline`.
//!
//! ```no_run
//! use std::time::Duration;
//! use kvf_cache::{CacheHandle, ConnectionConfig, Deadline};
//!
//! let handle = CacheHandle::open(ConnectionConfig::default())?;
//! let deadline = Deadline::after(Duration::from_secs(1));
//! handle.set_string("greeting", "hello", 0, deadline)?;
//! assert_eq!(handle.get_string("greeting", deadline)?, "hello");
//! handle.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
mod error;
mod handle;
mod ops;

pub use config::{
    ConnectionConfig, DEFAULT_CLIENT_CACHE_MAX_AGE, DEFAULT_CONFIG_PATH, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HEALTH_CHECK_TIMEOUT, DEFAULT_HOST, DEFAULT_IO_TIMEOUT, DEFAULT_POOL_MAX_CONNECTIONS,
    DEFAULT_POOL_MAX_IDLE_TIME, DEFAULT_POOL_MIN_CONNECTIONS, DEFAULT_PORT,
};
pub use error::{
    CacheError, CacheResult, ConfigError, ConfigResult, InitError, Operation, PoolError,
    PoolErrorKind,
};
pub use handle::CacheHandle;
pub use ops::{MISSING_INT, MISSING_STRING};

// Re-export for convenience
pub use kvf_client::{ClientTtl, Deadline, PoolStats};
pub use kvf_common::{CacheValue, CodecError, Shape, MAX_DEPTH};
