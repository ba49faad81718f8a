//! # Connection Pool Manager
//!
//! Purpose: Own the lifecycle of one pooled transport client:
//! create, health-check, serve, close.
//!
//! ## Design Principles
//! 1. **No Singleton**: Every `open` builds an independent pool; the caller
//!    owns and closes each handle it opens.
//! 2. **Fail Clean**: A failed warm-up or probe tears the client down before
//!    returning, so no socket outlives the error.
//! 3. **Explicit Close**: The first `close` wins; any later call, and any
//!    operation after it, fails with `CacheError::Closed`.

use std::path::Path;
use std::sync::Arc;

use kvf_client::{Deadline, KvClient, PoolStats};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::error::{CacheError, CacheResult, InitError, Operation, PoolError, PoolErrorKind};

struct HandleInner {
    config: ConnectionConfig,
    client: KvClient,
}

/// Shareable handle to a live connection pool.
///
/// Clones share the same pool; closing any clone closes all of them.
#[derive(Clone)]
pub struct CacheHandle {
    inner: Arc<HandleInner>,
}

impl CacheHandle {
    /// Builds the pool from `config` and probes it with a PING bounded by
    /// `health_check_timeout`.
    pub fn open(config: ConnectionConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::invalid_config)?;

        let client = KvClient::connect(config.client_options())
            .map_err(|err| PoolError::from_client(PoolErrorKind::Connect, err))?;

        if let Err(err) = client.ping(Deadline::after(config.health_check_timeout)) {
            warn!(addr = %config.address(), error = %err, "cache health check failed");
            let _ = client.close();
            return Err(PoolError::from_client(PoolErrorKind::HealthCheckFailed, err));
        }

        info!(
            addr = %config.address(),
            database = config.database,
            pool_min = config.pool_min_connections,
            pool_max = config.pool_max_connections,
            pipelined = config.auto_pipelining,
            local_cache = !config.disable_client_side_cache,
            "cache handle opened"
        );

        Ok(CacheHandle {
            inner: Arc::new(HandleInner { config, client }),
        })
    }

    /// Loads the config at `path` (or the default path) and opens a handle.
    pub fn initialize(path: Option<&Path>) -> Result<Self, InitError> {
        let config = match path {
            Some(path) => ConnectionConfig::load(path)?,
            None => ConnectionConfig::load_default()?,
        };
        Ok(Self::open(config)?)
    }

    /// Releases every pooled connection and stops background workers.
    pub fn close(&self) -> CacheResult<()> {
        self.inner
            .client
            .close()
            .map_err(|_| CacheError::Closed { op: Operation::Close })?;
        info!(addr = %self.inner.config.address(), "cache handle closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.client.is_closed()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Connection counts of the underlying pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.client.pool_stats()
    }

    pub(crate) fn client(&self) -> &KvClient {
        &self.inner.client
    }
}
