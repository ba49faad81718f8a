//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing Redis-compatible
//! commands over RESP2, with pooling, optional auto-pipelining, and an
//! optional local read cache.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvClient` hides pooling, batching, and protocol details.
//! 2. **Shareable Handle**: Cloning is cheap; every clone drives the same pool.
//! 3. **Deadline Everywhere**: Each blocking call takes a `Deadline` and fails
//!    with `Timeout` once it elapses.
//! 4. **Explicit Close**: The first `close` releases everything; later calls,
//!    including a second `close`, fail with `Closed`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::deadline::Deadline;
use crate::error::{ClientError, ClientResult};
use crate::local_cache::{LocalCache, LocalCacheOptions};
use crate::pipeline::Pipeline;
use crate::pool::{ConnectionPool, PoolOptions, PoolStats, Reaper};
use crate::resp::{Command, Reply};

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Configuration for the client, its pool, and its dispatch strategy.
#[derive(Clone)]
pub struct ClientOptions {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Sent with AUTH on every new connection when set and non-empty.
    pub password: Option<String>,
    /// Logical database selected on every new connection.
    pub database: u32,
    pub pool: PoolOptions,
    /// Route commands through the batching dispatcher instead of one
    /// checked-out connection per call.
    pub auto_pipelining: bool,
    /// Enables the local read cache when set.
    pub local_cache: Option<LocalCacheOptions>,
    pub connect_timeout: Duration,
    /// Socket read/write ceiling when the caller's deadline is looser.
    pub io_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            database: 0,
            pool: PoolOptions::default(),
            auto_pipelining: false,
            local_cache: None,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("addr", &self.addr)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("pool", &self.pool)
            .field("auto_pipelining", &self.auto_pipelining)
            .field("local_cache", &self.local_cache)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl ClientOptions {
    fn validate(&self) -> ClientResult<()> {
        if self.pool.max_connections == 0 {
            return Err(ClientError::InvalidOptions("max_connections must be positive"));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(ClientError::InvalidOptions("min_connections exceeds max_connections"));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(ClientError::InvalidOptions("timeouts must be positive"));
        }
        Ok(())
    }
}

struct ClientInner {
    options: Arc<ClientOptions>,
    pool: ConnectionPool,
    pipeline: Option<Pipeline>,
    reaper: Mutex<Option<Reaper>>,
    local: Option<LocalCache>,
    closed: AtomicBool,
}

impl ClientInner {
    fn shutdown(&self) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.shutdown();
        }
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.stop();
        }
        self.pool.close();
        if let Some(local) = &self.local {
            local.clear();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            self.shutdown();
        }
    }
}

/// Synchronous client with connection pooling.
///
/// This is a facade over the pool, the pipeline dispatcher, and the RESP
/// encoder/decoder.
#[derive(Clone)]
pub struct KvClient {
    inner: Arc<ClientInner>,
}

impl KvClient {
    /// Builds the pool, opens the warm minimum, and starts background workers.
    ///
    /// Nothing is leaked on failure: connections opened so far are closed.
    pub fn connect(options: ClientOptions) -> ClientResult<Self> {
        options.validate()?;
        let options = Arc::new(options);
        let pool = ConnectionPool::new(Arc::clone(&options));

        if let Err(err) = pool.warm_up(Deadline::after(options.connect_timeout)) {
            pool.close();
            return Err(err);
        }

        let reaper = match Reaper::start(pool.clone()) {
            Ok(reaper) => reaper,
            Err(err) => {
                pool.close();
                return Err(err);
            }
        };

        let pipeline = if options.auto_pipelining {
            match Pipeline::start(pool.clone(), options.io_timeout) {
                Ok(pipeline) => Some(pipeline),
                Err(err) => {
                    reaper.stop();
                    pool.close();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let local = options.local_cache.clone().map(LocalCache::new);
        debug!(
            addr = %options.addr,
            pipelined = options.auto_pipelining,
            local_cache = local.is_some(),
            warm = pool.stats().total,
            "client connected"
        );

        Ok(KvClient {
            inner: Arc::new(ClientInner {
                options,
                pool,
                pipeline,
                reaper: Mutex::new(Some(reaper)),
                local,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Executes a single command.
    pub fn exec(&self, command: Command, deadline: Deadline) -> ClientResult<Reply> {
        let mut replies = self.dispatch(vec![command], deadline)?;
        replies.pop().ok_or(ClientError::Protocol("missing reply"))
    }

    /// Executes commands back to back on one connection and returns their
    /// replies in order.
    pub fn exec_many(
        &self,
        commands: Vec<Command>,
        deadline: Deadline,
    ) -> ClientResult<Vec<Reply>> {
        self.dispatch(commands, deadline)
    }

    fn dispatch(&self, commands: Vec<Command>, deadline: Deadline) -> ClientResult<Vec<Reply>> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if deadline.is_expired() {
            return Err(ClientError::Timeout);
        }

        match &self.inner.pipeline {
            Some(pipeline) => pipeline.submit(commands, deadline),
            None => {
                let mut conn = self.inner.pool.acquire(deadline)?;
                conn.run(commands.iter(), deadline)
            }
        }
    }

    /// Round-trips a PING.
    pub fn ping(&self, deadline: Deadline) -> ClientResult<()> {
        match self.exec(Command::new("PING"), deadline)?.into_result()? {
            Reply::Simple(_) | Reply::Bulk(Some(_)) => Ok(()),
            _ => Err(unexpected("PING")),
        }
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8], deadline: Deadline) -> ClientResult<Option<Vec<u8>>> {
        let local = match &self.inner.local {
            Some(local) => local,
            None => return bulk_reply("GET", self.exec(Command::new("GET").arg(key), deadline)?),
        };

        let now = Instant::now();
        if let Some(value) = local.get(key, now) {
            trace!("local cache hit");
            return Ok(Some(value));
        }

        let epoch = local.epoch();
        let commands = vec![Command::new("GET").arg(key), Command::new("PTTL").arg(key)];
        let mut replies = self.exec_many(commands, deadline)?.into_iter();
        let value = bulk_reply("GET", replies.next().ok_or_else(|| unexpected("GET"))?)?;
        let remaining = ttl_reply(replies.next().ok_or_else(|| unexpected("PTTL"))?)?;

        if let Some(data) = &value {
            let server_ttl = match remaining {
                ClientTtl::ExpiresIn(left) => Some(left),
                ClientTtl::NoExpiry | ClientTtl::Missing => None,
            };
            if remaining != ClientTtl::Missing {
                local.insert_if_current(epoch, key, data.clone(), server_ttl, now);
            }
        }
        Ok(value)
    }

    /// Sets a value, optionally with an expiration.
    ///
    /// Whole-second TTLs use `EX`; anything finer uses `PX`.
    pub fn set(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
        deadline: Deadline,
    ) -> ClientResult<()> {
        let mut command = Command::new("SET").arg(key).arg(value);
        match ttl {
            Some(ttl) if ttl.subsec_nanos() == 0 => {
                command = command.arg("EX").arg_u64(ttl.as_secs());
            }
            Some(ttl) => {
                command = command.arg("PX").arg_u64((ttl.as_millis() as u64).max(1));
            }
            None => {}
        }

        self.invalidate_local(key);
        let reply = self.exec(command, deadline);
        self.invalidate_local(key);
        match reply?.into_result()? {
            Reply::Simple(_) => Ok(()),
            _ => Err(unexpected("SET")),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8], deadline: Deadline) -> ClientResult<bool> {
        self.invalidate_local(key);
        let reply = self.exec(Command::new("DEL").arg(key), deadline);
        self.invalidate_local(key);
        match reply?.into_result()? {
            Reply::Integer(count) => Ok(count > 0),
            _ => Err(unexpected("DEL")),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration, deadline: Deadline) -> ClientResult<bool> {
        let millis = (ttl.as_millis() as u64).max(1);
        self.invalidate_local(key);
        let reply = self.exec(Command::new("PEXPIRE").arg(key).arg_u64(millis), deadline);
        self.invalidate_local(key);
        match reply?.into_result()? {
            Reply::Integer(value) => Ok(value == 1),
            _ => Err(unexpected("PEXPIRE")),
        }
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8], deadline: Deadline) -> ClientResult<ClientTtl> {
        ttl_reply(self.exec(Command::new("PTTL").arg(key), deadline)?)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops background workers and closes every pooled connection.
    ///
    /// Only the first call succeeds; any later call returns `Closed`.
    pub fn close(&self) -> ClientResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::Closed);
        }
        self.inner.shutdown();
        debug!(addr = %self.inner.options.addr, "client closed");
        Ok(())
    }

    fn invalidate_local(&self, key: &[u8]) {
        if let Some(local) = &self.inner.local {
            local.invalidate(key);
        }
    }
}

fn unexpected(command: &str) -> ClientError {
    ClientError::UnexpectedResponse {
        command: command.to_string(),
    }
}

fn bulk_reply(command: &str, reply: Reply) -> ClientResult<Option<Vec<u8>>> {
    match reply.into_result()? {
        Reply::Bulk(data) => Ok(data),
        _ => Err(unexpected(command)),
    }
}

fn ttl_reply(reply: Reply) -> ClientResult<ClientTtl> {
    match reply.into_result()? {
        Reply::Integer(-2) => Ok(ClientTtl::Missing),
        Reply::Integer(-1) => Ok(ClientTtl::NoExpiry),
        Reply::Integer(millis) if millis >= 0 => {
            Ok(ClientTtl::ExpiresIn(Duration::from_millis(millis as u64)))
        }
        _ => Err(unexpected("PTTL")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let options = ClientOptions {
            password: Some("hunter2".to_string()),
            ..ClientOptions::default()
        };
        let printed = format!("{:?}", options);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let mut options = ClientOptions::default();
        options.pool.min_connections = 4;
        options.pool.max_connections = 2;
        assert!(matches!(KvClient::connect(options), Err(ClientError::InvalidOptions(_))));
    }

    #[test]
    fn ttl_reply_mapping() {
        assert_eq!(ttl_reply(Reply::Integer(-2)).unwrap(), ClientTtl::Missing);
        assert_eq!(ttl_reply(Reply::Integer(-1)).unwrap(), ClientTtl::NoExpiry);
        assert_eq!(
            ttl_reply(Reply::Integer(1500)).unwrap(),
            ClientTtl::ExpiresIn(Duration::from_millis(1500))
        );
        assert!(ttl_reply(Reply::Integer(-7)).is_err());
    }
}
