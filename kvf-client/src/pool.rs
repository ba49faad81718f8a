//! # Connection Pool
//!
//! Purpose: Reuse TCP connections across callers, keep a warm minimum, and
//! reclaim connections that sit idle beyond it.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections;
//!    dialing happens outside the lock with a reserved slot.
//! 3. **Blocking Checkout**: At capacity, callers wait for a release until
//!    their deadline elapses instead of failing immediately.
//! 4. **LIFO Reuse**: Checkout takes the most recently used connection so the
//!    least recently used ones age out at the front of the queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::client::ClientOptions;
use crate::connection::Connection;
use crate::deadline::Deadline;
use crate::error::{ClientError, ClientResult};
use crate::resp::{Command, Reply};

/// Sizing policy for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Connections kept open even when idle.
    pub min_connections: usize,
    /// Upper bound on open connections (idle + in-use).
    pub max_connections: usize,
    /// Idle time after which connections above the minimum are closed.
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            min_connections: 0,
            max_connections: 16,
            idle_timeout: Duration::from_secs(3600),
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Open connections (idle + in-use + being dialed).
    pub total: usize,
    /// Connections parked in the pool.
    pub idle: usize,
    /// Connections checked out by callers.
    pub in_use: usize,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    closed: bool,
}

struct PoolInner {
    options: Arc<ClientOptions>,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// Connection pool handle.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub(crate) fn new(options: Arc<ClientOptions>) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(options.pool.max_connections),
            total: 0,
            closed: false,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                options,
                state: Mutex::new(state),
                released: Condvar::new(),
            }),
        }
    }

    fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Acquires a connection, dialing a new one while under the maximum and
    /// waiting for a release otherwise.
    pub(crate) fn acquire(&self, deadline: Deadline) -> ClientResult<PooledConnection> {
        let max = self.options().pool.max_connections;
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(ClientError::Closed);
            }
            if let Some(conn) = state.idle.pop_back() {
                return Ok(PooledConnection::new(self.clone(), conn));
            }
            if state.total < max {
                state.total += 1;
                break;
            }
            if deadline.is_expired() {
                return Err(ClientError::Timeout);
            }
            match deadline.instant() {
                Some(at) => {
                    self.inner.released.wait_until(&mut state, at);
                }
                None => self.inner.released.wait(&mut state),
            }
        }
        drop(state);

        match Connection::open(self.options(), deadline) {
            Ok(conn) => Ok(PooledConnection::new(self.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Opens connections until the pool holds at least the configured minimum.
    pub(crate) fn warm_up(&self, deadline: Deadline) -> ClientResult<usize> {
        let min = self.options().pool.min_connections;
        let mut opened = 0;
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(ClientError::Closed);
                }
                if state.total >= min {
                    return Ok(opened);
                }
                state.total += 1;
            }

            match Connection::open(self.options(), deadline) {
                Ok(conn) => {
                    self.check_in(conn);
                    opened += 1;
                }
                Err(err) => {
                    self.release_slot();
                    return Err(err);
                }
            }
        }
    }

    /// Closes idle connections above the minimum that exceeded the idle timeout.
    pub(crate) fn reap(&self, now: Instant) -> usize {
        let min = self.options().pool.min_connections;
        let idle_timeout = self.options().pool.idle_timeout;

        let mut stale = Vec::new();
        {
            let mut state = self.inner.state.lock();
            while state.total > min {
                let expired = state
                    .idle
                    .front()
                    .map(|conn| conn.idle_for(now) >= idle_timeout)
                    .unwrap_or(false);
                if !expired {
                    break;
                }
                if let Some(conn) = state.idle.pop_front() {
                    stale.push(conn);
                    state.total -= 1;
                }
            }
        }
        // Sockets close on drop, outside the lock.
        stale.len()
    }

    /// Marks the pool closed and drops every idle connection.
    ///
    /// Checked-out connections are dropped when their guards return them.
    pub(crate) fn close(&self) {
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let drained: Vec<Connection> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        self.inner.released.notify_all();
        debug!(closed = drained.len(), "connection pool closed");
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            in_use: state.total - state.idle.len(),
        }
    }

    fn check_in(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if state.closed {
            state.total = state.total.saturating_sub(1);
            drop(state);
            drop(conn);
        } else {
            state.idle.push_back(conn);
            drop(state);
        }
        self.inner.released.notify_one();
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.inner.released.notify_one();
    }

    /// One maintenance pass: reclaim idle connections, then refill the minimum.
    fn maintain(&self) {
        let reaped = self.reap(Instant::now());
        if reaped > 0 {
            debug!(reaped, "reclaimed idle connections");
        }
        let deadline = Deadline::after(self.options().connect_timeout);
        match self.warm_up(deadline) {
            Ok(_) | Err(ClientError::Closed) => {}
            Err(err) => warn!(error = %err, "failed to refill minimum pool connections"),
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub(crate) struct PooledConnection {
    pool: ConnectionPool,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: ConnectionPool, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Sends `commands` as one write and reads their replies in order.
    pub(crate) fn run<'a, I>(&mut self, commands: I, deadline: Deadline) -> ClientResult<Vec<Reply>>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        let conn = self.conn.as_mut().ok_or(ClientError::Closed)?;
        let result = conn.run(commands, deadline);
        if let Err(err) = &result {
            // A half-read reply stream cannot be reused.
            if err.poisons_connection() {
                self.valid = false;
            }
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool.check_in(conn);
        } else {
            drop(conn);
            self.pool.release_slot();
        }
    }
}

/// Background thread that periodically runs pool maintenance.
///
/// Call `stop` to signal shutdown and join the thread.
pub(crate) struct Reaper {
    stop: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl Reaper {
    pub(crate) fn start(pool: ConnectionPool) -> ClientResult<Self> {
        let interval = sweep_interval(pool.options().pool.idle_timeout);
        let (stop, stop_rx) = bounded::<()>(1);

        let join = thread::Builder::new()
            .name("kvf-pool-reaper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => pool.maintain(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Reaper {
            stop,
            join: Some(join),
        })
    }

    /// Stops the reaper and waits for the thread to finish.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sweeps often enough to honour the idle timeout within ~25%.
fn sweep_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_interval_is_bounded() {
        assert_eq!(sweep_interval(Duration::from_secs(3600)), Duration::from_secs(30));
        assert_eq!(sweep_interval(Duration::from_millis(200)), Duration::from_millis(50));
        assert_eq!(sweep_interval(Duration::ZERO), Duration::from_millis(10));
    }

    #[test]
    fn closed_pool_rejects_checkout() {
        let pool = ConnectionPool::new(Arc::new(ClientOptions::default()));
        pool.close();
        assert!(matches!(pool.acquire(Deadline::none()), Err(ClientError::Closed)));
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn failed_dial_releases_slot() {
        let mut options = ClientOptions::default();
        // Port 1 on loopback is essentially never listening.
        options.addr = "127.0.0.1:1".to_string();
        options.connect_timeout = Duration::from_millis(200);
        let pool = ConnectionPool::new(Arc::new(options));

        assert!(pool.acquire(Deadline::after(Duration::from_millis(500))).is_err());
        assert_eq!(pool.stats().total, 0);
    }
}
