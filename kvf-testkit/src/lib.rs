//! # KV Facade Test Kit
//!
//! Purpose: Run a disposable RESP2 server inside the test process so the
//! client and cache crates can be exercised end to end without an external
//! Redis.
//!
//! ## Design Principles
//! 1. **Self-Contained**: Each [`TestServer`] binds an ephemeral port and owns
//!    its own runtime thread; dropping it tears everything down.
//! 2. **Observable**: Counters expose accepted/open connections and commands
//!    seen, so tests can assert on pool behavior from the server side.
//! 3. **Fault Injection**: A response delay simulates a slow backend.

mod protocol;
mod server;
mod store;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

pub use protocol::{parse_request, ProtocolError};
pub use store::{Store, TtlStatus};

use server::{handle_connection, ServerState};

/// Options for [`TestServer::start_with`].
#[derive(Debug, Clone, Default)]
pub struct TestServerOptions {
    /// When set, every connection must AUTH with this password first.
    pub password: Option<String>,
}

/// In-process RESP2 server bound to `127.0.0.1` on an ephemeral port.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> io::Result<Self> {
        Self::start_with(TestServerOptions::default())
    }

    pub fn start_with(options: TestServerOptions) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("kvf-test-server")
            .enable_all()
            .build()?;

        let state = Arc::new(ServerState {
            password: options.password,
            ..ServerState::default()
        });
        let (shutdown, stop) = oneshot::channel();

        let accept_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name("kvf-test-server-main".to_string())
            .spawn(move || {
                runtime.block_on(accept_loop(listener, accept_state, stop));
            })?;

        debug!(%addr, "test server started");
        Ok(TestServer {
            addr,
            state,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// `host:port` string suitable for client options.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Total commands parsed across all connections, AUTH/SELECT included.
    pub fn commands_seen(&self) -> u64 {
        self.state.commands.load(Ordering::Relaxed)
    }

    pub fn connections_accepted(&self) -> u64 {
        self.state.accepted.load(Ordering::Relaxed)
    }

    pub fn open_connections(&self) -> u64 {
        self.state.open.load(Ordering::Relaxed)
    }

    /// Delays every subsequent reply by `delay`. Zero disables the delay.
    pub fn set_response_delay(&self, delay: Duration) {
        self.state
            .response_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Removes `key` from `db` as if its TTL had elapsed.
    pub fn force_expire(&self, db: u32, key: &str) -> bool {
        self.state.store.force_expire(db, key.as_bytes())
    }

    /// Raw stored bytes, bypassing any client.
    pub fn raw_get(&self, db: u32, key: &str) -> Option<Vec<u8>> {
        self.state.store.get(db, key.as_bytes(), Instant::now())
    }

    /// Writes raw bytes, bypassing any client.
    pub fn raw_set(&self, db: u32, key: &str, value: &[u8]) {
        self.state
            .store
            .set(db, key.as_bytes().to_vec(), value.to_vec(), None, Instant::now());
    }

    pub fn key_count(&self, db: u32) -> usize {
        self.state.store.len(db, Instant::now())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn accept_loop(
    listener: std::net::TcpListener,
    state: Arc<ServerState>,
    mut stop: oneshot::Receiver<()>,
) {
    let listener = match tokio::net::TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(error = %err, "test server failed to register listener");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "test server accept failed");
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                state.accepted.fetch_add(1, Ordering::Relaxed);
                state.open.fetch_add(1, Ordering::Relaxed);

                let conn_state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, Arc::clone(&conn_state)).await {
                        debug!(%peer, error = %err, "test connection ended with error");
                    }
                    conn_state.open.fetch_sub(1, Ordering::Relaxed);
                });
            }
        }
    }
    debug!("test server stopped");
}

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns the final outcome.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
