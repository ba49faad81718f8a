//! # RESP Test Server
//!
//! Accept RESP2 connections, parse commands, and answer them from an
//! in-memory [`Store`]. Supports the command subset the cache facade issues,
//! plus knobs for injecting latency and observing traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::protocol::parse_request;
use crate::store::{Store, TtlStatus};

/// State shared by every connection of one server.
#[derive(Debug, Default)]
pub(crate) struct ServerState {
    pub(crate) store: Store,
    pub(crate) password: Option<String>,
    pub(crate) response_delay_ms: AtomicU64,
    pub(crate) commands: AtomicU64,
    pub(crate) accepted: AtomicU64,
    pub(crate) open: AtomicU64,
}

impl ServerState {
    fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms.load(Ordering::Relaxed))
    }
}

/// Per-connection protocol state.
struct Session {
    db: u32,
    authenticated: bool,
}

/// Handles a single TCP client connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut session = Session {
        db: 0,
        authenticated: state.password.is_none(),
    };

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parse_request(&mut buffer) {
                Ok(Some(args)) => {
                    state.commands.fetch_add(1, Ordering::Relaxed);
                    let delay = state.response_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let response = dispatch_command(&args, &mut session, &state);
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(_) => {
                    stream.write_all(&resp_error("protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn dispatch_command(args: &[Vec<u8>], session: &mut Session, state: &ServerState) -> Vec<u8> {
    if args.is_empty() {
        return resp_error("empty command");
    }

    let cmd = &args[0];
    trace!(command = %String::from_utf8_lossy(cmd), "test server command");
    if eq_ignore_ascii_case(cmd, b"AUTH") {
        return handle_auth(args, session, state);
    }
    if !session.authenticated {
        return resp_raw_error("NOAUTH Authentication required.");
    }

    let store = &state.store;
    let now = Instant::now();
    if eq_ignore_ascii_case(cmd, b"PING") {
        return handle_ping(args);
    }
    if eq_ignore_ascii_case(cmd, b"SELECT") {
        return handle_select(args, session);
    }
    if eq_ignore_ascii_case(cmd, b"GET") {
        return handle_get(args, session, store, now);
    }
    if eq_ignore_ascii_case(cmd, b"SET") {
        return handle_set(args, session, store, now);
    }
    if eq_ignore_ascii_case(cmd, b"DEL") {
        return handle_del(args, session, store, now);
    }
    if eq_ignore_ascii_case(cmd, b"EXPIRE") {
        return handle_expire(args, session, store, now, Duration::from_secs);
    }
    if eq_ignore_ascii_case(cmd, b"PEXPIRE") {
        return handle_expire(args, session, store, now, Duration::from_millis);
    }
    if eq_ignore_ascii_case(cmd, b"TTL") {
        return handle_ttl(args, session, store, now, |remaining| {
            // Round up like Redis so a fresh one-second key reports 1.
            let millis = remaining.as_millis() as i64;
            (millis + 999) / 1000
        });
    }
    if eq_ignore_ascii_case(cmd, b"PTTL") {
        return handle_ttl(args, session, store, now, |remaining| remaining.as_millis() as i64);
    }
    if eq_ignore_ascii_case(cmd, b"DBSIZE") {
        return resp_integer(store.len(session.db, now) as i64);
    }
    if eq_ignore_ascii_case(cmd, b"FLUSHDB") {
        store.flush(session.db);
        return resp_simple("OK");
    }

    resp_error("unknown command")
}

fn handle_auth(args: &[Vec<u8>], session: &mut Session, state: &ServerState) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for AUTH");
    }
    match &state.password {
        None => resp_error("Client sent AUTH, but no password is set"),
        Some(password) if password.as_bytes() == args[1].as_slice() => {
            session.authenticated = true;
            resp_simple("OK")
        }
        Some(_) => resp_raw_error("WRONGPASS invalid username-password pair"),
    }
}

fn handle_ping(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => resp_error("wrong number of arguments for PING"),
    }
}

fn handle_select(args: &[Vec<u8>], session: &mut Session) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for SELECT");
    }
    match parse_u64(&args[1]) {
        Ok(db) if db < 16 => {
            session.db = db as u32;
            resp_simple("OK")
        }
        Ok(_) => resp_error("DB index is out of range"),
        Err(resp) => resp,
    }
}

fn handle_get(args: &[Vec<u8>], session: &Session, store: &Store, now: Instant) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for GET");
    }
    match store.get(session.db, &args[1], now) {
        Some(value) => resp_bulk(&value),
        None => resp_null(),
    }
}

fn handle_set(args: &[Vec<u8>], session: &Session, store: &Store, now: Instant) -> Vec<u8> {
    if args.len() != 3 && args.len() != 5 {
        return resp_error("wrong number of arguments for SET");
    }

    let ttl = if args.len() == 5 {
        let amount = match parse_u64(&args[4]) {
            Ok(0) => return resp_error("invalid expire time in 'set' command"),
            Ok(value) => value,
            Err(resp) => return resp,
        };
        if eq_ignore_ascii_case(&args[3], b"EX") {
            Some(Duration::from_secs(amount))
        } else if eq_ignore_ascii_case(&args[3], b"PX") {
            Some(Duration::from_millis(amount))
        } else {
            return resp_error("syntax error");
        }
    } else {
        None
    };

    store.set(session.db, args[1].clone(), args[2].clone(), ttl, now);
    resp_simple("OK")
}

fn handle_del(args: &[Vec<u8>], session: &Session, store: &Store, now: Instant) -> Vec<u8> {
    if args.len() < 2 {
        return resp_error("wrong number of arguments for DEL");
    }

    let removed = args[1..]
        .iter()
        .filter(|key| store.delete(session.db, key, now))
        .count();
    resp_integer(removed as i64)
}

fn handle_expire(
    args: &[Vec<u8>],
    session: &Session,
    store: &Store,
    now: Instant,
    unit: fn(u64) -> Duration,
) -> Vec<u8> {
    if args.len() != 3 {
        return resp_error("wrong number of arguments for EXPIRE");
    }

    let amount = match parse_u64(&args[2]) {
        Ok(value) => value,
        Err(resp) => return resp,
    };

    if store.expire(session.db, &args[1], unit(amount), now) {
        resp_integer(1)
    } else {
        resp_integer(0)
    }
}

fn handle_ttl(
    args: &[Vec<u8>],
    session: &Session,
    store: &Store,
    now: Instant,
    scale: impl Fn(Duration) -> i64,
) -> Vec<u8> {
    if args.len() != 2 {
        return resp_error("wrong number of arguments for TTL");
    }

    match store.ttl(session.db, &args[1], now) {
        TtlStatus::Missing => resp_integer(-2),
        TtlStatus::NoExpiry => resp_integer(-1),
        TtlStatus::ExpiresIn(remaining) => resp_integer(scale(remaining)),
    }
}

fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_error(message: &str) -> Vec<u8> {
    resp_raw_error(&format!("ERR {message}"))
}

fn resp_raw_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn eq_ignore_ascii_case(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn parse_u64(arg: &[u8]) -> Result<u64, Vec<u8>> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| resp_error("value is not an integer or out of range"))
}
