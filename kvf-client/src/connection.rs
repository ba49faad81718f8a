//! Single TCP connection speaking RESP2.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::debug;

use crate::client::ClientOptions;
use crate::deadline::Deadline;
use crate::error::{ClientError, ClientResult};
use crate::resp::{read_reply, Command, Reply};

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub(crate) struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    io_timeout: Duration,
    last_used: Instant,
}

impl Connection {
    /// Dials the server and runs the AUTH/SELECT handshake.
    pub(crate) fn open(options: &ClientOptions, deadline: Deadline) -> ClientResult<Self> {
        let stream = dial(&options.addr, deadline.socket_timeout(options.connect_timeout))?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            io_timeout: options.io_timeout,
            last_used: Instant::now(),
        };
        conn.handshake(options, deadline)?;
        debug!(addr = %options.addr, database = options.database, "connection established");
        Ok(conn)
    }

    fn handshake(&mut self, options: &ClientOptions, deadline: Deadline) -> ClientResult<()> {
        if let Some(password) = options.password.as_deref().filter(|p| !p.is_empty()) {
            let auth = Command::new("AUTH").arg(password);
            expect_ok(&auth, self.exec(&auth, deadline)?)?;
        }
        if options.database != 0 {
            let select = Command::new("SELECT").arg_u64(options.database as u64);
            expect_ok(&select, self.exec(&select, deadline)?)?;
        }
        Ok(())
    }

    /// Writes every command, then reads one reply per command in order.
    pub(crate) fn run<'a, I>(&mut self, commands: I, deadline: Deadline) -> ClientResult<Vec<Reply>>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        let count = self.send(commands, deadline)?;
        self.receive(count, deadline)
    }

    pub(crate) fn exec(&mut self, command: &Command, deadline: Deadline) -> ClientResult<Reply> {
        let mut replies = self.run(std::iter::once(command), deadline)?;
        replies.pop().ok_or(ClientError::Protocol("missing reply"))
    }

    fn send<'a, I>(&mut self, commands: I, deadline: Deadline) -> ClientResult<usize>
    where
        I: IntoIterator<Item = &'a Command>,
    {
        if deadline.is_expired() {
            return Err(ClientError::Timeout);
        }

        self.write_buf.clear();
        let mut count = 0;
        for command in commands {
            command.encode_into(&mut self.write_buf);
            count += 1;
        }

        let stream = self.reader.get_mut();
        stream.set_write_timeout(Some(deadline.socket_timeout(self.io_timeout)))?;
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        Ok(count)
    }

    fn receive(&mut self, count: usize, deadline: Deadline) -> ClientResult<Vec<Reply>> {
        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            let timeout = deadline.socket_timeout(self.io_timeout);
            self.reader.get_ref().set_read_timeout(Some(timeout))?;
            replies.push(read_reply(&mut self.reader, &mut self.line_buf)?);
        }
        self.last_used = Instant::now();
        Ok(replies)
    }

    /// Time since the last completed round trip.
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

fn expect_ok(command: &Command, reply: Reply) -> ClientResult<()> {
    match reply.into_result()? {
        Reply::Simple(_) => Ok(()),
        _ => Err(ClientError::UnexpectedResponse {
            command: command.name_lossy(),
        }),
    }
}

fn dial(addr: &str, timeout: Duration) -> ClientResult<TcpStream> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(addr.to_string()))?
        .collect();

    let mut last_err = None;
    for candidate in &candidates {
        match TcpStream::connect_timeout(candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%candidate, error = %err, "dial attempt failed");
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) => Err(err.into()),
        None => Err(ClientError::InvalidAddress(addr.to_string())),
    }
}
