use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use kvf_client::{
    ClientError, ClientOptions, ClientTtl, Command, Deadline, KvClient, PoolOptions, Reply,
};

fn spawn_server(
    expected_commands: usize,
    handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream),
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(invalid("missing crlf"));
        }
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(message: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("+{msg}\r\n").as_bytes());
}

fn write_error(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("-{msg}\r\n").as_bytes());
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(format!("${}\r\n", data.len()).as_bytes());
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(format!(":{value}\r\n").as_bytes());
}

fn client_with_addr(addr: String) -> KvClient {
    client_with(ClientOptions {
        addr,
        ..ClientOptions::default()
    })
}

fn client_with(options: ClientOptions) -> KvClient {
    let options = ClientOptions {
        pool: PoolOptions {
            min_connections: 0,
            max_connections: 1,
            ..PoolOptions::default()
        },
        connect_timeout: Duration::from_secs(2),
        io_timeout: Duration::from_secs(2),
        ..options
    };
    KvClient::connect(options).expect("client")
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(2))
}

#[test]
fn set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args, vec![b"GET".to_vec(), b"key".to_vec()]);
            write_bulk(stream, b"value");
        }
        _ => {}
    });

    let client = client_with_addr(addr);
    client.set(b"key", b"value", None, deadline()).expect("set");
    let value = client.get(b"key", deadline()).expect("get");
    assert_eq!(value, Some(b"value".to_vec()));
}

#[test]
fn set_encodes_whole_seconds_as_ex_and_fractions_as_px() {
    let addr = spawn_server(2, |idx, args, stream| {
        match idx {
            0 => assert_eq!(&args[3..], &[b"EX".to_vec(), b"60".to_vec()]),
            1 => assert_eq!(&args[3..], &[b"PX".to_vec(), b"1500".to_vec()]),
            _ => {}
        }
        write_simple(stream, "OK");
    });

    let client = client_with_addr(addr);
    client
        .set(b"k", b"v", Some(Duration::from_secs(60)), deadline())
        .expect("set ex");
    client
        .set(b"k", b"v", Some(Duration::from_millis(1500)), deadline())
        .expect("set px");
}

#[test]
fn ttl_and_delete_map_integer_replies() {
    let addr = spawn_server(4, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"PTTL".to_vec());
            write_integer(stream, 2500);
        }
        1 => write_integer(stream, -1),
        2 => write_integer(stream, -2),
        3 => {
            assert_eq!(args[0], b"DEL".to_vec());
            write_integer(stream, 1);
        }
        _ => {}
    });

    let client = client_with_addr(addr);
    assert_eq!(
        client.ttl(b"a", deadline()).expect("ttl"),
        ClientTtl::ExpiresIn(Duration::from_millis(2500))
    );
    assert_eq!(client.ttl(b"b", deadline()).expect("ttl"), ClientTtl::NoExpiry);
    assert_eq!(client.ttl(b"c", deadline()).expect("ttl"), ClientTtl::Missing);
    assert!(client.delete(b"a", deadline()).expect("del"));
}

#[test]
fn handshake_sends_auth_then_select() {
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args, vec![b"AUTH".to_vec(), b"s3cret".to_vec()]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args, vec![b"SELECT".to_vec(), b"4".to_vec()]);
            write_simple(stream, "OK");
        }
        2 => {
            assert_eq!(args, vec![b"PING".to_vec()]);
            write_simple(stream, "PONG");
        }
        _ => {}
    });

    let client = client_with(ClientOptions {
        addr,
        password: Some("s3cret".to_string()),
        database: 4,
        ..ClientOptions::default()
    });
    client.ping(deadline()).expect("ping");
}

#[test]
fn rejected_auth_surfaces_server_error() {
    let addr = spawn_server(1, |_, _, stream| {
        write_error(stream, "WRONGPASS invalid username-password pair");
    });

    let client = client_with(ClientOptions {
        addr,
        password: Some("wrong".to_string()),
        ..ClientOptions::default()
    });
    match client.ping(deadline()) {
        Err(ClientError::Server { message }) => assert!(message.starts_with(b"WRONGPASS")),
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn exec_many_returns_replies_in_order() {
    let addr = spawn_server(2, |idx, _, stream| match idx {
        0 => write_simple(stream, "OK"),
        _ => write_bulk(stream, b"v"),
    });

    let client = client_with_addr(addr);
    let replies = client
        .exec_many(
            vec![Command::new("SET").arg("k").arg("v"), Command::new("GET").arg("k")],
            deadline(),
        )
        .expect("exec_many");
    assert_eq!(
        replies,
        vec![Reply::Simple(b"OK".to_vec()), Reply::Bulk(Some(b"v".to_vec()))]
    );
}

#[test]
fn slow_reply_times_out_at_deadline() {
    let addr = spawn_server(1, |_, _, stream| {
        thread::sleep(Duration::from_millis(500));
        write_simple(stream, "PONG");
    });

    let client = client_with_addr(addr);
    let started = std::time::Instant::now();
    let result = client.ping(Deadline::after(Duration::from_millis(100)));
    assert!(matches!(result, Err(ClientError::Timeout)), "got {result:?}");
    assert!(started.elapsed() < Duration::from_millis(450));
    // The timed-out connection is discarded rather than returned.
    assert_eq!(client.pool_stats().total, 0);
}
