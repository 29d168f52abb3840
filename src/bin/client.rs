use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use clap::{Parser, Subcommand};

use memgate::constants::{HEADER_SIZE, MAGIC_REQUEST};
use memgate::protocol::{
    OP_DELETE, OP_GET, OP_GETK, OP_GETQ, OP_NOOP, OP_SET, RES_KEY_NOT_FOUND, RES_NO_ERROR,
    RES_OUT_OF_MEMORY, ResponseHeader, parse_response_header,
};

#[derive(Parser)]
#[command(about = "Test client for the memgate binary-protocol gateway")]
struct Args {
    /// Server port
    #[arg(short, long, default_value_t = 11211)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Set/get/delete round-trip and status checks (default)
    Smoke,
    /// Pipelined quiet gets with a trailing noop barrier
    Pipeline {
        /// Number of keys
        #[arg(short, long, default_value_t = 1000)]
        keys: usize,
    },
    /// Benchmark throughput with concurrent pipelined connections
    Bench {
        /// Number of concurrent connections
        #[arg(short, long, default_value_t = 4)]
        connections: usize,
        /// Requests per connection
        #[arg(short, long, default_value_t = 100_000)]
        requests: usize,
    },
}

fn build_request(opcode: u8, extras: &[u8], key: &[u8], val: &[u8], opaque: u32) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE];
    buf[0] = MAGIC_REQUEST;
    buf[1] = opcode;
    buf[2..4].copy_from_slice(&(key.len() as u16).to_be_bytes());
    buf[4] = extras.len() as u8;
    let bodylen = (extras.len() + key.len() + val.len()) as u32;
    buf[8..12].copy_from_slice(&bodylen.to_be_bytes());
    buf[12..16].copy_from_slice(&opaque.to_be_bytes());
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(val);
    buf
}

fn build_set(key: &[u8], val: &[u8], opaque: u32) -> Vec<u8> {
    // flags and expiration must be zero; the gateway closes on anything else
    build_request(OP_SET, &[0u8; 8], key, val, opaque)
}

fn read_response(stream: &mut TcpStream) -> (ResponseHeader, Vec<u8>) {
    let mut hbuf = [0u8; HEADER_SIZE];
    stream
        .read_exact(&mut hbuf)
        .expect("failed to read response header");
    let header = parse_response_header(&hbuf).expect("bad response magic");
    let mut body = vec![0u8; header.bodylen as usize];
    stream
        .read_exact(&mut body)
        .expect("failed to read response body");
    (header, body)
}

fn main() {
    let args = Args::parse();
    let addr = format!("127.0.0.1:{}", args.port);

    match args.command.unwrap_or(Command::Smoke) {
        Command::Smoke => smoke_test(&addr),
        Command::Pipeline { keys } => pipeline_test(&addr, keys),
        Command::Bench {
            connections,
            requests,
        } => bench_test(&addr, connections, requests),
    }
}

fn expect_status(header: &ResponseHeader, status: u16, what: &str) {
    assert_eq!(
        header.status, status,
        "{what}: status {:#06x}, expected {status:#06x}",
        header.status
    );
}

fn smoke_test(addr: &str) {
    eprintln!("smoke test: connecting to {addr}");
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).unwrap();

    stream.write_all(&build_set(b"foo", b"bar", 1)).unwrap();
    let (h, _) = read_response(&mut stream);
    assert_eq!(h.opaque, 1);
    expect_status(&h, RES_NO_ERROR, "set");
    eprintln!("  set foo=bar: OK");

    stream
        .write_all(&build_request(OP_GET, &[], b"foo", &[], 2))
        .unwrap();
    let (h, body) = read_response(&mut stream);
    assert_eq!(h.opaque, 2);
    expect_status(&h, RES_NO_ERROR, "get hit");
    assert_eq!(h.extralen, 4);
    assert_eq!(&body[4..], b"bar");
    eprintln!("  get foo: OK (flags={:?})", &body[..4]);

    stream
        .write_all(&build_request(OP_GETK, &[], b"foo", &[], 3))
        .unwrap();
    let (h, body) = read_response(&mut stream);
    expect_status(&h, RES_NO_ERROR, "getk hit");
    assert_eq!(h.keylen, 3);
    assert_eq!(&body[4..7], b"foo");
    assert_eq!(&body[7..], b"bar");
    eprintln!("  getk foo: OK");

    stream
        .write_all(&build_request(OP_DELETE, &[], b"foo", &[], 4))
        .unwrap();
    let (h, _) = read_response(&mut stream);
    expect_status(&h, RES_NO_ERROR, "delete");
    eprintln!("  delete foo: OK");

    stream
        .write_all(&build_request(OP_GET, &[], b"foo", &[], 5))
        .unwrap();
    let (h, _) = read_response(&mut stream);
    expect_status(&h, RES_KEY_NOT_FOUND, "get miss");
    eprintln!("  get foo after delete: KEY_NOT_FOUND");

    // Delete on a missing key keeps the gateway's OUT_OF_MEMORY status.
    stream
        .write_all(&build_request(OP_DELETE, &[], b"foo", &[], 6))
        .unwrap();
    let (h, _) = read_response(&mut stream);
    expect_status(&h, RES_OUT_OF_MEMORY, "delete miss");
    eprintln!("  delete foo again: OUT_OF_MEMORY (as shipped)");

    stream
        .write_all(&build_request(OP_NOOP, &[], &[], &[], 7))
        .unwrap();
    let (h, _) = read_response(&mut stream);
    assert_eq!(h.opaque, 7);
    expect_status(&h, RES_NO_ERROR, "noop");
    eprintln!("  noop: OK");

    eprintln!("smoke test: PASSED");
}

fn pipeline_test(addr: &str, keys: usize) {
    eprintln!("pipeline test: {keys} quiet gets + noop barrier → {addr}");
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).unwrap();

    // Store every even-numbered key; odd ones will be quiet misses.
    let mut stored = 0usize;
    for i in 0..keys {
        if i % 2 == 0 {
            let key = format!("pipe-{i}");
            stream
                .write_all(&build_set(key.as_bytes(), b"v", i as u32))
                .unwrap();
            stored += 1;
        }
    }
    for _ in 0..stored {
        let (h, _) = read_response(&mut stream);
        expect_status(&h, RES_NO_ERROR, "pipelined set");
    }

    // Quiet gets: misses must produce no bytes; the noop flushes the batch.
    for i in 0..keys {
        let key = format!("pipe-{i}");
        stream
            .write_all(&build_request(OP_GETQ, &[], key.as_bytes(), &[], i as u32))
            .unwrap();
    }
    let noop_opaque = 0xffff_0000u32;
    stream
        .write_all(&build_request(OP_NOOP, &[], &[], &[], noop_opaque))
        .unwrap();

    let mut hits = 0usize;
    loop {
        let (h, body) = read_response(&mut stream);
        if h.opaque == noop_opaque {
            expect_status(&h, RES_NO_ERROR, "noop barrier");
            break;
        }
        expect_status(&h, RES_NO_ERROR, "quiet get hit");
        assert_eq!(h.opaque % 2, 0, "odd keys were never stored");
        assert_eq!(&body[4..], b"v");
        hits += 1;
    }
    assert_eq!(hits, stored, "every stored key must hit");

    eprintln!("pipeline test: PASSED ({hits} hits, {} suppressed)", keys - hits);
}

fn bench_test(addr: &str, num_connections: usize, requests_per_conn: usize) {
    eprintln!(
        "bench: {num_connections} connections x {requests_per_conn} pipelined gets → {addr}"
    );

    // One warm key; every get returns 24 + 4 + 8 bytes.
    let val = [0x5au8; 8];
    {
        let mut stream = TcpStream::connect(addr).expect("failed to connect");
        stream.write_all(&build_set(b"bench", &val, 0)).unwrap();
        let (h, _) = read_response(&mut stream);
        expect_status(&h, RES_NO_ERROR, "bench set");
    }

    let req = build_request(OP_GET, &[], b"bench", &[], 9);
    let response_size = HEADER_SIZE + 4 + val.len();

    let start = Instant::now();

    let handles: Vec<_> = (0..num_connections)
        .map(|_| {
            let addr = addr.to_string();
            let req = req.clone();
            std::thread::spawn(move || {
                let stream = TcpStream::connect(&addr).expect("failed to connect");
                stream.set_nodelay(true).unwrap();

                let mut writer = stream.try_clone().expect("clone failed");
                let mut reader = stream;

                let write_handle = std::thread::spawn(move || {
                    for _ in 0..requests_per_conn {
                        writer.write_all(&req).expect("write failed");
                    }
                });

                let mut resp_buf = vec![0u8; response_size * 1024];
                let mut total_bytes_needed = requests_per_conn * response_size;
                while total_bytes_needed > 0 {
                    let to_read = total_bytes_needed.min(resp_buf.len());
                    let n = reader.read(&mut resp_buf[..to_read]).expect("read failed");
                    if n == 0 {
                        panic!("connection closed with {total_bytes_needed} bytes remaining");
                    }
                    total_bytes_needed -= n;
                }

                write_handle.join().expect("writer panicked");
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked");
    }

    let elapsed = start.elapsed();
    let total = num_connections * requests_per_conn;
    let qps = total as f64 / elapsed.as_secs_f64();
    eprintln!(
        "bench: {} requests in {:.2}s = {:.0} QPS",
        total,
        elapsed.as_secs_f64(),
        qps
    );
}
