#![allow(dead_code)]

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use memgate::backend::{GetResponse, Request};
use memgate::constants::{HEADER_SIZE, MAGIC_REQUEST};
use memgate::protocol::{
    OP_DELETE, OP_FLUSH, OP_GET, OP_NOOP, OP_SET, ResponseHeader, parse_response_header,
};
use memgate::response_queue::{ResponseBundle, ResponseQueue, WriteSink};

pub fn create_eventfd() -> RawFd {
    unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) }
}

/// Build one binary-protocol request frame.
pub fn build_request(opcode: u8, extras: &[u8], key: &[u8], val: &[u8], opaque: u32) -> Vec<u8> {
    build_request_cas(opcode, extras, key, val, opaque, 0)
}

pub fn build_request_cas(
    opcode: u8,
    extras: &[u8],
    key: &[u8],
    val: &[u8],
    opaque: u32,
    cas: u64,
) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE];
    buf[0] = MAGIC_REQUEST;
    buf[1] = opcode;
    buf[2..4].copy_from_slice(&(key.len() as u16).to_be_bytes());
    buf[4] = extras.len() as u8;
    let bodylen = (extras.len() + key.len() + val.len()) as u32;
    buf[8..12].copy_from_slice(&bodylen.to_be_bytes());
    buf[12..16].copy_from_slice(&opaque.to_be_bytes());
    buf[16..24].copy_from_slice(&cas.to_be_bytes());
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(val);
    buf
}

pub fn build_get(opcode: u8, key: &[u8], opaque: u32) -> Vec<u8> {
    assert!(opcode == OP_GET || opcode == 0x09 || opcode == 0x0c || opcode == 0x0d);
    build_request(opcode, &[], key, &[], opaque)
}

/// SET with zero flags/expiration, the only form the gateway accepts.
pub fn build_set(key: &[u8], val: &[u8], opaque: u32) -> Vec<u8> {
    build_request(OP_SET, &[0u8; 8], key, val, opaque)
}

pub fn build_set_with(
    key: &[u8],
    val: &[u8],
    flags: u32,
    expiration: u32,
    opaque: u32,
) -> Vec<u8> {
    let mut extras = [0u8; 8];
    extras[0..4].copy_from_slice(&flags.to_be_bytes());
    extras[4..8].copy_from_slice(&expiration.to_be_bytes());
    build_request(OP_SET, &extras, key, val, opaque)
}

pub fn build_delete(key: &[u8], opaque: u32) -> Vec<u8> {
    build_request(OP_DELETE, &[], key, &[], opaque)
}

pub fn build_noop(opaque: u32) -> Vec<u8> {
    build_request(OP_NOOP, &[], &[], &[], opaque)
}

pub fn build_flush(opaque: u32) -> Vec<u8> {
    build_request(OP_FLUSH, &[], &[], &[], opaque)
}

/// Write sink recording the flattened bytes of each drained bundle.
pub struct RecordingSink {
    pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl WriteSink for RecordingSink {
    fn writev(&self, bundle: ResponseBundle) {
        self.writes.lock().unwrap().push(flatten(&bundle));
    }
}

pub fn flatten(bundle: &ResponseBundle) -> Vec<u8> {
    let mut bytes = Vec::new();
    for v in &bundle.vecs {
        bytes.extend_from_slice(v.as_slice());
    }
    bytes
}

pub fn queue_with_sink() -> (Arc<ResponseQueue>, Arc<Mutex<Vec<Vec<u8>>>>) {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink {
        writes: Arc::clone(&writes),
    };
    (Arc::new(ResponseQueue::new(Box::new(sink))), writes)
}

/// Split a concatenated response stream into (header, body) frames.
pub fn parse_responses(mut bytes: &[u8]) -> Vec<(ResponseHeader, Vec<u8>)> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        assert!(bytes.len() >= HEADER_SIZE, "truncated response header");
        let mut hbuf = [0u8; HEADER_SIZE];
        hbuf.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = parse_response_header(&hbuf).expect("bad response magic");
        let end = HEADER_SIZE + header.bodylen as usize;
        assert!(bytes.len() >= end, "truncated response body");
        out.push((header, bytes[HEADER_SIZE..end].to_vec()));
        bytes = &bytes[end..];
    }
    out
}

/// Complete a captured GET request as the backend would: copy the value (if
/// any) into the request's zone and invoke the typed completion.
pub fn complete_get(req: Request, val: Option<&[u8]>, error: bool) {
    let Request::Get(r) = req else {
        panic!("expected a GET request");
    };
    let memgate::backend::GetRequest {
        key,
        hash: _,
        entry,
        mut life,
    } = r;
    let val = val.map(|v| life.copy_bytes(v));
    entry.complete(GetResponse {
        error,
        val,
        key,
        life,
    });
}
