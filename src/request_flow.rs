//! Request path: bytes in → frame → zone copy → slot reserve → backend
//! submit.
//!
//! Extracted so integration tests and benchmarks can drive the flow without
//! io_uring.

use std::sync::Arc;

use crate::backend::{Backend, DeleteRequest, GetRequest, Request, SetRequest, key_hash};
use crate::constants::{GET_EXTRAS_LEN, HEADER_SIZE};
use crate::protocol::{
    self, Command, OP_GETK, OP_GETKQ, OP_GETQ, ParseResult, RES_NO_ERROR, RequestHeader,
};
use crate::response_flow::{self, DeleteEntry, Entry, GetEntry, SetEntry};
use crate::response_queue::ResponseQueue;
use crate::zone::Zone;

/// Error from processing request bytes. Both variants are fatal to the
/// connection.
#[derive(Debug)]
pub enum ProcessError {
    /// Malformed frame or unsupported opcode.
    Parse(&'static str),
    /// Supported op carrying arguments this gateway rejects (non-zero
    /// cas/flags/expiration).
    InvalidArgument(&'static str),
}

/// Process all complete requests in `buf`, reserving a response slot and
/// submitting to the backend for each. Returns (bytes consumed, requests
/// dispatched); unconsumed bytes belong to an incomplete trailing frame and
/// must be retained by the caller.
pub fn process_requests_from_buffer(
    buf: &[u8],
    backend: &mut dyn Backend,
    queue: &Arc<ResponseQueue>,
) -> Result<(usize, usize), ProcessError> {
    let mut consumed = 0;
    let mut dispatched = 0;
    while consumed < buf.len() {
        let slice = &buf[consumed..];
        match protocol::try_parse_request(slice) {
            ParseResult::Complete {
                header,
                command,
                consumed: frame_len,
            } => {
                dispatch(&header, command, backend, queue)?;
                dispatched += 1;
                consumed += frame_len;
            }
            ParseResult::Incomplete(_) => break,
            ParseResult::Error(e) => return Err(ProcessError::Parse(e)),
        }
    }
    Ok((consumed, dispatched))
}

fn entry_for(header: &RequestHeader, queue: &Arc<ResponseQueue>) -> Entry {
    Entry {
        queue: Arc::clone(queue),
        // The slot must be reserved before the backend sees the request, so
        // even a synchronous completion finds its reservation.
        slot: queue.push_entry(),
        opcode: header.opcode,
        opaque: header.opaque,
    }
}

fn dispatch(
    header: &RequestHeader,
    command: Command<'_>,
    backend: &mut dyn Backend,
    queue: &Arc<ResponseQueue>,
) -> Result<(), ProcessError> {
    match command {
        Command::Get { key } => {
            // Headroom for the response header + extras next to the key.
            let mut life = Zone::with_capacity(key.len() + HEADER_SIZE + GET_EXTRAS_LEN);
            let key_slice = life.copy_bytes(key);
            let entry = GetEntry {
                base: entry_for(header, queue),
                flag_key: matches!(header.opcode, OP_GETK | OP_GETKQ),
                flag_quiet: matches!(header.opcode, OP_GETQ | OP_GETKQ),
            };
            backend.submit(Request::Get(GetRequest {
                key: key_slice,
                hash: key_hash(key),
                entry,
                life,
            }));
        }
        Command::Set {
            key,
            val,
            flags,
            expiration,
        } => {
            if header.cas != 0 || flags != 0 || expiration != 0 {
                return Err(ProcessError::InvalidArgument(
                    "set with non-zero cas/flags/expiration",
                ));
            }
            let mut life = Zone::with_capacity(key.len() + val.len() + HEADER_SIZE);
            let key_slice = life.copy_bytes(key);
            let val_slice = life.copy_bytes(val);
            let entry = SetEntry {
                base: entry_for(header, queue),
            };
            backend.submit(Request::Set(SetRequest {
                key: key_slice,
                val: val_slice,
                hash: key_hash(key),
                entry,
                life,
            }));
        }
        Command::Delete { key, expiration } => {
            if expiration != 0 {
                return Err(ProcessError::InvalidArgument(
                    "delete with non-zero expiration",
                ));
            }
            let mut life = Zone::with_capacity(key.len() + HEADER_SIZE);
            let key_slice = life.copy_bytes(key);
            let entry = DeleteEntry {
                base: entry_for(header, queue),
            };
            backend.submit(Request::Delete(DeleteRequest {
                key: key_slice,
                hash: key_hash(key),
                entry,
                life,
            }));
        }
        Command::Noop => {
            let entry = entry_for(header, queue);
            response_flow::send_nodata(entry, Zone::with_capacity(HEADER_SIZE), RES_NO_ERROR);
        }
        Command::Flush { expiration } => {
            if expiration != 0 {
                return Err(ProcessError::InvalidArgument(
                    "flush with non-zero expiration",
                ));
            }
            // Acknowledged inline; nothing is flushed at this layer.
            let entry = entry_for(header, queue);
            response_flow::send_nodata(entry, Zone::with_capacity(HEADER_SIZE), RES_NO_ERROR);
        }
    }
    Ok(())
}
