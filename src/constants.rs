//! Wire-protocol constants shared between server, client, and tests.
//!
//! Operational sizing (ring sizes, slab capacity, buffer growth) lives in
//! `config`.

/// Fixed memcached binary header size, both directions.
pub const HEADER_SIZE: usize = 24;

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Sanity cap on a request's total body (extras + key + value). Frames
/// claiming more are a parse error, not an allocation.
pub const MAX_BODY_LEN: usize = 1 << 20;

/// Extras on a stored value in a GET response: a 4-byte zero flags field.
pub const GET_EXTRAS_LEN: usize = 4;

const _: () = assert!(MAX_BODY_LEN <= u32::MAX as usize);
const _: () = assert!(GET_EXTRAS_LEN <= u8::MAX as usize);
