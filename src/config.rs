//! Server sizing and operational configuration.
//!
//! Hardcoded values that are not shared protocol constants. Protocol
//! constants (header size, body cap) live in `constants`.

use crate::constants::{HEADER_SIZE, MAX_BODY_LEN};

/// Request ring buffer size (disruptor capacity).
pub const REQUEST_RING_SIZE: usize = 65536;

/// Write-order ring size. Must be >= REQUEST_RING_SIZE so a full request
/// ring can always drain its completions without deadlock.
pub const WRITE_RING_SIZE: usize = REQUEST_RING_SIZE;

/// Initial per-connection receive buffer size (bytes).
pub const INITIAL_BUFFER_SIZE: usize = 2048;

/// Writable headroom guaranteed before each socket read; the receive buffer
/// grows by this much when full.
pub const RESERVE_SIZE: usize = 1024;

/// Max concurrent connections per IO thread. Must fit in u16 (slab key half
/// of a connection token).
pub const SLAB_CAPACITY: usize = 4096;

/// Store shards selected by routing hash.
pub const STORE_SHARDS: usize = 16;

/// Default store memory budget (bytes of key + value payload).
pub const DEFAULT_STORE_BUDGET: usize = 64 << 20;

// Compile-time sanity checks
const _: () = assert!(
    SLAB_CAPACITY <= u16::MAX as usize,
    "SLAB_CAPACITY must fit in u16 (connection token key)"
);
const _: () = assert!(
    WRITE_RING_SIZE >= REQUEST_RING_SIZE,
    "write ring smaller than request ring can deadlock the store thread"
);
const _: () = assert!(INITIAL_BUFFER_SIZE >= HEADER_SIZE);
const _: () = assert!(RESERVE_SIZE > 0);
const _: () = assert!(DEFAULT_STORE_BUDGET > MAX_BODY_LEN);
