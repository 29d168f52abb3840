//! Per-request region allocator.
//!
//! A [`Zone`] owns every dynamic buffer of one request/response cycle: the
//! copied key and value, the response header and extras, and any finalizers
//! registered against the region. The zone is *moved* along the pipeline
//! (connection → backend request → backend response → response bundle) and
//! dropped only after the vectored write covering its buffers completes, so
//! [`ZoneSlice`] pointers handed out here stay valid across the whole async
//! round-trip.

use std::fmt;

/// Minimum chunk size; `with_capacity` and growth never allocate less.
const MIN_CHUNK: usize = 64;

/// Immutable byte slice backed by a [`Zone`].
///
/// Holds a raw pointer into a zone chunk. Chunk payloads are stable heap
/// allocations, so the pointer survives both later zone growth and moves of
/// the `Zone` value across threads. Callers must keep the owning zone alive
/// for as long as the slice is read; every holder in this crate carries the
/// slice and its zone in the same struct.
#[derive(Clone, Copy)]
pub struct ZoneSlice {
    data: *const u8,
    len: usize,
}

unsafe impl Send for ZoneSlice {}
unsafe impl Sync for ZoneSlice {}

impl ZoneSlice {
    /// An empty slice tied to no zone.
    pub fn empty() -> Self {
        Self {
            data: std::ptr::NonNull::dangling().as_ptr(),
            len: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data
    }
}

impl fmt::Debug for ZoneSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZoneSlice({} bytes)", self.len)
    }
}

/// Bump region with chunked growth and LIFO finalizers.
pub struct Zone {
    chunks: Vec<Box<[u8]>>,
    /// Bytes used in the last chunk.
    used: usize,
    finalizers: Vec<Box<dyn FnOnce() + Send>>,
}

impl Zone {
    pub fn with_capacity(capacity: usize) -> Self {
        let first = capacity.max(MIN_CHUNK);
        Self {
            chunks: vec![vec![0u8; first].into_boxed_slice()],
            used: 0,
            finalizers: Vec::new(),
        }
    }

    /// Copy `bytes` into the region and return a stable view of the copy.
    pub fn copy_bytes(&mut self, bytes: &[u8]) -> ZoneSlice {
        if bytes.is_empty() {
            return ZoneSlice::empty();
        }

        let last = self.chunks.last().expect("zone always has a chunk");
        if last.len() - self.used < bytes.len() {
            // Double the last chunk size so repeated small copies stay cheap.
            let grow = bytes.len().max(last.len() * 2).max(MIN_CHUNK);
            self.chunks.push(vec![0u8; grow].into_boxed_slice());
            self.used = 0;
        }

        let chunk = self.chunks.last_mut().expect("zone always has a chunk");
        let start = self.used;
        chunk[start..start + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();

        ZoneSlice {
            data: chunk[start..].as_ptr(),
            len: bytes.len(),
        }
    }

    /// Register a finalizer. Finalizers run in LIFO order when the zone is
    /// dropped.
    #[allow(dead_code)] // unused by the server binary's module tree
    pub fn push_finalizer(&mut self, f: impl FnOnce() + Send + 'static) {
        self.finalizers.push(Box::new(f));
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        while let Some(f) = self.finalizers.pop() {
            f();
        }
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: usize = self.chunks.iter().map(|c| c.len()).sum();
        write!(
            f,
            "Zone({} chunks, {} bytes, {} finalizers)",
            self.chunks.len(),
            total,
            self.finalizers.len()
        )
    }
}
