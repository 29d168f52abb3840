//! Disruptor slot types and connection tokens.
//!
//! Consumers see ring events behind shared references, so the movable
//! payload of each slot sits in an uncontended `Mutex<Option<_>>`: the
//! producer moves a value in while publishing, the single consumer takes it
//! out. The mutex also keeps the slot types `Sync` even though a zone is
//! not.

use std::sync::Mutex;

use crate::backend::Request;
use crate::response_queue::ResponseBundle;

/// Slot in the request ring (IO thread → store worker).
pub struct RequestSlot {
    pub req: Mutex<Option<Request>>,
}

impl RequestSlot {
    pub fn factory() -> Self {
        Self {
            req: Mutex::new(None),
        }
    }

    pub fn take(&self) -> Option<Request> {
        self.req.lock().expect("request slot poisoned").take()
    }
}

/// Slot in the write-order ring (store worker → IO thread): one drained
/// response bundle tagged with the connection it belongs to.
pub struct WriteOrder {
    pub conn: u64,
    pub bundle: Mutex<Option<ResponseBundle>>,
}

impl WriteOrder {
    pub fn factory() -> Self {
        Self {
            conn: 0,
            bundle: Mutex::new(None),
        }
    }

    pub fn take(&self) -> Option<ResponseBundle> {
        self.bundle.lock().expect("write order poisoned").take()
    }
}

/// Identity of one accepted connection: slab key plus a generation counter.
/// Slab keys are reused after close; the generation keeps a late completion
/// or stale CQE from ever reaching the next connection on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnToken {
    pub key: u16,
    pub generation: u32,
}

impl ConnToken {
    pub fn encode(self) -> u64 {
        (self.generation as u64) << 16 | self.key as u64
    }

    pub fn decode(raw: u64) -> Self {
        Self {
            key: raw as u16,
            generation: (raw >> 16) as u32,
        }
    }
}
