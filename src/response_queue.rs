//! Ordered per-connection response queue.
//!
//! The backend completes requests on its own thread and out of order; the
//! wire requires responses in exact request order, with quiet misses
//! producing no bytes at all. Each dispatched request reserves a slot here
//! before it is submitted; the completion fills its slot, and whenever the
//! head of the queue becomes ready, the ready prefix is drained to the
//! connection's write sink. A slot whose bundle is empty is removed during
//! the drain without emitting anything, which is how GETQ on a missing key
//! stays silent while still advancing the pipeline.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::zone::{Zone, ZoneSlice};

/// Slot reservation id, monotonically increasing per queue.
pub type SlotId = u64;

/// A formatted response: iovec-ordered slices plus the zone that owns them.
/// The zone rides along until the vectored write completes. An empty vec
/// list is the no-emit bundle (quiet miss or error).
pub struct ResponseBundle {
    pub vecs: Vec<ZoneSlice>,
    pub life: Option<Zone>,
}

impl ResponseBundle {
    pub fn new(vecs: Vec<ZoneSlice>, life: Zone) -> Self {
        Self {
            vecs,
            life: Some(life),
        }
    }

    /// Bundle producing no socket bytes; its slot is still consumed.
    pub fn no_emit() -> Self {
        Self {
            vecs: Vec::new(),
            life: None,
        }
    }

    pub fn is_no_emit(&self) -> bool {
        self.vecs.is_empty()
    }

    pub fn total_len(&self) -> usize {
        self.vecs.iter().map(|v| v.len()).sum()
    }
}

/// Ordered vectored-write façade the queue drains into. `writev` must be a
/// non-blocking enqueue: the queue holds its mutex across the call so that
/// two completions can never interleave their drained prefixes.
pub trait WriteSink: Send {
    fn writev(&self, bundle: ResponseBundle);
}

struct Element {
    slot: SlotId,
    /// `None` while pending; a completion never regresses it.
    response: Option<ResponseBundle>,
}

struct Inner {
    valid: bool,
    next_slot: SlotId,
    queue: VecDeque<Element>,
    sink: Box<dyn WriteSink>,
}

pub struct ResponseQueue {
    inner: Mutex<Inner>,
}

impl ResponseQueue {
    pub fn new(sink: Box<dyn WriteSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                valid: true,
                next_slot: 0,
                queue: VecDeque::new(),
                sink,
            }),
        }
    }

    /// Reserve the next slot, in request arrival order. Must be called
    /// before the request is handed to the backend so that a synchronous
    /// completion always finds its reservation.
    pub fn push_entry(&self) -> SlotId {
        let mut inner = self.inner.lock().expect("response queue poisoned");
        let slot = inner.next_slot;
        inner.next_slot += 1;
        inner.queue.push_back(Element {
            slot,
            response: None,
        });
        slot
    }

    /// Fill `slot` with its formatted response and drain the ready prefix.
    ///
    /// Invoked from the completing thread. A slot that is no longer queued
    /// (late or duplicate completion) and an invalidated queue are both
    /// silent no-ops; the bundle is dropped and its zone freed either way.
    pub fn reached_try_send(&self, slot: SlotId, bundle: ResponseBundle) {
        let mut inner = self.inner.lock().expect("response queue poisoned");

        if !inner.valid {
            return;
        }

        let Some(elem) = inner.queue.iter_mut().find(|e| e.slot == slot) else {
            return;
        };
        elem.response = Some(bundle);

        match inner.queue.front() {
            Some(front) if front.slot == slot => {}
            _ => return,
        }

        while inner
            .queue
            .front()
            .is_some_and(|e| e.response.is_some())
        {
            let elem = inner.queue.pop_front().expect("front checked above");
            let bundle = elem.response.expect("ready checked above");
            if !bundle.is_no_emit() {
                inner.sink.writev(bundle);
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().expect("response queue poisoned").valid
    }

    /// Mark the queue dead. Pending slots are discarded and every later
    /// completion attempt becomes a no-op, so a torn-down connection can
    /// never be written to again.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().expect("response queue poisoned");
        inner.valid = false;
        inner.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink recording the flattened bytes of each drained bundle.
    struct RecordingSink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl WriteSink for RecordingSink {
        fn writev(&self, bundle: ResponseBundle) {
            let mut bytes = Vec::new();
            for v in &bundle.vecs {
                bytes.extend_from_slice(v.as_slice());
            }
            self.writes.lock().unwrap().push(bytes);
        }
    }

    fn queue_with_sink() -> (Arc<ResponseQueue>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            writes: Arc::clone(&writes),
        };
        (Arc::new(ResponseQueue::new(Box::new(sink))), writes)
    }

    fn bundle_of(bytes: &[u8]) -> ResponseBundle {
        let mut zone = Zone::with_capacity(bytes.len());
        let slice = zone.copy_bytes(bytes);
        ResponseBundle::new(vec![slice], zone)
    }

    #[test]
    fn slots_are_monotonic() {
        let (q, _) = queue_with_sink();
        assert_eq!(q.push_entry(), 0);
        assert_eq!(q.push_entry(), 1);
        assert_eq!(q.push_entry(), 2);
    }

    #[test]
    fn in_order_completion_drains_immediately() {
        let (q, writes) = queue_with_sink();
        let a = q.push_entry();
        let b = q.push_entry();

        q.reached_try_send(a, bundle_of(b"first"));
        assert_eq!(*writes.lock().unwrap(), vec![b"first".to_vec()]);

        q.reached_try_send(b, bundle_of(b"second"));
        assert_eq!(
            *writes.lock().unwrap(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[test]
    fn out_of_order_completion_waits_for_head() {
        let (q, writes) = queue_with_sink();
        let a = q.push_entry();
        let b = q.push_entry();

        q.reached_try_send(b, bundle_of(b"second"));
        assert!(writes.lock().unwrap().is_empty());

        q.reached_try_send(a, bundle_of(b"first"));
        assert_eq!(
            *writes.lock().unwrap(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    #[test]
    fn no_emit_slot_advances_silently() {
        let (q, writes) = queue_with_sink();
        let a = q.push_entry();
        let b = q.push_entry();
        let c = q.push_entry();

        // b completes first with data, then a as a quiet miss; draining must
        // skip a's bytes but still release b. c stays pending.
        q.reached_try_send(b, bundle_of(b"hit"));
        assert!(writes.lock().unwrap().is_empty());

        q.reached_try_send(a, ResponseBundle::no_emit());
        assert_eq!(*writes.lock().unwrap(), vec![b"hit".to_vec()]);

        q.reached_try_send(c, bundle_of(b"noop"));
        assert_eq!(
            *writes.lock().unwrap(),
            vec![b"hit".to_vec(), b"noop".to_vec()]
        );
    }

    #[test]
    fn invalidation_makes_completions_noops() {
        let (q, writes) = queue_with_sink();
        let a = q.push_entry();

        q.invalidate();
        assert!(!q.is_valid());

        q.reached_try_send(a, bundle_of(b"late"));
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicate_completion_is_noop() {
        let (q, writes) = queue_with_sink();
        let a = q.push_entry();

        q.reached_try_send(a, bundle_of(b"once"));
        q.reached_try_send(a, bundle_of(b"twice"));
        assert_eq!(*writes.lock().unwrap(), vec![b"once".to_vec()]);
    }

    #[test]
    fn completion_for_unknown_slot_is_noop() {
        let (q, writes) = queue_with_sink();
        let _a = q.push_entry();
        q.reached_try_send(99, bundle_of(b"stray"));
        assert!(writes.lock().unwrap().is_empty());
    }
}
