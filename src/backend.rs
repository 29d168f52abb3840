//! Backend façade: typed submit-with-completion requests.
//!
//! The gateway hands each framed request to a [`Backend`] together with the
//! key's routing hash, the zone that owns the copied key/value bytes, and a
//! typed entry that formats the response when the backend completes. The
//! in-process implementation is [`RingBackend`], which publishes requests
//! into the store worker's disruptor ring by move.

use disruptor::{Producer, RingBufferFull, SingleConsumerBarrier, SingleProducer};

use crate::metrics;
use crate::response_flow::{DeleteEntry, GetEntry, SetEntry};
use crate::ring_types::RequestSlot;
use crate::zone::{Zone, ZoneSlice};

pub struct GetRequest {
    pub key: ZoneSlice,
    pub hash: u64,
    pub entry: GetEntry,
    pub life: Zone,
}

pub struct SetRequest {
    pub key: ZoneSlice,
    pub val: ZoneSlice,
    pub hash: u64,
    pub entry: SetEntry,
    pub life: Zone,
}

pub struct DeleteRequest {
    pub key: ZoneSlice,
    pub hash: u64,
    pub entry: DeleteEntry,
    pub life: Zone,
}

pub enum Request {
    Get(GetRequest),
    Set(SetRequest),
    Delete(DeleteRequest),
}

/// GET completion. `val == None && !error` encodes a miss. `key` echoes the
/// request key (GETK responses carry it); both slices live in `life`.
pub struct GetResponse {
    pub error: bool,
    pub val: Option<ZoneSlice>,
    pub key: ZoneSlice,
    pub life: Zone,
}

pub struct SetResponse {
    pub error: bool,
    pub life: Zone,
}

pub struct DeleteResponse {
    pub error: bool,
    pub deleted: bool,
    pub life: Zone,
}

/// Stable host-agreed key hash; the routing layer across the cluster must
/// agree on it, so it is pinned to xxhash64 with a zero seed.
pub fn key_hash(key: &[u8]) -> u64 {
    twox_hash::XxHash64::oneshot(0, key)
}

pub trait Backend {
    fn submit(&mut self, req: Request);
}

pub type ReqProducer = SingleProducer<RequestSlot, SingleConsumerBarrier>;

/// Publishes requests to the store worker's ring, spinning while it is full.
pub struct RingBackend {
    pub producer: ReqProducer,
}

impl Backend for RingBackend {
    fn submit(&mut self, req: Request) {
        let mut req = Some(req);
        loop {
            match self.producer.try_publish(|slot| {
                *slot.req.get_mut().expect("request slot poisoned") = req.take();
            }) {
                Ok(_) => {
                    metrics::inc_requests_published();
                    break;
                }
                Err(RingBufferFull) => {
                    metrics::inc_req_ring_full();
                    std::hint::spin_loop();
                }
            }
        }
    }
}
