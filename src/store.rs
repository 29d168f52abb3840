//! Backend store worker: consumes the request ring, routes by key hash to a
//! shard, and completes entries.
//!
//! Stands in for the cluster-side router: the same routing hash that would
//! pick an owning storage node here picks an in-process shard.

use std::collections::HashMap;

use disruptor::{EventPoller, Polling, SingleProducerBarrier};

use crate::backend::{
    DeleteRequest, DeleteResponse, GetRequest, GetResponse, Request, SetRequest, SetResponse,
};
use crate::ring_types::RequestSlot;

pub type ReqPoller = EventPoller<RequestSlot, SingleProducerBarrier>;

/// Hash-sharded in-memory store under a payload byte budget.
pub struct Store {
    shards: Vec<HashMap<Box<[u8]>, Box<[u8]>>>,
    budget: usize,
    used: usize,
}

impl Store {
    pub fn new(num_shards: usize, budget: usize) -> Self {
        assert!(num_shards > 0, "store needs at least one shard");
        Self {
            shards: (0..num_shards).map(|_| HashMap::new()).collect(),
            budget,
            used: 0,
        }
    }

    fn shard_idx(&self, hash: u64) -> usize {
        (hash % self.shards.len() as u64) as usize
    }

    pub fn execute(&mut self, req: Request) {
        match req {
            Request::Get(r) => self.get(r),
            Request::Set(r) => self.set(r),
            Request::Delete(r) => self.delete(r),
        }
    }

    fn get(&mut self, req: GetRequest) {
        let GetRequest {
            key,
            hash,
            entry,
            mut life,
        } = req;
        let idx = self.shard_idx(hash);
        // The stored value is copied into the request's zone so the response
        // never references shard memory that a later SET could replace.
        let val = self.shards[idx]
            .get(key.as_slice())
            .map(|v| life.copy_bytes(v));
        entry.complete(GetResponse {
            error: false,
            val,
            key,
            life,
        });
    }

    fn set(&mut self, req: SetRequest) {
        let SetRequest {
            key,
            val,
            hash,
            entry,
            life,
        } = req;
        let add = key.len() + val.len();
        if self.used + add > self.budget {
            entry.complete(SetResponse { error: true, life });
            return;
        }

        let idx = self.shard_idx(hash);
        let prev = self.shards[idx].insert(key.as_slice().into(), val.as_slice().into());
        self.used += add;
        if let Some(prev) = prev {
            self.used = self.used.saturating_sub(key.len() + prev.len());
        }
        entry.complete(SetResponse { error: false, life });
    }

    fn delete(&mut self, req: DeleteRequest) {
        let DeleteRequest {
            key,
            hash,
            entry,
            life,
        } = req;
        let idx = self.shard_idx(hash);
        let removed = self.shards[idx].remove(key.as_slice());
        if let Some(v) = &removed {
            self.used = self.used.saturating_sub(key.len() + v.len());
        }
        entry.complete(DeleteResponse {
            error: false,
            deleted: removed.is_some(),
            life,
        });
    }
}

/// Worker thread: polls the request ring and executes against the store.
pub struct StoreWorker {
    pub poller: ReqPoller,
    pub store: Store,
}

impl StoreWorker {
    pub fn run(mut self) {
        loop {
            match self.poll_once() {
                Ok(_) => {}
                Err(Polling::NoEvents) => std::hint::spin_loop(),
                Err(Polling::Shutdown) => return,
            }
        }
    }

    /// One poll cycle; exposed so tests can drive the worker inline.
    pub fn poll_once(&mut self) -> Result<usize, Polling> {
        let mut guard = self.poller.poll()?;
        let mut processed = 0;
        for slot in &mut guard {
            if let Some(req) = slot.take() {
                self.store.execute(req);
                processed += 1;
            }
        }
        Ok(processed)
    }
}
