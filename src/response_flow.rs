//! Response side of a connection: typed per-request entries and wire
//! formatting.
//!
//! The store invokes `complete` on its own thread. Every completion first
//! checks queue validity (a torn-down connection turns it into a no-op),
//! then formats the response into the request's zone and hands the iovec
//! bundle to the ordered response queue.

use std::sync::Arc;

use crate::backend::{DeleteResponse, GetResponse, SetResponse};
use crate::constants::{GET_EXTRAS_LEN, HEADER_SIZE};
use crate::metrics;
use crate::protocol::{
    self, RES_INVALID_ARGUMENTS, RES_KEY_NOT_FOUND, RES_NO_ERROR, RES_OUT_OF_MEMORY,
};
use crate::response_queue::{ResponseBundle, ResponseQueue, SlotId};
use crate::zone::{Zone, ZoneSlice};

/// Per-request record: the reserved response slot plus the echoed header
/// fields. The queue handle keeps the queue alive past connection teardown
/// so a late completion has something valid to bounce off.
pub struct Entry {
    pub queue: Arc<ResponseQueue>,
    pub slot: SlotId,
    pub opcode: u8,
    pub opaque: u32,
}

pub struct GetEntry {
    pub base: Entry,
    /// Echo the key in the response (GETK / GETKQ).
    pub flag_key: bool,
    /// Suppress miss/error responses (GETQ / GETKQ).
    pub flag_quiet: bool,
}

pub struct SetEntry {
    pub base: Entry,
}

pub struct DeleteEntry {
    pub base: Entry,
}

const ZERO_FLAG: [u8; GET_EXTRAS_LEN] = [0u8; GET_EXTRAS_LEN];

impl GetEntry {
    pub fn complete(self, res: GetResponse) {
        let GetResponse {
            error,
            val,
            key,
            life,
        } = res;
        let e = self.base;
        if !e.queue.is_valid() {
            return;
        }

        if error {
            if self.flag_quiet {
                send_nosend(e);
            } else {
                send_nodata(e, life, RES_INVALID_ARGUMENTS);
            }
            return;
        }

        match val {
            None => {
                if self.flag_quiet {
                    send_nosend(e);
                } else {
                    send_nodata(e, life, RES_KEY_NOT_FOUND);
                }
            }
            Some(val) => {
                let key = if self.flag_key { Some(key) } else { None };
                send_data(e, life, RES_NO_ERROR, key, val);
            }
        }
    }
}

impl SetEntry {
    pub fn complete(self, res: SetResponse) {
        let e = self.base;
        if !e.queue.is_valid() {
            return;
        }

        if res.error {
            send_nodata(e, res.life, RES_OUT_OF_MEMORY);
        } else {
            send_nodata(e, res.life, RES_NO_ERROR);
        }
    }
}

impl DeleteEntry {
    pub fn complete(self, res: DeleteResponse) {
        let e = self.base;
        if !e.queue.is_valid() {
            return;
        }

        if res.error {
            send_nodata(e, res.life, RES_INVALID_ARGUMENTS);
        } else if res.deleted {
            send_nodata(e, res.life, RES_NO_ERROR);
        } else {
            // Source gateway reported OUT_OF_MEMORY for delete on a missing
            // key; kept for wire compatibility.
            send_nodata(e, res.life, RES_OUT_OF_MEMORY);
        }
    }
}

/// Consume the slot without emitting bytes (quiet miss/error).
pub fn send_nosend(e: Entry) {
    metrics::inc_quiet_suppressed();
    e.queue.reached_try_send(e.slot, ResponseBundle::no_emit());
}

/// Header-only response.
pub fn send_nodata(e: Entry, mut life: Zone, status: u16) {
    let mut hbuf = [0u8; HEADER_SIZE];
    protocol::pack_response_header(&mut hbuf, e.opcode, status, 0, 0, 0, e.opaque);
    let header = life.copy_bytes(&hbuf);
    e.queue
        .reached_try_send(e.slot, ResponseBundle::new(vec![header], life));
}

/// Data response: header, 4-byte zero flags extras, key iff requested,
/// value. Every buffer lives in `life`, which rides the bundle until the
/// vectored write completes.
fn send_data(e: Entry, mut life: Zone, status: u16, key: Option<ZoneSlice>, val: ZoneSlice) {
    let keylen = key.map_or(0, |k| k.len());
    let mut hbuf = [0u8; HEADER_SIZE];
    protocol::pack_response_header(
        &mut hbuf,
        e.opcode,
        status,
        keylen as u16,
        GET_EXTRAS_LEN as u8,
        val.len() as u32,
        e.opaque,
    );
    let header = life.copy_bytes(&hbuf);
    let extras = life.copy_bytes(&ZERO_FLAG);

    let mut vecs = Vec::with_capacity(4);
    vecs.push(header);
    vecs.push(extras);
    if let Some(key) = key {
        if !key.is_empty() {
            vecs.push(key);
        }
    }
    if !val.is_empty() {
        vecs.push(val);
    }

    e.queue.reached_try_send(e.slot, ResponseBundle::new(vecs, life));
}
