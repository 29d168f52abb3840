//! Write-order channel: store worker → IO thread.
//!
//! Drained response bundles ride a disruptor ring to the IO thread that owns
//! the socket; an eventfd write wakes its io_uring. The per-connection
//! [`ConnWriteSink`] is the event-loop writev façade handed to each
//! [`ResponseQueue`](crate::response_queue::ResponseQueue): an ordered,
//! non-blocking enqueue whose buffers stay alive (inside the bundle's zone)
//! until the IO thread finishes the vectored write.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use disruptor::{
    BusySpin, EventPoller, Producer, RingBufferFull, SingleConsumerBarrier, SingleProducer,
    SingleProducerBarrier, build_single_producer,
};

use crate::metrics;
use crate::response_queue::{ResponseBundle, WriteSink};
use crate::ring_types::{ConnToken, WriteOrder};

pub type OrderProducer = SingleProducer<WriteOrder, SingleConsumerBarrier>;
pub type OrderPoller = EventPoller<WriteOrder, SingleProducerBarrier>;

/// Producer half. Completions publish through this from the store thread;
/// the mutex serializes the rare case of multiple completing threads.
pub struct WriteChannel {
    producer: Mutex<OrderProducer>,
    eventfd: RawFd,
}

impl WriteChannel {
    pub fn send(&self, conn: ConnToken, bundle: ResponseBundle) {
        let mut producer = self.producer.lock().expect("write channel poisoned");
        let mut bundle = Some(bundle);
        loop {
            match producer.try_publish(|slot| {
                slot.conn = conn.encode();
                *slot.bundle.get_mut().expect("write order poisoned") = bundle.take();
            }) {
                Ok(_) => break,
                Err(RingBufferFull) => {
                    metrics::inc_write_ring_full();
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Kick the IO thread's io_uring via eventfd. Logs to stderr if the
    /// write fails (e.g. eventfd closed).
    pub fn signal(&self) {
        let val: u64 = 1;
        let ret =
            unsafe { libc::write(self.eventfd, &val as *const u64 as *const libc::c_void, 8) };
        if ret != 8 {
            eprintln!("eventfd write failed: {}", std::io::Error::last_os_error());
        }
    }
}

/// Build a matched producer/poller pair for one IO thread's write orders.
pub fn build_write_channel(capacity: usize, eventfd: RawFd) -> (Arc<WriteChannel>, OrderPoller) {
    let builder = build_single_producer(capacity, WriteOrder::factory, BusySpin);
    let (poller, builder) = builder.event_poller();
    let producer = builder.build();

    (
        Arc::new(WriteChannel {
            producer: Mutex::new(producer),
            eventfd,
        }),
        poller,
    )
}

/// Write sink bound to one connection token.
pub struct ConnWriteSink {
    pub conn: ConnToken,
    pub channel: Arc<WriteChannel>,
}

impl WriteSink for ConnWriteSink {
    fn writev(&self, bundle: ResponseBundle) {
        self.channel.send(self.conn, bundle);
        self.channel.signal();
    }
}
