#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    // Stall / backpressure (cumulative counts)
    static REQ_RING_FULL: AtomicU64 = AtomicU64::new(0);
    static WRITE_RING_FULL: AtomicU64 = AtomicU64::new(0);
    // Throughput (cumulative)
    static REQUESTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
    static RESPONSES_WRITTEN: AtomicU64 = AtomicU64::new(0);
    static QUIET_SUPPRESSED: AtomicU64 = AtomicU64::new(0);
    // Failure paths
    static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);
    // Gauges
    static OPEN_CONNS: AtomicUsize = AtomicUsize::new(0);
    static MAX_CONNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub req_ring_full: u64,
        pub write_ring_full: u64,
        pub requests_published: u64,
        pub responses_written: u64,
        pub quiet_suppressed: u64,
        pub protocol_errors: u64,
        pub open_conns: usize,
        pub max_conns: usize,
    }

    fn update_max(target: &AtomicUsize, value: usize) {
        let mut prev = target.load(Ordering::Relaxed);
        while value > prev {
            match target.compare_exchange_weak(prev, value, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    pub fn inc_req_ring_full() {
        REQ_RING_FULL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_ring_full() {
        WRITE_RING_FULL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_published() {
        REQUESTS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_responses_written() {
        RESPONSES_WRITTEN.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_quiet_suppressed() {
        QUIET_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_protocol_errors() {
        PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conn_opened() {
        let v = OPEN_CONNS.fetch_add(1, Ordering::Relaxed) + 1;
        update_max(&MAX_CONNS, v);
    }

    pub fn inc_conn_closed() {
        OPEN_CONNS.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            req_ring_full: REQ_RING_FULL.load(Ordering::Relaxed),
            write_ring_full: WRITE_RING_FULL.load(Ordering::Relaxed),
            requests_published: REQUESTS_PUBLISHED.load(Ordering::Relaxed),
            responses_written: RESPONSES_WRITTEN.load(Ordering::Relaxed),
            quiet_suppressed: QUIET_SUPPRESSED.load(Ordering::Relaxed),
            protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
            open_conns: OPEN_CONNS.load(Ordering::Relaxed),
            max_conns: MAX_CONNS.load(Ordering::Relaxed),
        }
    }

    pub fn spawn_reporter() {
        const INTERVAL_SECS: u64 = 10;
        std::thread::spawn(|| {
            let mut last_snap = snapshot();
            loop {
                std::thread::sleep(Duration::from_secs(INTERVAL_SECS));
                let snap = snapshot();
                let published_d = snap
                    .requests_published
                    .saturating_sub(last_snap.requests_published);
                let written_d = snap
                    .responses_written
                    .saturating_sub(last_snap.responses_written);
                let quiet_d = snap.quiet_suppressed.saturating_sub(last_snap.quiet_suppressed);
                let req_full_d = snap.req_ring_full.saturating_sub(last_snap.req_ring_full);
                let write_full_d = snap.write_ring_full.saturating_sub(last_snap.write_ring_full);
                let proto_d = snap.protocol_errors.saturating_sub(last_snap.protocol_errors);
                println!(
                    "metrics delta {}s: published={} written={} quiet={} | stalls: req_ring_full={} write_ring_full={} | proto_errors={} | conns: open={} max={}",
                    INTERVAL_SECS,
                    published_d,
                    written_d,
                    quiet_d,
                    req_full_d,
                    write_full_d,
                    proto_d,
                    snap.open_conns,
                    snap.max_conns,
                );
                last_snap = snap;
            }
        });
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub req_ring_full: u64,
        pub write_ring_full: u64,
        pub requests_published: u64,
        pub responses_written: u64,
        pub quiet_suppressed: u64,
        pub protocol_errors: u64,
        pub open_conns: usize,
        pub max_conns: usize,
    }

    pub fn inc_req_ring_full() {}
    pub fn inc_write_ring_full() {}
    pub fn inc_requests_published() {}
    pub fn inc_responses_written() {}
    pub fn inc_quiet_suppressed() {}
    pub fn inc_protocol_errors() {}
    pub fn inc_conn_opened() {}
    pub fn inc_conn_closed() {}
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            req_ring_full: 0,
            write_ring_full: 0,
            requests_published: 0,
            responses_written: 0,
            quiet_suppressed: 0,
            protocol_errors: 0,
            open_conns: 0,
            max_conns: 0,
        }
    }
    pub fn spawn_reporter() {}
}

pub use imp::*;
