//! io_uring IO thread: accepts connections, frames requests off sockets,
//! dispatches them to the backend, and performs ordered vectored writes of
//! completed response bundles.
//!
//! Compiled only into the server binary so the library stays testable
//! without io_uring.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;

use disruptor::Polling;
use io_uring::{opcode, squeue::Entry as Sqe, types::Fd};
use libc::iovec;
use slab::Slab;

use crate::backend::RingBackend;
use crate::config::{INITIAL_BUFFER_SIZE, RESERVE_SIZE, SLAB_CAPACITY};
use crate::metrics;
use crate::request_flow;
use crate::response_channel::{ConnWriteSink, OrderPoller, WriteChannel};
use crate::response_queue::{ResponseBundle, ResponseQueue};
use crate::ring_types::ConnToken;

const OP_ACCEPT: u64 = 0;
const OP_READ: u64 = 1;
const OP_WRITE: u64 = 2;
const OP_EVENTFD: u64 = 3;

/// user_data layout: op in the top byte, connection generation in bits
/// 16..48, slab key in the low 16. CQEs carrying a stale generation are
/// dropped instead of touching whatever connection reused the slab key.
fn encode_user_data(op: u64, token: ConnToken) -> u64 {
    (op << 56) | (token.generation as u64) << 16 | token.key as u64
}

fn decode_user_data(user_data: u64) -> (u64, ConnToken) {
    (
        user_data >> 56,
        ConnToken {
            key: user_data as u16,
            generation: (user_data >> 16) as u32,
        },
    )
}

/// Thin wrapper around `IoUring` that centralises submission helpers.
struct IoUring {
    inner: io_uring::IoUring,
}

impl IoUring {
    fn new(entries: u32) -> io::Result<Self> {
        Ok(Self {
            inner: io_uring::IoUring::new(entries)?,
        })
    }

    /// Push an SQE, flushing the submission queue to the kernel if full.
    fn push(&mut self, sqe: &Sqe) {
        loop {
            match unsafe { self.inner.submission().push(sqe) } {
                Ok(()) => return,
                Err(_) => {
                    self.inner.submit().expect("submit failed during SQ flush");
                }
            }
        }
    }

    /// Block until at least `n` completions are available.
    fn wait(&mut self, n: usize) {
        self.inner
            .submit_and_wait(n)
            .expect("submit_and_wait failed");
    }

    /// Drain all pending completions into a `(user_data, result)` vec.
    /// Collects eagerly so the borrow on the completion queue is released
    /// before any SQE submissions happen in the same loop iteration.
    fn drain_cqes(&mut self) -> Vec<(u64, i32)> {
        self.inner
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect()
    }
}

struct Connection {
    fd: RawFd,
    generation: u32,
    queue: Arc<ResponseQueue>,
    /// Receive buffer; `read_len` bytes of it are filled. Grows by
    /// RESERVE_SIZE whenever the writable tail runs out, never while a read
    /// is in flight.
    recv_buf: Vec<u8>,
    read_len: usize,
    /// Ordered bundles waiting for the next writev batch.
    backlog: VecDeque<ResponseBundle>,
    /// Bundles covered by the current writev; their zones are released when
    /// the batch is fully written.
    inflight: Vec<ResponseBundle>,
    /// Scatter-gather list for the current writev; rebuilt only while no
    /// write is in flight (the kernel reads it until completion).
    iovecs: Vec<iovec>,
    /// Bytes of the in-flight batch already written (partial-write resume).
    written: usize,
    read_inflight: bool,
    write_inflight: bool,
}

impl Connection {
    fn new(fd: RawFd, generation: u32, queue: Arc<ResponseQueue>) -> Self {
        Self {
            fd,
            generation,
            queue,
            recv_buf: vec![0u8; INITIAL_BUFFER_SIZE],
            read_len: 0,
            backlog: VecDeque::new(),
            inflight: Vec::new(),
            iovecs: Vec::new(),
            written: 0,
            read_inflight: false,
            write_inflight: false,
        }
    }

    /// Rebuild the scatter-gather list from the in-flight bundles, skipping
    /// the `written` prefix after a partial write.
    fn build_iovecs(&mut self) {
        self.iovecs.clear();
        let mut skip = self.written;
        for bundle in &self.inflight {
            for v in &bundle.vecs {
                if skip >= v.len() {
                    skip -= v.len();
                    continue;
                }
                self.iovecs.push(iovec {
                    iov_base: unsafe { v.as_ptr().add(skip) } as *mut libc::c_void,
                    iov_len: v.len() - skip,
                });
                skip = 0;
            }
        }
    }

    fn inflight_total(&self) -> usize {
        self.inflight.iter().map(|b| b.total_len()).sum()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Return value intentionally ignored: on Linux, close() after EINTR
        // still closes the fd (retrying causes double-close).
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn conn_at(conns: &mut Slab<Connection>, token: ConnToken) -> Option<&mut Connection> {
    conns
        .get_mut(token.key as usize)
        .filter(|c| c.generation == token.generation)
}

/// Remove the connection and invalidate its response queue so pending
/// backend completions become no-ops. The fd is closed by Drop.
fn close_conn(conns: &mut Slab<Connection>, token: ConnToken, reason: &str) {
    let Some(conn) = conns.get(token.key as usize) else {
        return;
    };
    if conn.generation != token.generation {
        return;
    }
    eprintln!("io: closing conn {} ({reason})", token.key);
    let conn = conns.remove(token.key as usize);
    conn.queue.invalidate();
    metrics::inc_conn_closed();
}

fn set_nodelay(fd: RawFd) {
    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

pub struct IoThread {
    listen_fd: RawFd,
    backend: RingBackend,
    order_poller: OrderPoller,
    eventfd: RawFd,
    channel: Arc<WriteChannel>,
    next_gen: u32,
}

impl IoThread {
    pub fn new(
        listen_fd: RawFd,
        backend: RingBackend,
        order_poller: OrderPoller,
        eventfd: RawFd,
        channel: Arc<WriteChannel>,
    ) -> Self {
        Self {
            listen_fd,
            backend,
            order_poller,
            eventfd,
            channel,
            next_gen: 0,
        }
    }

    pub fn run(mut self) {
        let mut ring = IoUring::new(4096).expect("failed to create io_uring");
        let mut conns: Slab<Connection> = Slab::with_capacity(SLAB_CAPACITY);
        let mut eventfd_buf: u64 = 0;

        submit_accept(&mut ring, self.listen_fd);
        submit_eventfd_read(&mut ring, self.eventfd, &mut eventfd_buf);

        loop {
            ring.wait(1);

            for (user_data, result) in ring.drain_cqes() {
                let (op, token) = decode_user_data(user_data);
                match op {
                    OP_ACCEPT => self.handle_accept(&mut ring, &mut conns, result),
                    OP_READ => self.handle_read(&mut ring, &mut conns, token, result),
                    OP_WRITE => self.handle_write(&mut ring, &mut conns, token, result),
                    OP_EVENTFD => self.handle_eventfd(&mut ring, &mut conns, &mut eventfd_buf),
                    _ => {}
                }
            }
        }
    }

    fn handle_accept(&mut self, ring: &mut IoUring, conns: &mut Slab<Connection>, result: i32) {
        if result >= 0 {
            let client_fd = result as RawFd;
            if conns.len() >= SLAB_CAPACITY {
                eprintln!("io: connection table full, rejecting fd {client_fd}");
                unsafe {
                    libc::close(client_fd);
                }
            } else {
                set_nodelay(client_fd);
                let generation = self.next_gen;
                self.next_gen = self.next_gen.wrapping_add(1);

                let entry = conns.vacant_entry();
                let token = ConnToken {
                    key: entry.key() as u16,
                    generation,
                };
                let sink = ConnWriteSink {
                    conn: token,
                    channel: Arc::clone(&self.channel),
                };
                let queue = Arc::new(ResponseQueue::new(Box::new(sink)));
                entry.insert(Connection::new(client_fd, generation, queue));
                metrics::inc_conn_opened();
                submit_read(ring, conns, token);
            }
        } else {
            eprintln!(
                "io: accept failed: {}",
                io::Error::from_raw_os_error(-result)
            );
        }
        submit_accept(ring, self.listen_fd);
    }

    fn handle_read(
        &mut self,
        ring: &mut IoUring,
        conns: &mut Slab<Connection>,
        token: ConnToken,
        result: i32,
    ) {
        let Some(conn) = conn_at(conns, token) else {
            return;
        };
        conn.read_inflight = false;

        if result == -libc::EAGAIN || result == -libc::EINTR {
            submit_read(ring, conns, token);
            return;
        }
        if result == 0 {
            close_conn(conns, token, "connection closed by peer");
            return;
        }
        if result < 0 {
            close_conn(conns, token, "read error");
            return;
        }

        conn.read_len += result as usize;

        match request_flow::process_requests_from_buffer(
            &conn.recv_buf[..conn.read_len],
            &mut self.backend,
            &conn.queue,
        ) {
            Ok((consumed, _dispatched)) => {
                if consumed > 0 {
                    conn.recv_buf.copy_within(consumed..conn.read_len, 0);
                    conn.read_len -= consumed;
                }
                submit_read(ring, conns, token);
            }
            Err(e) => {
                metrics::inc_protocol_errors();
                eprintln!("io: protocol error on conn {}: {e:?}", token.key);
                close_conn(conns, token, "protocol error");
            }
        }
    }

    fn handle_write(
        &mut self,
        ring: &mut IoUring,
        conns: &mut Slab<Connection>,
        token: ConnToken,
        result: i32,
    ) {
        let Some(conn) = conn_at(conns, token) else {
            return;
        };
        conn.write_inflight = false;

        if result == -libc::EAGAIN || result == -libc::EINTR {
            submit_write(ring, conns, token);
            return;
        }
        if result < 0 {
            close_conn(conns, token, "write error");
            return;
        }

        conn.written += result as usize;
        if conn.written < conn.inflight_total() {
            // Partial write: resume from the offset before anything newer.
            submit_write(ring, conns, token);
            return;
        }

        for _ in conn.inflight.drain(..) {
            metrics::inc_responses_written();
        }
        conn.written = 0;
        if !conn.backlog.is_empty() {
            submit_write(ring, conns, token);
        }
    }

    fn handle_eventfd(
        &mut self,
        ring: &mut IoUring,
        conns: &mut Slab<Connection>,
        eventfd_buf: &mut u64,
    ) {
        match self.order_poller.poll() {
            Ok(mut guard) => {
                let mut wake: Vec<ConnToken> = Vec::new();
                for order in &mut guard {
                    let token = ConnToken::decode(order.conn);
                    let Some(bundle) = order.take() else {
                        continue;
                    };
                    match conn_at(conns, token) {
                        Some(conn) => {
                            conn.backlog.push_back(bundle);
                            if !conn.write_inflight {
                                wake.push(token);
                            }
                        }
                        // Connection torn down; dropping the bundle releases
                        // its zone.
                        None => {}
                    }
                }
                wake.dedup();
                for token in wake {
                    submit_write(ring, conns, token);
                }
            }
            Err(Polling::NoEvents) => {}
            Err(Polling::Shutdown) => return,
        }

        submit_eventfd_read(ring, self.eventfd, eventfd_buf);
    }
}

fn submit_accept(ring: &mut IoUring, listen_fd: RawFd) {
    let sqe = opcode::Accept::new(Fd(listen_fd), ptr::null_mut(), ptr::null_mut())
        .build()
        .user_data(encode_user_data(OP_ACCEPT, ConnToken { key: 0, generation: 0 }));
    ring.push(&sqe);
}

fn submit_read(ring: &mut IoUring, conns: &mut Slab<Connection>, token: ConnToken) {
    let Some(conn) = conn_at(conns, token) else {
        return;
    };
    if conn.read_inflight {
        return;
    }
    if conn.recv_buf.len() - conn.read_len < RESERVE_SIZE {
        conn.recv_buf.resize(conn.read_len + RESERVE_SIZE, 0);
    }
    conn.read_inflight = true;

    let buf_ptr = unsafe { conn.recv_buf.as_mut_ptr().add(conn.read_len) };
    let buf_len = (conn.recv_buf.len() - conn.read_len) as u32;

    let sqe = opcode::Read::new(Fd(conn.fd), buf_ptr, buf_len)
        .build()
        .user_data(encode_user_data(OP_READ, token));
    ring.push(&sqe);
}

fn submit_write(ring: &mut IoUring, conns: &mut Slab<Connection>, token: ConnToken) {
    let Some(conn) = conn_at(conns, token) else {
        return;
    };
    if conn.write_inflight {
        return;
    }
    if conn.inflight.is_empty() {
        if conn.backlog.is_empty() {
            return;
        }
        conn.inflight.extend(conn.backlog.drain(..));
        conn.written = 0;
    }
    conn.build_iovecs();
    if conn.iovecs.is_empty() {
        conn.inflight.clear();
        conn.written = 0;
        return;
    }
    conn.write_inflight = true;

    let iovecs_ptr = conn.iovecs.as_ptr();
    let iovecs_len = conn.iovecs.len() as u32;

    let sqe = opcode::Writev::new(Fd(conn.fd), iovecs_ptr, iovecs_len)
        .build()
        .user_data(encode_user_data(OP_WRITE, token));
    ring.push(&sqe);
}

fn submit_eventfd_read(ring: &mut IoUring, eventfd: RawFd, buf: &mut u64) {
    // buf as *mut u64 as *mut u8: io_uring Read requires a *mut u8 buffer;
    // the eventfd kernel ABI always writes exactly 8 bytes.
    let sqe = opcode::Read::new(Fd(eventfd), buf as *mut u64 as *mut u8, 8)
        .build()
        .user_data(encode_user_data(OP_EVENTFD, ConnToken { key: 0, generation: 0 }));
    ring.push(&sqe);
}
