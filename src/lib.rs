//! Library crate for memgate: wire framer, zone allocator, ordered response
//! queue, request/response flows, ring plumbing, and the store worker.
//!
//! The **binary** (`main.rs`) is the only io_uring entrypoint: it compiles
//! `io_thread` and spawns the IO thread and the store thread. `io_thread` is
//! intentionally not part of the lib, so the library remains testable
//! without io_uring (the integration tests drive the request and response
//! flows directly).

pub mod backend;
pub mod config;
pub mod constants;
pub mod metrics;
pub mod protocol;
pub mod request_flow;
pub mod response_channel;
pub mod response_flow;
pub mod response_queue;
pub mod ring_types;
pub mod store;
pub mod zone;
