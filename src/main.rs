mod backend;
mod config;
mod constants;
mod io_thread;
mod metrics;
mod protocol;
mod request_flow;
mod response_channel;
mod response_flow;
mod response_queue;
mod ring_types;
mod store;
mod zone;

use std::os::unix::io::{IntoRawFd, RawFd};
use std::thread;

use clap::Parser;
use disruptor::{BusySpin, build_single_producer};
use socket2::{Domain, Protocol, Socket, Type};

use backend::RingBackend;
use config::{DEFAULT_STORE_BUDGET, REQUEST_RING_SIZE, STORE_SHARDS, WRITE_RING_SIZE};
use io_thread::IoThread;
use response_channel::build_write_channel;
use ring_types::RequestSlot;
use store::{Store, StoreWorker};

#[derive(Parser)]
#[command(about = "memcached-binary-protocol gateway over a hash-sharded store")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 11211)]
    port: u16,

    /// Store shards selected by routing hash
    #[arg(long, default_value_t = STORE_SHARDS)]
    shards: usize,

    /// Store payload budget in megabytes; SETs past it fail OUT_OF_MEMORY
    #[arg(short, long, default_value_t = DEFAULT_STORE_BUDGET >> 20)]
    memory_mb: usize,
}

fn create_listener(port: u16) -> Socket {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .expect("failed to create socket");
    socket.set_reuse_address(true).unwrap();

    // SO_REUSEPORT via raw setsockopt (not in socket2 API)
    unsafe {
        use std::os::unix::io::AsRawFd;
        let optval: libc::c_int = 1;
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    socket.set_nonblocking(true).unwrap();
    socket.set_nodelay(true).unwrap();

    let addr = std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into()).expect("failed to bind");
    socket.listen(1024).expect("failed to listen");
    socket
}

fn create_eventfd() -> std::io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}

fn main() {
    metrics::spawn_reporter();
    let args = Args::parse();

    eprintln!(
        "memgate: port {}, {} shards, {} MB budget",
        args.port, args.shards, args.memory_mb
    );

    // Request ring (SPSC: one IO thread → store worker).
    let builder = build_single_producer(REQUEST_RING_SIZE, RequestSlot::factory, BusySpin);
    let (request_poller, builder) = builder.event_poller();
    let producer = builder.build();

    // Write-order channel back to the IO thread.
    let efd = create_eventfd().expect("failed to create eventfd");
    let (channel, order_poller) = build_write_channel(WRITE_RING_SIZE, efd);

    let worker = StoreWorker {
        poller: request_poller,
        store: Store::new(args.shards, args.memory_mb << 20),
    };
    let store_handle = thread::Builder::new()
        .name("store".into())
        .spawn(move || worker.run())
        .expect("failed to spawn store worker");

    let listen_socket = create_listener(args.port);
    let io = IoThread::new(
        listen_socket.into_raw_fd(),
        RingBackend { producer },
        order_poller,
        efd,
        channel,
    );
    let io_handle = thread::Builder::new()
        .name("io-0".into())
        .spawn(move || io.run())
        .expect("failed to spawn IO thread");

    eprintln!("memgate: ready");

    let _ = io_handle.join();
    let _ = store_handle.join();
}
