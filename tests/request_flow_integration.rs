//! Integration test: request path (bytes → frame → zone copy → slot reserve
//! → backend submit) without io_uring.

mod common;

use memgate::backend::{Backend, Request, key_hash};
use memgate::constants::HEADER_SIZE;
use memgate::protocol::{
    OP_DELETE, OP_FLUSH, OP_GET, OP_GETK, OP_GETKQ, OP_GETQ, OP_NOOP, RES_NO_ERROR,
};
use memgate::request_flow::{self, ProcessError};

/// Backend that captures submitted requests for inspection.
#[derive(Default)]
struct CapturingBackend {
    reqs: Vec<Request>,
}

impl Backend for CapturingBackend {
    fn submit(&mut self, req: Request) {
        self.reqs.push(req);
    }
}

#[test]
fn get_dispatches_key_and_routing_hash() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_get(OP_GET, b"foo", 7);
    let (consumed, dispatched) =
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();

    assert_eq!(consumed, buf.len());
    assert_eq!(dispatched, 1);
    assert_eq!(backend.reqs.len(), 1);
    match &backend.reqs[0] {
        Request::Get(r) => {
            assert_eq!(r.key.as_slice(), b"foo");
            assert_eq!(r.hash, key_hash(b"foo"));
            assert!(!r.entry.flag_key);
            assert!(!r.entry.flag_quiet);
            assert_eq!(r.entry.base.opaque, 7);
            assert_eq!(r.entry.base.opcode, OP_GET);
        }
        _ => panic!("expected a GET request"),
    }
}

#[test]
fn get_variants_derive_quiet_and_key_flags() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let mut buf = common::build_get(OP_GETQ, b"a", 1);
    buf.extend_from_slice(&common::build_get(OP_GETK, b"b", 2));
    buf.extend_from_slice(&common::build_get(OP_GETKQ, b"c", 3));

    request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();

    let flags: Vec<(bool, bool)> = backend
        .reqs
        .iter()
        .map(|r| match r {
            Request::Get(r) => (r.entry.flag_key, r.entry.flag_quiet),
            _ => panic!("expected GET requests"),
        })
        .collect();
    assert_eq!(flags, vec![(false, true), (true, false), (true, true)]);
}

#[test]
fn set_dispatches_zone_backed_key_and_value() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_set(b"k", b"value-bytes", 9);
    let (consumed, dispatched) =
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();

    assert_eq!(consumed, buf.len());
    assert_eq!(dispatched, 1);
    match &backend.reqs[0] {
        Request::Set(r) => {
            assert_eq!(r.key.as_slice(), b"k");
            assert_eq!(r.val.as_slice(), b"value-bytes");
            assert_eq!(r.hash, key_hash(b"k"));
        }
        _ => panic!("expected a SET request"),
    }
}

#[test]
fn multiple_requests_in_one_buffer_all_dispatch() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let mut buf = common::build_set(b"a", b"1", 1);
    buf.extend_from_slice(&common::build_get(OP_GET, b"a", 2));
    buf.extend_from_slice(&common::build_delete(b"a", 3));
    let expected = buf.len();

    let (consumed, dispatched) =
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();
    assert_eq!(consumed, expected);
    assert_eq!(dispatched, 3);
    assert_eq!(backend.reqs.len(), 3);
}

#[test]
fn incomplete_frame_consumes_nothing() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_get(OP_GET, b"abcdef", 1);
    let (consumed, dispatched) =
        request_flow::process_requests_from_buffer(&buf[..buf.len() - 2], &mut backend, &queue)
            .unwrap();
    assert_eq!(consumed, 0);
    assert_eq!(dispatched, 0);
    assert!(backend.reqs.is_empty());
}

#[test]
fn trailing_partial_frame_keeps_prior_requests() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let first = common::build_get(OP_GET, b"whole", 1);
    let second = common::build_get(OP_GET, b"partial", 2);
    let mut buf = first.clone();
    buf.extend_from_slice(&second[..10]);

    let (consumed, dispatched) =
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();
    assert_eq!(consumed, first.len());
    assert_eq!(dispatched, 1);
}

#[test]
fn parse_error_is_fatal() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let mut buf = common::build_get(OP_GET, b"k", 1);
    buf[0] = 0x42;
    let err = request_flow::process_requests_from_buffer(&buf, &mut backend, &queue);
    assert!(matches!(err, Err(ProcessError::Parse(_))));
}

#[test]
fn set_with_flags_is_rejected() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_set_with(b"k", b"v", 1, 0, 1);
    let err = request_flow::process_requests_from_buffer(&buf, &mut backend, &queue);
    assert!(matches!(err, Err(ProcessError::InvalidArgument(_))));
    assert!(backend.reqs.is_empty(), "rejected set must not reach the backend");
}

#[test]
fn set_with_expiration_or_cas_is_rejected() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_set_with(b"k", b"v", 0, 30, 1);
    assert!(matches!(
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue),
        Err(ProcessError::InvalidArgument(_))
    ));

    let buf = common::build_request_cas(memgate::protocol::OP_SET, &[0u8; 8], b"k", b"v", 1, 99);
    assert!(matches!(
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue),
        Err(ProcessError::InvalidArgument(_))
    ));
}

#[test]
fn delete_and_flush_with_expiration_are_rejected() {
    let (queue, _writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_request(OP_DELETE, &30u32.to_be_bytes(), b"k", &[], 1);
    assert!(matches!(
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue),
        Err(ProcessError::InvalidArgument(_))
    ));

    let buf = common::build_request(OP_FLUSH, &30u32.to_be_bytes(), &[], &[], 1);
    assert!(matches!(
        request_flow::process_requests_from_buffer(&buf, &mut backend, &queue),
        Err(ProcessError::InvalidArgument(_))
    ));
}

#[test]
fn noop_responds_immediately_with_no_error() {
    let (queue, writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_noop(0xabcd);
    request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();
    assert!(backend.reqs.is_empty(), "noop never reaches the backend");

    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].len(), HEADER_SIZE);
    let frames = common::parse_responses(&writes[0]);
    let (h, body) = &frames[0];
    assert_eq!(h.opcode, OP_NOOP);
    assert_eq!(h.status, RES_NO_ERROR);
    assert_eq!(h.opaque, 0xabcd);
    assert_eq!(h.bodylen, 0);
    assert_eq!(h.cas, 0);
    assert!(body.is_empty());
}

#[test]
fn flush_acknowledges_without_backend_traffic() {
    let (queue, writes) = common::queue_with_sink();
    let mut backend = CapturingBackend::default();

    let buf = common::build_flush(5);
    request_flow::process_requests_from_buffer(&buf, &mut backend, &queue).unwrap();
    assert!(backend.reqs.is_empty());

    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    let frames = common::parse_responses(&writes[0]);
    let (h, _) = &frames[0];
    assert_eq!(h.opcode, OP_FLUSH);
    assert_eq!(h.status, RES_NO_ERROR);
    assert_eq!(h.opaque, 5);
    assert_eq!(h.bodylen, 0);
}
