use std::sync::Arc;
use std::time::Duration;

use argwire_call::{
    CallConfig, CallError, CallReq, CallRes, ChecksumType, Connection, Direction, ErrorMessage,
    FragmentError, InboundCall, Message, ResponseCode,
};
use argwire_frame::{
    Frame, FrameReader, FrameWriter, MessageType, RecyclingFramePool, WriteBuffer,
};
use tokio::sync::mpsc;

fn config(frame_payload_capacity: usize) -> CallConfig {
    CallConfig {
        frame_payload_capacity,
        ..CallConfig::default()
    }
}

fn call_req() -> CallReq {
    CallReq::new("svc", Duration::from_secs(30))
}

/// Move every queued frame from one side to the other, returning any call
/// the receiving side accepted.
fn pump(from: &mut mpsc::Receiver<Frame>, to: &Connection) -> (usize, Option<InboundCall>) {
    let mut count = 0;
    let mut accepted = None;
    while let Ok(frame) = from.try_recv() {
        count += 1;
        if let Some(call) = to.handle_frame(frame).unwrap() {
            accepted = Some(call);
        }
    }
    (count, accepted)
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn multi_fragment_call_roundtrip() {
    let (client, mut to_server) = Connection::new(config(80));
    let (server, mut to_client) = Connection::new(config(80));

    let arg2 = body(333);
    let arg3 = body(2048);
    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"method", &arg2, &arg3).unwrap();

    let (sent, inbound) = pump(&mut to_server, &server);
    assert!(sent > 10, "expected many fragments, got {sent}");
    let mut inbound = inbound.expect("server should accept the call");
    assert_eq!(inbound.service(), "svc");
    assert_eq!(inbound.id(), call.id());

    let [r1, r2, r3] = inbound.request().read_args().await.unwrap();
    assert_eq!(r1, b"method");
    assert_eq!(r2, arg2);
    assert_eq!(r3, arg3);

    inbound.response().messages_mut().call_res.code = ResponseCode::Error;
    inbound.response().write_args(b"", b"", &r3).unwrap();
    assert_eq!(server.inbound_calls(), 0);

    pump(&mut to_client, &client);
    let [s1, s2, s3] = call.response().read_args().await.unwrap();
    assert!(s1.is_empty());
    assert!(s2.is_empty());
    assert_eq!(s3, arg3);
    assert_eq!(call.call_res().code, ResponseCode::Error);
    assert_eq!(client.outbound_calls(), 0);
}

#[tokio::test]
async fn exactly_filled_fragments_read_like_one() {
    // call-req envelope for "svc": flags 1 + fields 34 + checksum type 1 + crc 4
    let envelope = 40;
    let capacity = 64;
    let arg1 = body(capacity - envelope - 2);

    for args in [
        [arg1.clone(), Vec::new(), Vec::new()],
        [arg1.clone(), body(58 - 2 - 2), body(1)],
        [Vec::new(), arg1.clone(), body(200)],
    ] {
        let (client, mut to_server) = Connection::new(config(capacity));
        let (server, _) = Connection::new(config(capacity));
        let mut call = client.begin_call(call_req()).unwrap();
        call.request().write_args(&args[0], &args[1], &args[2]).unwrap();

        let (_, inbound) = pump(&mut to_server, &server);
        let received = inbound.unwrap().request().read_args().await.unwrap();
        assert_eq!(received, args);
    }
}

#[tokio::test]
async fn frames_survive_the_byte_stream() {
    let (client, mut to_server) = Connection::new(config(100));
    let (server, _) = Connection::new(config(100));

    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"op", b"{}", &body(900)).unwrap();

    let mut writer = FrameWriter::new(Vec::new());
    while let Ok(frame) = to_server.try_recv() {
        writer.write_frame(&frame).unwrap();
    }
    let bytes = writer.into_inner();

    let mut reader = FrameReader::new(bytes.as_slice());
    let mut inbound = None;
    loop {
        match reader.read_frame() {
            Ok(frame) => {
                if let Some(call) = server.handle_frame(frame).unwrap() {
                    inbound = Some(call);
                }
            }
            Err(argwire_frame::FrameError::ConnectionClosed) => break,
            Err(err) => panic!("unexpected decode error: {err}"),
        }
    }

    let [a1, a2, a3] = inbound.unwrap().request().read_args().await.unwrap();
    assert_eq!(a1, b"op");
    assert_eq!(a2, b"{}");
    assert_eq!(a3, body(900));
}

#[tokio::test]
async fn crc32c_and_unchecked_calls_roundtrip() {
    for checksum_type in [ChecksumType::Crc32C, ChecksumType::None] {
        let config = CallConfig {
            checksum_type,
            ..config(72)
        };
        let (client, mut to_server) = Connection::new(config);
        let (server, _) = Connection::new(config);

        let mut call = client.begin_call(call_req()).unwrap();
        call.request().write_args(b"a", b"b", &body(500)).unwrap();
        let (_, inbound) = pump(&mut to_server, &server);
        let args = inbound.unwrap().request().read_args().await.unwrap();
        assert_eq!(args[2], body(500), "{checksum_type}");
    }
}

#[tokio::test]
async fn out_of_order_argument_is_state_mismatch() {
    let (client, _to_server) = Connection::new(CallConfig::default());
    let mut call = client.begin_call(call_req()).unwrap();

    let err = call.request().arg2_writer().err().unwrap();
    assert!(matches!(err, CallError::StateMismatch(Direction::Write)));
    assert_eq!(
        call.request().state(),
        argwire_call::ArgState::PreArg1
    );

    // Latched: even the correct next step now fails the same way.
    let again = call.request().arg1_writer().err().unwrap();
    assert!(matches!(again, CallError::StateMismatch(Direction::Write)));
    assert_eq!(call.exchange().shutdown_requests(), 1);
}

#[tokio::test]
async fn full_send_queue_fails_close_with_backpressure() {
    let config = CallConfig {
        send_buffer_size: 1,
        ..CallConfig::default()
    };
    let (client, _to_server) = Connection::new(config);

    let mut first = client.begin_call(call_req()).unwrap();
    first.request().write_args(b"a", b"b", b"c").unwrap();

    let mut second = client.begin_call(call_req()).unwrap();
    second.request().arg1_writer().unwrap().close().unwrap();
    second.request().arg2_writer().unwrap().close().unwrap();
    let mut arg3 = second.request().arg3_writer().unwrap();
    arg3.write_bytes(b"body").unwrap();
    let err = arg3.close().unwrap_err();

    assert!(matches!(err, CallError::BackpressureExceeded));
    assert_eq!(second.exchange().shutdown_requests(), 1);
    assert!(second.exchange().is_shutdown());
    assert!(matches!(
        second.request().error(),
        Some(CallError::BackpressureExceeded)
    ));
    assert_eq!(client.outbound_calls(), 1);
}

#[tokio::test]
async fn cancel_wakes_reader_waiting_for_continuation() {
    let (client, mut to_server) = Connection::new(config(64));
    let (server, mut to_client) = Connection::new(config(64));

    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"m", b"", b"").unwrap();
    let (_, inbound) = pump(&mut to_server, &server);
    let mut inbound = inbound.unwrap();
    inbound.request().read_args().await.unwrap();
    inbound.response().write_args(b"", b"", &body(400)).unwrap();

    // Deliver only the initial response fragment.
    let first = to_client.try_recv().unwrap();
    client.handle_frame(first).unwrap();

    let exchange = Arc::clone(call.exchange());
    let reader = tokio::spawn(async move { call.response().read_args().await });
    tokio::task::yield_now().await;
    exchange.cancellation().cancel();

    let err = reader.await.unwrap().unwrap_err();
    assert!(matches!(err, CallError::Cancelled));
    assert!(err.is_cancellation());
}

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out() {
    let (client, _to_server) = Connection::new(CallConfig::default());
    let mut call = client
        .begin_call(CallReq::new("svc", Duration::from_millis(50)))
        .unwrap();
    call.request().write_args(b"a", b"b", b"c").unwrap();

    let err = call.response().read_args().await.unwrap_err();
    assert!(matches!(err, CallError::Timeout));
    assert_eq!(client.outbound_calls(), 0);
}

#[tokio::test]
async fn closing_connection_cancels_calls() {
    let (client, _to_server) = Connection::new(CallConfig::default());
    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"a", b"b", b"c").unwrap();

    client.close();
    assert!(client.is_closed());
    assert_eq!(client.outbound_calls(), 0);
    assert!(call.exchange().is_shutdown());
    let err = call.response().read_args().await.unwrap_err();
    assert!(matches!(err, CallError::Cancelled));

    let mut late = client.begin_call(call_req()).unwrap();
    let err = late.request().write_args(b"a", b"b", b"c").unwrap_err();
    assert!(matches!(err, CallError::Cancelled));
}

#[tokio::test]
async fn overflowing_peer_queue_abandons_call() {
    let (client, mut to_server) = Connection::new(CallConfig {
        exchange_buffer_size: 1,
        ..config(64)
    });
    let (server, mut to_client) = Connection::new(config(64));

    let mut call = client
        .begin_call(CallReq::new("svc", Duration::ZERO))
        .unwrap();
    call.request().write_args(b"op", b"", b"ping").unwrap();
    let mut inbound = pump(&mut to_server, &server).1.unwrap();
    inbound.request().read_args().await.unwrap();
    inbound.response().write_args(b"", b"", &body(300)).unwrap();

    let mut delivered = 0;
    let mut overflowed = 0;
    while let Ok(frame) = to_client.try_recv() {
        delivered += 1;
        match client.handle_frame(frame) {
            Ok(_) => {}
            Err(CallError::BackpressureExceeded) => overflowed += 1,
            Err(other) => panic!("unexpected routing error: {other}"),
        }
    }
    assert!(delivered > 2, "expected several response frames, got {delivered}");
    assert_eq!(overflowed, 1);
    assert!(call.exchange().is_shutdown());
    assert_eq!(client.outbound_calls(), 0);

    let err = tokio::time::timeout(Duration::from_secs(5), call.response().read_args())
        .await
        .expect("reader must not hang")
        .unwrap_err();
    assert!(matches!(err, CallError::Cancelled));
}

fn response_frame(id: u32, checksum: &[u8]) -> Frame {
    let mut wbuf = WriteBuffer::with_limit(256);
    wbuf.write_u8(0).unwrap();
    CallRes::default().write(&mut wbuf).unwrap();
    wbuf.write_u8(ChecksumType::Crc32.code()).unwrap();
    wbuf.write_bytes(checksum).unwrap();
    Frame::with_payload(id, MessageType::CallRes, wbuf.as_slice()).unwrap()
}

#[tokio::test]
async fn truncated_checksum_latches_codec_error() {
    let (client, _to_server) = Connection::new(CallConfig::default());
    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"a", b"b", b"c").unwrap();

    client
        .handle_frame(response_frame(call.id(), &[0xAA, 0xBB]))
        .unwrap();

    let err = call.response().read_args().await.unwrap_err();
    assert!(matches!(err, CallError::Codec(_)));

    let again = call.response().arg1_reader().await.err().unwrap();
    assert!(matches!(again, CallError::Codec(_)));
    assert_eq!(call.exchange().shutdown_requests(), 1);
}

#[tokio::test]
async fn wrong_checksum_value_is_mismatch() {
    let (client, _to_server) = Connection::new(CallConfig::default());
    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"a", b"b", b"c").unwrap();

    let mut frame = response_frame(call.id(), &[0, 0, 0, 1]);
    let mut payload = frame.payload().to_vec();
    payload.extend_from_slice(&[0, 1, b'x', 0, 0, 0, 0]);
    frame = Frame::with_payload(call.id(), MessageType::CallRes, &payload).unwrap();
    client.handle_frame(frame).unwrap();

    let err = call.response().read_args().await.unwrap_err();
    assert!(matches!(
        err,
        CallError::Fragment(FragmentError::ChecksumMismatch)
    ));
}

#[tokio::test]
async fn peer_error_frame_fails_the_call() {
    let (client, _to_server) = Connection::new(CallConfig::default());
    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"a", b"b", b"c").unwrap();

    let message = ErrorMessage {
        code: 0x03,
        message: "busy".into(),
        ..ErrorMessage::default()
    };
    let mut wbuf = WriteBuffer::with_limit(128);
    message.write(&mut wbuf).unwrap();
    let frame = Frame::with_payload(call.id(), MessageType::Error, wbuf.as_slice()).unwrap();
    client.handle_frame(frame).unwrap();

    let err = call.response().read_args().await.unwrap_err();
    match err {
        CallError::Peer { code, message } => {
            assert_eq!(code, 0x03);
            assert_eq!(message, "busy");
        }
        other => panic!("expected peer error, got {other}"),
    }
}

#[tokio::test]
async fn routing_edge_cases() {
    let (server, _to_client) = Connection::new(CallConfig::default());

    // Continuations for calls nobody knows about are dropped.
    let stray = Frame::with_payload(99, MessageType::CallReqContinue, &[0x00, 0x00]).unwrap();
    assert!(server.handle_frame(stray).unwrap().is_none());

    let (client, mut to_server) = Connection::new(CallConfig::default());
    let mut call = client.begin_call(call_req()).unwrap();
    call.request().write_args(b"a", b"b", b"c").unwrap();
    let frame = to_server.try_recv().unwrap();

    let accepted = server.handle_frame(frame.clone()).unwrap();
    assert!(accepted.is_some());
    assert_eq!(server.inbound_calls(), 1);

    let err = server.handle_frame(frame).err().unwrap();
    assert!(matches!(err, CallError::DuplicateExchange(id) if id == call.id()));
}

#[tokio::test]
async fn pooled_frames_are_reused_after_backpressure() {
    let pool = Arc::new(RecyclingFramePool::new(128, 8));
    let config = CallConfig {
        send_buffer_size: 1,
        frame_payload_capacity: 128,
        ..CallConfig::default()
    };
    let (client, _to_server) = Connection::with_frame_pool(config, pool.clone());

    let mut call = client.begin_call(call_req()).unwrap();
    let err = call
        .request()
        .write_args(b"a", b"b", &body(1000))
        .unwrap_err();
    assert!(matches!(err, CallError::BackpressureExceeded));
    assert_eq!(pool.idle_count(), 1);
}
