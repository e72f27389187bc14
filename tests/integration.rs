//! Integration tests for sockwire.
//!
//! These tests verify the integration between the decoder, the message
//! assembler and the writer task.

use bytes::Bytes;
use sockwire::protocol::{
    build_frame, build_masked_frame, CloseCode, CloseReason, DecoderSignal, FrameDecoder,
    FrameType, MessageAssembler, MessageSignal, MessageType,
};
use sockwire::writer::{spawn_writer_task_default, OutboundFrame};
use sockwire::{DecoderConfig, Message, ProtocolError, Utf8Policy};
use tokio::io::{duplex, AsyncReadExt};

const KEY: [u8; 4] = [0xA1, 0xB2, 0xC3, 0xD4];

/// Push every frame through the assembler, collecting complete messages.
fn assemble(decoder: &mut FrameDecoder, assembler: &mut MessageAssembler, data: &[u8]) -> Vec<Message> {
    let mut messages = Vec::new();
    for frame in decoder.push(data).unwrap() {
        match assembler.accept(frame) {
            MessageSignal::Pending => {}
            MessageSignal::MessageComplete(message) => messages.push(message),
            MessageSignal::Error(err) => panic!("unexpected error: {}", err),
        }
    }
    messages
}

/// Test a fragmented message with an interleaved ping, fed in every chunk size.
#[test]
fn test_fragmented_stream_any_chunking() {
    let mut wire = Vec::new();
    wire.extend(build_masked_frame(false, FrameType::Text, b"frag", KEY));
    wire.extend(build_masked_frame(true, FrameType::Ping, b"", KEY));
    wire.extend(build_masked_frame(false, FrameType::Continuation, b"men", KEY));
    wire.extend(build_masked_frame(true, FrameType::Continuation, b"ted", KEY));
    wire.extend(build_masked_frame(true, FrameType::Binary, &[0u8; 300], KEY));

    for chunk_size in 1..=wire.len() {
        let mut decoder = FrameDecoder::server_side();
        let mut assembler = MessageAssembler::default();
        let mut messages = Vec::new();

        for chunk in wire.chunks(chunk_size) {
            messages.extend(assemble(&mut decoder, &mut assembler, chunk));
        }

        assert_eq!(messages.len(), 2, "chunk size {}", chunk_size);
        assert_eq!(messages[0].as_text(), Some("fragmented"));
        assert_eq!(messages[1].message_type, MessageType::Binary);
        assert_eq!(messages[1].len(), 300);
        assert!(decoder.is_idle());
        assert!(!assembler.in_progress());
    }
}

/// Test that frames before a bad byte are still delivered.
#[test]
fn test_frames_before_error_are_delivered() {
    let mut decoder = FrameDecoder::server_side();
    let mut wire = build_masked_frame(true, FrameType::Text, b"ok", KEY);
    wire.push(0x83); // FIN | reserved opcode 0x3

    let (consumed, signal) = decoder.feed(&wire);
    assert_eq!(consumed, wire.len() - 1);
    match signal {
        DecoderSignal::FrameComplete(frame) => assert_eq!(frame.payload(), b"ok"),
        other => panic!("expected a frame, got {:?}", other),
    }

    let (_, signal) = decoder.feed(&wire[consumed..]);
    assert_eq!(signal, DecoderSignal::ProtocolError(ProtocolError::InvalidOpcode(0x3)));
    assert!(decoder.is_failed());
}

/// Test the payload limit fires before any payload byte arrives.
#[test]
fn test_payload_limit_checked_on_header() {
    let config = DecoderConfig {
        max_payload_size: 1000,
        ..DecoderConfig::server()
    };
    let mut decoder = FrameDecoder::new(config);

    // 16-bit length 1001, masked; no mask key or payload yet
    let err = decoder.push(&[0x82, 0xFE, 0x03, 0xE9]).unwrap_err();
    assert_eq!(err, ProtocolError::PayloadTooLarge { size: 1001, max: 1000 });
}

/// Test the assembler rejecting bad UTF-8 only once the message is whole.
#[test]
fn test_utf8_checked_on_complete_message() {
    let euro = "€".as_bytes();
    let mut wire = Vec::new();
    wire.extend(build_masked_frame(false, FrameType::Text, &euro[..1], KEY));
    wire.extend(build_masked_frame(true, FrameType::Continuation, &euro[1..], KEY));

    let mut decoder = FrameDecoder::server_side();
    let mut assembler = MessageAssembler::new(1024, Utf8Policy::Reject);
    let messages = assemble(&mut decoder, &mut assembler, &wire);
    assert_eq!(messages[0].as_text(), Some("€"));

    let bad = build_masked_frame(true, FrameType::Text, &euro[..2], KEY);
    let frames = decoder.push(&bad).unwrap();
    assert_eq!(
        assembler.accept(frames[0].clone()),
        MessageSignal::Error(ProtocolError::InvalidUtf8)
    );
}

/// Test that writer output decodes back on the client side.
#[tokio::test]
async fn test_writer_output_decodes() {
    let (server, mut client) = duplex(64 * 1024);
    let (writer, task) = spawn_writer_task_default(server);

    let large = Bytes::from(vec![7u8; 70_000]);
    writer.send(OutboundFrame::text("hi")).await.unwrap();
    writer.send(OutboundFrame::binary(large.clone())).await.unwrap();
    writer.send(OutboundFrame::ping("beat")).await.unwrap();
    let reason = CloseReason::new(CloseCode::GoingAway, "bye");
    writer.send(OutboundFrame::close(Some(&reason))).await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    task.await.unwrap().unwrap();

    let frames = FrameDecoder::client_side().push(&received).unwrap();
    let kinds: Vec<_> = frames.iter().map(|f| f.frame_type).collect();
    assert_eq!(
        kinds,
        vec![FrameType::Text, FrameType::Binary, FrameType::Ping, FrameType::Close]
    );
    assert_eq!(frames[0].payload(), b"hi");
    assert_eq!(frames[1].payload, large);
    assert_eq!(frames[2].payload(), b"beat");
    assert_eq!(CloseReason::parse(frames[3].payload()).unwrap(), Some(reason));
}

/// Test the client-side decoder refusing masked frames.
#[test]
fn test_client_side_rejects_masked() {
    let mut client = FrameDecoder::client_side();
    let masked = build_masked_frame(true, FrameType::Text, b"x", KEY);

    assert_eq!(
        client.push(&masked).unwrap_err(),
        ProtocolError::MaskMismatch { expected: false }
    );

    let mut client = FrameDecoder::client_side();
    let frames = client.push(&build_frame(true, FrameType::Text, b"x")).unwrap();
    assert_eq!(frames[0].payload(), b"x");
}
