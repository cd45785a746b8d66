use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::command::{Command, CommandKind};
use super::frame::{encode_frame, FrameDecoder, HEADER_LEN};
use super::message::Message;
use super::WireError;

fn sample_notification() -> Message {
    Message::notification(Uuid::new_v4(), "orders", "created", "order #42", 30)
}

#[test]
fn round_trip_notification() {
    let command = Command::enqueue(sample_notification());
    let frame = encode_frame(&command).expect("encode");

    let mut decoder = FrameDecoder::default();
    decoder.extend(&frame);
    let decoded = decoder.try_next().expect("decode").expect("one command");
    assert_eq!(decoded, command);
    assert!(decoder.try_next().expect("no error").is_none());
}

#[test]
fn round_trip_query_and_reply() {
    let query = Message::query(Uuid::new_v4(), "rpc", "ping", "ping-body", 5);
    let mut reply = Message::reply_to(&query, "pong", "pong-body", 5);
    reply.peer_id = Uuid::new_v4();

    for command in [Command::enqueue(query.clone()), Command::process(reply)] {
        let frame = encode_frame(&command).expect("encode");
        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame);
        let decoded = decoder.try_next().expect("decode").expect("one command");
        assert_eq!(decoded, command);
    }
}

#[test]
fn encode_is_deterministic() {
    let command = Command::enqueue(sample_notification());
    let a = encode_frame(&command).expect("encode");
    let b = encode_frame(&command).expect("encode");
    assert_eq!(a, b);
}

#[test]
fn absent_in_reply_to_travels_as_zero_uuid() {
    let command = Command::enqueue(sample_notification());
    let payload = command.encode_payload().expect("encode");
    // The trailing 16 bytes are the in_reply_to slot.
    assert!(payload[payload.len() - 16..].iter().all(|b| *b == 0));
    let decoded = Command::decode_payload(payload).expect("decode");
    assert_eq!(decoded.message.in_reply_to, None);
}

#[test]
fn decoder_reassembles_split_delivery() {
    let command = Command::subscribe(Uuid::new_v4(), "metrics");
    let frame = encode_frame(&command).expect("encode");

    let mut decoder = FrameDecoder::default();
    for chunk in frame.chunks(3) {
        decoder.extend(chunk);
    }
    let decoded = decoder.try_next().expect("decode").expect("one command");
    assert_eq!(decoded, command);
}

#[test]
fn decoder_drains_back_to_back_frames() {
    let first = Command::subscribe(Uuid::new_v4(), "a");
    let second = Command::unsubscribe(Uuid::new_v4(), "b");
    let mut bytes = BytesMut::new();
    bytes.extend_from_slice(&encode_frame(&first).expect("encode"));
    bytes.extend_from_slice(&encode_frame(&second).expect("encode"));

    let mut decoder = FrameDecoder::default();
    decoder.extend(&bytes);
    assert_eq!(decoder.try_next().expect("first").expect("some"), first);
    assert_eq!(decoder.try_next().expect("second").expect("some"), second);
    assert!(decoder.try_next().expect("drained").is_none());
}

#[test]
fn corrupted_payload_is_rejected() {
    let command = Command::enqueue(sample_notification());
    let frame = encode_frame(&command).expect("encode");
    let mut corrupted = frame.to_vec();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;

    let mut decoder = FrameDecoder::default();
    decoder.extend(&corrupted);
    let err = decoder.try_next().expect_err("crc failure");
    assert!(matches!(err, WireError::CrcMismatch));
}

#[test]
fn oversize_frame_is_rejected_before_buffering_payload() {
    let mut header = BytesMut::new();
    header.put_u32_le(1024 * 1024);
    header.put_u32_le(0);

    let mut decoder = FrameDecoder::new(1024);
    decoder.extend(&header);
    let err = decoder.try_next().expect_err("too large");
    assert!(matches!(err, WireError::FrameTooLarge { got, cap } if got == 1024 * 1024 && cap == 1024));
}

#[test]
fn unknown_kind_is_rejected() {
    let command = Command::hello(Uuid::new_v4());
    let payload = command.encode_payload().expect("encode");
    let mut raw = payload.to_vec();
    raw[0] = 255;

    let mut framed = BytesMut::new();
    framed.put_u32_le(raw.len() as u32);
    framed.put_u32_le(crc32fast::hash(&raw));
    framed.extend_from_slice(&raw);

    let mut decoder = FrameDecoder::default();
    decoder.extend(&framed);
    let err = decoder.try_next().expect_err("unknown kind");
    assert!(matches!(err, WireError::UnknownCommand(255)));
}

#[test]
fn truncated_payload_is_rejected() {
    let command = Command::hello(Uuid::new_v4());
    let payload = command.encode_payload().expect("encode");
    let cut = &payload[..payload.len() - 3];

    let mut framed = BytesMut::new();
    framed.put_u32_le(cut.len() as u32);
    framed.put_u32_le(crc32fast::hash(cut));
    framed.extend_from_slice(cut);

    let mut decoder = FrameDecoder::default();
    decoder.extend(&framed);
    let err = decoder.try_next().expect_err("truncated");
    assert!(matches!(err, WireError::Malformed(_)));
}

#[test]
fn incomplete_header_waits_for_more_bytes() {
    let mut decoder = FrameDecoder::default();
    decoder.extend(&[0x01, 0x02, 0x03]);
    assert!(decoder.try_next().expect("no error yet").is_none());
    assert_eq!(decoder.buffer_mut().len(), 3);
}

#[test]
fn ack_reuses_acked_message_id() {
    let original = sample_notification();
    let ack = Command::ack(Uuid::new_v4(), original.message_id);
    assert_eq!(ack.kind, CommandKind::CommandAck);
    assert_eq!(ack.message.message_id, original.message_id);
}

#[test]
fn header_len_matches_wire_layout() {
    let command = Command::hello(Uuid::new_v4());
    let payload = command.encode_payload().expect("encode");
    let frame = encode_frame(&command).expect("encode");
    assert_eq!(frame.len(), HEADER_LEN + payload.len());
}

#[test]
fn expiry_honors_zero_as_never() {
    let mut message = sample_notification();
    message.expire_secs = 0;
    message.enqueued_at = 0;
    assert!(!message.is_expired(i64::MAX));

    message.expire_secs = 1;
    assert!(message.is_expired(1_500 + 1));
    assert!(!message.is_expired(900));
}

#[test]
fn reply_constructor_links_to_query() {
    let query = Message::query(Uuid::new_v4(), "rpc", "ping", "", 0);
    let reply = Message::reply_to(&query, "pong", "result", 0);
    assert!(reply.is_reply);
    assert!(!reply.is_query);
    assert_eq!(reply.in_reply_to, Some(query.message_id));
    assert_eq!(reply.queue, query.queue);
}
