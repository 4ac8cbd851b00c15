//! Unit tests for the length-prefixed packet codec.
//!
//! Covers frame emission under arbitrary chunking, oversized frame skipping,
//! malformed payload reporting and EOF handling.

use bytes::{BufMut, Bytes, BytesMut};
use proptest::{
    collection::vec,
    prelude::{Just, Strategy, any, prop_oneof},
    prop_assert_eq,
    test_runner::{Config as ProptestConfig, RngAlgorithm, TestCaseError, TestRng, TestRunner},
};
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::{id::IdGenerator, packet::FLAG_PLAIN};

fn frame(payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_slice(&write_network_u32(u32::try_from(payload.len()).expect("small payload")));
    buf.put_slice(payload);
    buf
}

fn encode_all(packets: &[Packet]) -> BytesMut {
    let mut codec = PacketCodec::default();
    let mut wire = BytesMut::new();
    for packet in packets {
        codec
            .encode(packet.clone(), &mut wire)
            .expect("encode should succeed");
    }
    wire
}

/// Feed `wire` to `codec` in chunks of `chunk` bytes, collecting every item.
fn feed_in_chunks(
    codec: &mut PacketCodec,
    wire: &[u8],
    chunk: usize,
) -> Vec<Result<Packet, MalformedPacket>> {
    let mut buf = BytesMut::new();
    let mut items = Vec::new();
    for piece in wire.chunks(chunk.max(1)) {
        buf.extend_from_slice(piece);
        while let Some(item) = codec.decode(&mut buf).expect("decode never fails on io") {
            items.push(item);
        }
    }
    while let Some(item) = codec.decode_eof(&mut buf).expect("eof is not an error") {
        items.push(item);
    }
    items
}

fn expecting_reply(packet_type: i16, body: &'static str, ids: &IdGenerator) -> Packet {
    let mut packet = Packet::new(packet_type, body);
    packet.mark_expecting_reply(ids);
    packet
}

#[test]
fn encoder_writes_length_prefix_then_packet() {
    let mut codec = PacketCodec::default();
    let mut wire = BytesMut::new();
    codec
        .encode(Packet::with_body("Test"), &mut wire)
        .expect("encode should succeed");

    assert_eq!(
        &wire[..],
        &[0, 0, 0, 7, 0, 0, FLAG_PLAIN, b'T', b'e', b's', b't'][..]
    );
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(7)]
#[case(64)]
fn packets_survive_any_chunk_size(#[case] chunk: usize) {
    let ids = IdGenerator::new();
    let mut reply = Packet::new(3, "pong");
    reply.mark_reply_to(41);
    let packets = vec![
        Packet::with_body("Test"),
        expecting_reply(-2, "ping", &ids),
        reply,
        Packet::with_type(9),
    ];
    let wire = encode_all(&packets);

    let mut codec = PacketCodec::default();
    let decoded: Vec<_> = feed_in_chunks(&mut codec, &wire, chunk)
        .into_iter()
        .map(|item| item.expect("well-formed packet"))
        .collect();

    assert_eq!(decoded, packets);
    assert!(codec.is_idle());
}

#[test]
fn oversized_frame_is_skipped_without_desynchronising() {
    let mut wire = frame(&[0xaa; 32]);
    wire.extend_from_slice(&encode_all(&[Packet::with_body("after")]));

    let mut codec = PacketCodec::new(16);
    let items = feed_in_chunks(&mut codec, &wire, 5);

    assert_eq!(items.len(), 1);
    let packet = items
        .into_iter()
        .next()
        .expect("one item")
        .expect("well-formed packet");
    assert_eq!(packet.body_str(), Some("after"));
}

#[test]
fn frame_at_the_limit_is_decoded() {
    let packet = Packet::new(1, vec![7_u8; 13]);
    assert_eq!(packet.encoded_len(), 16);
    let wire = encode_all(std::slice::from_ref(&packet));

    let mut codec = PacketCodec::new(16);
    let items = feed_in_chunks(&mut codec, &wire, 16);

    assert_eq!(items, vec![Ok(packet)]);
}

#[test]
fn skipping_does_not_buffer_the_oversized_payload() {
    let mut codec = PacketCodec::new(8);
    let mut buf = frame(&[0_u8; 4096]);
    buf.truncate(LENGTH_HEADER_SIZE + 100);

    assert!(codec.decode(&mut buf).expect("decode").is_none());
    assert!(buf.is_empty(), "skipped bytes must be discarded immediately");
    assert!(!codec.is_idle());
}

#[rstest]
#[case::unknown_flag(&[0, 1, 9, 1, 2, 3], MalformedPacket::UnknownFlag(9))]
#[case::short_header(&[0, 1], MalformedPacket::Truncated { need: 3, have: 2 })]
#[case::short_id(&[0, 1, 1, 0, 0], MalformedPacket::Truncated { need: 4, have: 2 })]
#[case::empty(&[], MalformedPacket::Truncated { need: 3, have: 0 })]
fn malformed_payload_is_reported_and_stream_continues(
    #[case] payload: &[u8],
    #[case] expected: MalformedPacket,
) {
    let mut wire = frame(payload);
    wire.extend_from_slice(&encode_all(&[Packet::with_body("next")]));

    let mut codec = PacketCodec::default();
    let items = feed_in_chunks(&mut codec, &wire, 3);

    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Err(expected));
    assert_eq!(
        items[1].as_ref().ok().and_then(Packet::body_str),
        Some("next")
    );
}

#[rstest]
#[case::inside_length(Bytes::from_static(&[0, 0]))]
#[case::inside_payload(Bytes::from_static(&[0, 0, 0, 10, 0, 0, 0]))]
#[case::inside_skip(Bytes::from_static(&[0, 0, 16, 0, 1, 2, 3]))]
fn eof_mid_frame_ends_cleanly(#[case] partial: Bytes) {
    let mut codec = PacketCodec::new(64);
    let mut buf = BytesMut::from(&partial[..]);

    let first = codec.decode(&mut buf).expect("decode");
    assert!(first.is_none());
    let at_eof = codec.decode_eof(&mut buf).expect("eof is not an error");
    assert!(at_eof.is_none());
    assert!(codec.is_idle());
}

#[test]
fn eof_at_frame_boundary_returns_none() {
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();
    assert!(matches!(codec.decode_eof(&mut buf), Ok(None)));
}

fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    let rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
    TestRunner::new_with_rng(config, rng)
}

fn packet_strategy() -> impl Strategy<Value = Packet> {
    let state = prop_oneof![
        Just(None),
        any::<i32>().prop_map(|id| Some(Ok(id))),
        any::<i32>().prop_map(|reply_to| Some(Err(reply_to))),
    ];
    (any::<i16>(), state, vec(any::<u8>(), 0..48)).prop_map(|(packet_type, state, body)| {
        let mut packet = Packet::new(packet_type, body);
        match state {
            None => {}
            Some(Ok(seed)) => {
                packet.mark_expecting_reply(&IdGenerator::starting_at(seed));
            }
            Some(Err(reply_to)) => packet.mark_reply_to(reply_to),
        }
        packet
    })
}

#[rstest]
#[case(32, 96)]
#[case(1024, 64)]
fn generated_packet_sequences_survive_arbitrary_chunking(
    #[case] max_packet_body_size: usize,
    #[case] cases: u32,
) {
    let mut runner = deterministic_runner(cases);
    let strategy = (vec(packet_strategy(), 1..12), 1_usize..24);

    runner
        .run(&strategy, |(packets, chunk)| {
            let wire = encode_all(&packets);
            let expected: Vec<_> = packets
                .iter()
                .filter(|packet| packet.encoded_len() <= max_packet_body_size)
                .cloned()
                .collect();

            let mut codec = PacketCodec::new(max_packet_body_size);
            let decoded = feed_in_chunks(&mut codec, &wire, chunk)
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| TestCaseError::fail(format!("malformed packet: {err}")))?;

            prop_assert_eq!(decoded, expected);
            Ok(())
        })
        .expect("generated packet sequences should decode in order");
}
