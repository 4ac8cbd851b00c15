//! Tests for the shared test helpers.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use rstest::rstest;
use tcpacket::{Packet, PacketCodec};
use tcpacket_testing::{encode_packets, raw_frame, wait_until};
use tokio_util::codec::Decoder;

#[rstest]
#[case(&[], &[0, 0, 0, 0])]
#[case(&[0, 7, 0], &[0, 0, 0, 3, 0, 7, 0])]
fn raw_frame_prefixes_the_length(#[case] payload: &[u8], #[case] expected: &[u8]) {
    assert_eq!(raw_frame(payload), expected);
}

#[test]
fn encoded_packets_decode_in_order() {
    let packets = [Packet::with_body("a"), Packet::new(3, "b")];
    let mut wire: BytesMut = encode_packets(&packets);
    let mut codec = PacketCodec::default();

    let mut decoded = Vec::new();
    while let Some(item) = codec.decode(&mut wire).expect("decode") {
        decoded.push(item.expect("well-formed"));
    }

    assert_eq!(decoded, packets);
}

#[tokio::test]
async fn wait_until_returns_once_the_condition_holds() {
    let polls = AtomicUsize::new(0);
    wait_until(|| polls.fetch_add(1, Ordering::SeqCst) >= 3).await;
    assert!(polls.load(Ordering::SeqCst) >= 4);
}
