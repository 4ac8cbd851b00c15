use bytes::Bytes;
use rstest::rstest;

use super::*;
use crate::id::FIRST_ID;

#[rstest]
#[case::plain(ReplyState::Plain, &[0x00, 0x05, FLAG_PLAIN, b'h', b'i'][..])]
#[case::expecting(
    ReplyState::ExpectingReply,
    &[0x00, 0x05, FLAG_EXPECTING_REPLY, 0x80, 0x00, 0x00, 0x01, b'h', b'i'][..]
)]
#[case::reply(
    ReplyState::Reply { reply_to: 258 },
    &[0x00, 0x05, FLAG_REPLY, 0x00, 0x00, 0x01, 0x02, b'h', b'i'][..]
)]
fn wire_layout_matches_flag(#[case] state: ReplyState, #[case] wire: &[u8]) {
    let mut packet = Packet::new(5, "hi");
    match state {
        ReplyState::Plain => {}
        ReplyState::ExpectingReply => {
            packet.mark_expecting_reply(&IdGenerator::new());
        }
        ReplyState::Reply { reply_to } => packet.mark_reply_to(reply_to),
    }

    assert_eq!(&packet.to_bytes()[..], wire);
    assert_eq!(packet.encoded_len(), wire.len());

    let decoded = Packet::from_bytes(Bytes::copy_from_slice(wire)).expect("valid packet");
    assert_eq!(decoded.reply_state(), state);
    assert_eq!(decoded.body_str(), Some("hi"));
}

#[test]
fn new_packet_is_plain_with_sentinel_id() {
    let packet = Packet::default();
    assert_eq!(packet.packet_type(), 0);
    assert_eq!(packet.id(), UNASSIGNED_ID);
    assert!(packet.body().is_empty());
    assert!(!packet.expects_reply());
    assert!(!packet.is_reply());
    assert_eq!(packet.reply_to(), UNASSIGNED_ID);
}

#[test]
fn id_is_assigned_once() {
    let ids = IdGenerator::new();
    let mut packet = Packet::with_body("Test");

    let first = packet.mark_expecting_reply(&ids);
    let second = packet.mark_expecting_reply(&ids);

    assert_eq!(first, FIRST_ID);
    assert_eq!(first, second);
    assert_eq!(packet.id(), first);
}

#[test]
fn sequential_packets_get_distinct_ids() {
    let ids = IdGenerator::new();
    let mut a = Packet::default();
    let mut b = Packet::default();
    assert_ne!(a.mark_expecting_reply(&ids), b.mark_expecting_reply(&ids));
}

#[test]
fn reply_state_is_exclusive() {
    let mut packet = Packet::default();
    packet.mark_expecting_reply(&IdGenerator::new());
    packet.mark_reply_to(17);

    assert!(packet.is_reply());
    assert!(!packet.expects_reply());
    assert_eq!(packet.reply_to(), 17);
}

#[test]
fn reply_to_plain_packet_is_rejected() {
    let packet = Packet::with_body("Test");
    let err = packet
        .reply_with(Packet::with_body("answer"))
        .expect_err("plain packets cannot be answered");
    assert!(matches!(
        err,
        ReplyError::NotExpectingReply {
            packet_id: UNASSIGNED_ID
        }
    ));
}

#[test]
fn reply_without_source_is_rejected() {
    let mut packet = Packet::with_body("Test");
    packet.mark_expecting_reply(&IdGenerator::new());

    let err = packet
        .reply_with(Packet::with_body("answer"))
        .expect_err("no source connection");
    assert!(matches!(err, ReplyError::NoSource));
}

#[test]
fn body_helpers_handle_invalid_utf8() {
    let packet = Packet::new(1, vec![b'o', b'k', 0xff]);
    assert_eq!(packet.body_str(), None);
    assert_eq!(packet.body_lossy(), "ok\u{fffd}");

    let text = Packet::from_text(2, "caf\u{e9}");
    assert_eq!(text.body_str(), Some("caf\u{e9}"));
}

#[test]
fn decoded_body_shares_the_frame_buffer() {
    let wire = Packet::with_body("shared").to_bytes();
    let start = wire.as_ptr();
    let decoded = Packet::from_bytes(wire).expect("valid packet");
    assert_eq!(decoded.body().as_ptr(), start.wrapping_add(HEADER_LEN));
}

#[test]
fn equality_ignores_source_and_debug_omits_body() {
    let packet = Packet::from_text(3, "secret");
    let rendered = format!("{packet:?}");
    assert!(rendered.contains("body_len: 6"));
    assert!(!rendered.contains("secret"));
    assert_eq!(packet.clone(), packet);
}
