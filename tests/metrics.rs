#![cfg(feature = "metrics")]
//! Metric recording observed through a local debugging recorder.

use bytes::BytesMut;
use tcpacket::{
    CONNECTIONS_ACTIVE,
    Direction,
    FRAMES_PROCESSED,
    Packet,
    PacketCodec,
    metrics::{self, FRAMES_SKIPPED},
};
use tcpacket_testing::{capture_metrics, encode_packets};
use tokio_util::codec::Decoder;

#[test]
fn frame_counters_are_labelled_by_direction() {
    let capture = capture_metrics();
    capture.record(|| {
        metrics::inc_frames(Direction::Inbound);
        metrics::inc_frames(Direction::Inbound);
        metrics::inc_frames(Direction::Outbound);
    });

    let snapshot = capture.snapshot();
    assert_eq!(snapshot.counter(FRAMES_PROCESSED, &[("direction", "inbound")]), 2);
    assert_eq!(snapshot.counter(FRAMES_PROCESSED, &[("direction", "outbound")]), 1);
    assert_eq!(snapshot.counter(FRAMES_PROCESSED, &[]), 3);
}

#[test]
fn connection_gauge_tracks_open_connections() {
    let capture = capture_metrics();
    capture.record(|| {
        metrics::inc_connections();
        metrics::inc_connections();
        metrics::dec_connections();
    });

    assert_eq!(capture.snapshot().gauge(CONNECTIONS_ACTIVE), Some(1.0));
}

#[test]
fn decoder_counts_skipped_frames() {
    let capture = capture_metrics();
    let mut codec = PacketCodec::new(8);
    let mut wire: BytesMut = encode_packets(&[
        Packet::with_body("far too long for the limit"),
        Packet::with_body("ok"),
    ]);

    let decoded = capture.record(|| codec.decode(&mut wire).expect("decode"));

    let packet = decoded.expect("frame").expect("packet");
    assert_eq!(packet.body_str(), Some("ok"));
    assert_eq!(capture.snapshot().counter(FRAMES_SKIPPED, &[]), 1);
}
