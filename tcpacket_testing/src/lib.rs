//! Shared helpers for testing `tcpacket` endpoints.
//!
//! The helpers cover the pieces most tests need: a listener on a free port,
//! a raw peer speaking the wire format, byte-level frame builders for
//! feeding codecs, log and metrics capture, and polling for asynchronous
//! state changes.
//!
//! ```rust,no_run
//! use tcpacket::Packet;
//! use tcpacket_testing::{connect_peer, next_packet};
//!
//! # async fn example(addr: std::net::SocketAddr) {
//! let mut peer = connect_peer(addr).await;
//! let packet = next_packet(&mut peer).await;
//! assert!(!packet.is_reply());
//! # }
//! ```

pub mod configs;
pub mod frames;
pub mod logging;
pub mod macros;
pub mod metrics;
pub mod net;

pub use configs::{TEST_SWEEP, client_config, server_config};
pub use frames::{encode_packets, raw_frame};
pub use logging::{LoggerHandle, init_tracing, logger};
pub use metrics::{MetricsCapture, MetricsSnapshot, capture_metrics};
pub use net::{
    TestPeer,
    WAIT,
    connect_peer,
    free_listener,
    next_packet,
    recv_within,
    wait_until,
};
