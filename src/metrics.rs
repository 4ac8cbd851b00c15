//! Metric helpers for `tcpacket`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_ACTIVE: &str = "tcpacket_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "tcpacket_frames_processed_total";
/// Name of the counter tracking frames skipped for exceeding the size limit.
pub const FRAMES_SKIPPED: &str = "tcpacket_frames_skipped_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "tcpacket_errors_total";
/// Name of the counter tracking reply waiters that expired.
pub const REPLY_TIMEOUTS: &str = "tcpacket_reply_timeouts_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
#[cfg_attr(not(feature = "metrics"), expect(unused_variables, reason = "no-op without metrics"))]
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
}

/// Record an oversized frame that was skipped.
pub fn inc_frames_skipped() {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_SKIPPED).increment(1);
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Record a reply waiter that expired.
pub fn inc_reply_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(REPLY_TIMEOUTS).increment(1);
}
