//! Request/reply correlation.
//!
//! Sending a packet with a reply callback registers a [`ReplyWaiter`] keyed by
//! the packet id. The waiter is retired exactly once: either an inbound reply
//! carrying that id takes it, or the periodic sweep takes it after its
//! deadline. Both paths go through an atomic remove, so whichever removes the
//! entry first is the only one to invoke the callback.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use log::debug;
use thiserror::Error;
use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::ConnectionId,
    dispatch::{Dispatcher, HandlerResult},
    packet::Packet,
};

/// Outcome delivered to a reply callback.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The peer answered.
    Reply(Packet),
    /// No reply arrived before the deadline.
    TimedOut,
}

impl ReplyOutcome {
    /// Whether the waiter expired.
    #[must_use]
    pub fn is_timed_out(&self) -> bool { matches!(self, Self::TimedOut) }

    /// The reply packet, if one arrived.
    #[must_use]
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            Self::Reply(packet) => Some(packet),
            Self::TimedOut => None,
        }
    }

    /// Consume the outcome, returning the reply packet if one arrived.
    #[must_use]
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Self::Reply(packet) => Some(packet),
            Self::TimedOut => None,
        }
    }
}

/// Callback run once with the outcome of a reply-expecting send.
pub type ReplyCallback = Box<dyn FnOnce(ReplyOutcome) -> HandlerResult + Send + 'static>;

/// A pending reply.
pub struct ReplyWaiter {
    /// Instant after which the sweep retires the waiter.
    pub deadline: Instant,
    /// Connection the request was sent on.
    pub connection: ConnectionId,
    // Never contended: the lock only makes a `Send` callback shareable.
    callback: Mutex<ReplyCallback>,
}

impl ReplyWaiter {
    /// Waiter running `callback` once the reply or the deadline arrives.
    pub fn new<F>(deadline: Instant, connection: ConnectionId, callback: F) -> Self
    where
        F: FnOnce(ReplyOutcome) -> HandlerResult + Send + 'static,
    {
        Self {
            deadline,
            connection,
            callback: Mutex::new(Box::new(callback)),
        }
    }

    /// Consume the waiter, returning its callback.
    pub fn into_callback(self) -> ReplyCallback {
        self.callback
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ReplyWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyWaiter")
            .field("deadline", &self.deadline)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

/// Raised when registering a waiter for an id that is already pending.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("a reply waiter is already registered for packet {0}")]
pub struct DuplicateReplyId(pub i32);

/// Pending reply waiters of one endpoint, keyed by packet id.
#[derive(Default)]
pub struct ReplyCorrelator {
    waiters: DashMap<i32, ReplyWaiter>,
}

impl ReplyCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `waiter` for packet `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateReplyId`] if a waiter for `id` is still pending; the
    /// existing waiter is left untouched.
    pub fn register(&self, id: i32, waiter: ReplyWaiter) -> Result<(), DuplicateReplyId> {
        match self.waiters.entry(id) {
            Entry::Occupied(_) => Err(DuplicateReplyId(id)),
            Entry::Vacant(slot) => {
                slot.insert(waiter);
                Ok(())
            }
        }
    }

    /// Remove and return the waiter for `id`, if any.
    pub fn take(&self, id: i32) -> Option<ReplyWaiter> {
        self.waiters.remove(&id).map(|(_, waiter)| waiter)
    }

    /// Remove and return every waiter whose deadline is at or before `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<(i32, ReplyWaiter)> {
        let expired: Vec<i32> = self
            .waiters
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();
        // A reply may win the race between the scan and the removal.
        expired
            .into_iter()
            .filter_map(|id| self.waiters.remove_if(&id, |_, waiter| waiter.deadline <= now))
            .collect()
    }

    /// Remove and return every pending waiter.
    pub fn take_all(&self) -> Vec<(i32, ReplyWaiter)> {
        let ids: Vec<i32> = self.waiters.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.waiters.remove(&id))
            .collect()
    }

    /// Whether a waiter for `id` is pending.
    #[must_use]
    pub fn contains(&self, id: i32) -> bool { self.waiters.contains_key(&id) }

    /// Number of pending waiters.
    #[must_use]
    pub fn len(&self) -> usize { self.waiters.len() }

    /// Whether no waiters are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.waiters.is_empty() }

    /// Retire expired waiters, delivering [`ReplyOutcome::TimedOut`].
    pub fn sweep(&self, now: Instant, dispatcher: &Dispatcher) -> usize {
        let expired = self.take_expired(now);
        let count = expired.len();
        for (id, waiter) in expired {
            debug!(
                "reply timed out: packet_id={id}, connection_id={}",
                waiter.connection
            );
            crate::metrics::inc_reply_timeouts();
            dispatcher.dispatch_reply(waiter, ReplyOutcome::TimedOut);
        }
        count
    }
}

impl fmt::Debug for ReplyCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyCorrelator")
            .field("pending", &self.waiters.len())
            .finish()
    }
}

/// Sweep `correlator` every `period` until `shutdown` is cancelled.
///
/// Waiters still pending at shutdown are retired as timed out.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
pub(crate) async fn sweep_loop(
    correlator: std::sync::Arc<ReplyCorrelator>,
    dispatcher: Dispatcher,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                correlator.sweep(Instant::now(), &dispatcher);
            }
        }
    }
    for (id, waiter) in correlator.take_all() {
        debug!("reply abandoned at shutdown: packet_id={id}");
        dispatcher.dispatch_reply(waiter, ReplyOutcome::TimedOut);
    }
}
