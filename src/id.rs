//! Packet id generation.
//!
//! Every [`PacketServer`](crate::server::PacketServer) and
//! [`PacketClient`](crate::client::PacketClient) owns its own [`IdGenerator`],
//! so ids are unique per endpoint rather than per process. Ids increase
//! monotonically and wrap from `i32::MAX` back to the bottom of the range.
//! [`UNASSIGNED_ID`] is never handed out.

use std::sync::atomic::{AtomicI32, Ordering};

/// Sentinel carried by packets that have never expected a reply.
pub const UNASSIGNED_ID: i32 = i32::MIN;

/// First id handed out by [`IdGenerator::new`] and after wrapping.
pub const FIRST_ID: i32 = UNASSIGNED_ID + 1;

/// Thread-safe, wrapping generator of packet ids.
///
/// # Examples
///
/// ```
/// use tcpacket::id::IdGenerator;
///
/// let ids = IdGenerator::starting_at(i32::MAX);
/// assert_eq!(ids.next_id(), i32::MAX);
/// assert_eq!(ids.next_id(), i32::MIN + 1);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI32,
}

impl IdGenerator {
    /// Create a generator starting at [`FIRST_ID`].
    #[must_use]
    pub const fn new() -> Self { Self::starting_at(FIRST_ID) }

    /// Create a generator whose first id is `seed`.
    ///
    /// A seed equal to [`UNASSIGNED_ID`] is moved to [`FIRST_ID`].
    #[must_use]
    pub const fn starting_at(seed: i32) -> Self {
        let seed = if seed == UNASSIGNED_ID { FIRST_ID } else { seed };
        Self {
            next: AtomicI32::new(seed),
        }
    }

    /// Return the next id, wrapping past `i32::MAX`.
    pub fn next_id(&self) -> i32 {
        let previous = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(successor(current))
            });
        // The closure always returns `Some`, so both arms carry the old value.
        match previous {
            Ok(id) | Err(id) => id,
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self { Self::new() }
}

const fn successor(current: i32) -> i32 {
    if current == i32::MAX {
        FIRST_ID
    } else {
        current + 1
    }
}
