//! Outbound half of a connection.
//!
//! Packets queued by [`Connection::send`](super::Connection::send) are
//! written in order by a single task. When the connection closes, frames
//! already queued are flushed for at most [`DRAIN_TIMEOUT`] before the write
//! half is shut down.

use std::{io, time::Duration};

use futures::SinkExt;
use log::{Level, log};
use tokio::{net::tcp::OwnedWriteHalf, select, sync::mpsc, time::timeout};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};

use super::WeakConnection;
use crate::{codec::PacketCodec, metrics::Direction, packet::Packet};

/// Upper bound on flushing queued frames after close.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub(super) struct Writer {
    pub sink: FramedWrite<OwnedWriteHalf, PacketCodec>,
    pub outbound: mpsc::Receiver<Packet>,
    pub shutdown: CancellationToken,
    pub connection: WeakConnection,
    pub print_errors: bool,
}

enum Stop {
    /// The connection closed between frames.
    Closed,
    /// The connection closed while a frame was partially written.
    Interrupted,
}

impl Writer {
    pub(super) async fn run(mut self) {
        let result = match self.forward().await {
            Ok(Stop::Closed) => self.drain().await,
            Ok(Stop::Interrupted) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let level = if self.print_errors {
                Level::Warn
            } else {
                Level::Debug
            };
            log!(level, "connection write failed: error={e}");
            crate::metrics::inc_errors();
        }
        if let Some(connection) = self.connection.upgrade() {
            connection.close();
        }
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn forward(&mut self) -> io::Result<Stop> {
        loop {
            let packet = select! {
                biased;

                () = self.shutdown.cancelled() => return Ok(Stop::Closed),
                packet = self.outbound.recv() => packet,
            };
            let Some(packet) = packet else {
                return Ok(Stop::Closed);
            };
            match self
                .shutdown
                .run_until_cancelled(self.sink.send(packet))
                .await
            {
                Some(result) => result?,
                None => return Ok(Stop::Interrupted),
            }
            crate::metrics::inc_frames(Direction::Outbound);
        }
    }

    async fn drain(&mut self) -> io::Result<()> {
        self.outbound.close();
        let flush = async {
            while let Some(packet) = self.outbound.recv().await {
                self.sink.feed(packet).await?;
                crate::metrics::inc_frames(Direction::Outbound);
            }
            self.sink.close().await
        };
        timeout(DRAIN_TIMEOUT, flush).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out flushing queued frames",
            ))
        })
    }
}
