//! Socket helpers.

use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    time::Duration,
};

use futures::StreamExt;
use rstest::fixture;
use tcpacket::{Packet, PacketCodec};
use tokio::{net::TcpStream, time::timeout};
use tokio_util::codec::Framed;

/// Upper bound on how long helpers wait for an expected event.
pub const WAIT: Duration = Duration::from_secs(5);

/// Raw peer speaking the wire format through [`PacketCodec`].
pub type TestPeer = Framed<TcpStream, PacketCodec>;

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port.
///
/// Keeping the listener bound prevents races where another process could
/// claim the port between discovery and use.
///
/// # Panics
///
/// Panics if no loopback port can be bound.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

/// Connect a raw peer to `addr`.
///
/// # Panics
///
/// Panics if the connection cannot be established.
pub async fn connect_peer(addr: SocketAddr) -> TestPeer {
    let stream = TcpStream::connect(addr).await.expect("connect test peer");
    Framed::new(stream, PacketCodec::default())
}

/// Read the next well-formed packet from `peer`.
///
/// # Panics
///
/// Panics if nothing arrives within [`WAIT`], the stream ends, or the frame
/// is malformed.
pub async fn next_packet(peer: &mut TestPeer) -> Packet {
    timeout(WAIT, peer.next())
        .await
        .expect("packet before timeout")
        .expect("peer stream open")
        .expect("peer read")
        .expect("well-formed packet")
}

/// Await `fut` for at most [`WAIT`].
///
/// # Panics
///
/// Panics if `fut` does not complete in time.
pub async fn recv_within<F: Future>(fut: F) -> F::Output {
    timeout(WAIT, fut).await.expect("event before timeout")
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// Panics if `condition` does not hold within [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let polled = timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within {WAIT:?}");
}
