//! End-to-end exchanges between a `PacketServer` and `PacketClient`s.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use rstest::rstest;
use tcpacket::{
    Connection,
    IdGenerator,
    Packet,
    PacketClient,
    PacketServer,
    ReplyOutcome,
    ServerConfig,
};
use tcpacket_testing::{
    client_config,
    connect_peer,
    next_packet,
    recv_expect,
    server_config,
    wait_until,
};
use tokio::{net::TcpStream, sync::mpsc::unbounded_channel, time::timeout};

async fn connected_client(addr: std::net::SocketAddr) -> PacketClient {
    let client = PacketClient::new(client_config(addr));
    client.connect().await.expect("connect");
    client
}

#[rstest]
#[tokio::test]
async fn basic_exchange_reaches_the_server_handler(server_config: ServerConfig) {
    let server = PacketServer::new(server_config);
    let (tx, mut rx) = unbounded_channel();
    server.on_packet(move |packet: &Packet| {
        tx.send((packet.packet_type(), packet.body_lossy(), packet.is_reply()))?;
        Ok(())
    });
    let addr = server.start().expect("start");
    let client = connected_client(addr).await;

    client.send(Packet::with_body("Test")).expect("send");

    assert_eq!(recv_expect!(rx.recv()), (0, "Test".to_owned(), false));
    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn server_request_on_connect_is_answered_by_the_client(server_config: ServerConfig) {
    let server = PacketServer::new(server_config);
    let (tx, mut rx) = unbounded_channel::<ReplyOutcome>();
    server.on_connect(move |connection: &Connection| {
        let tx = tx.clone();
        connection.send_with_reply(
            Packet::with_body("Test"),
            Duration::from_secs(5),
            move |outcome| {
                tx.send(outcome)?;
                Ok(())
            },
        )?;
        Ok(())
    });
    let addr = server.start().expect("start");
    let client = PacketClient::new(client_config(addr));
    client.on_packet(|packet: &Packet| {
        if packet.expects_reply() {
            packet.reply_with(Packet::with_body(packet.body().clone()))?;
        }
        Ok(())
    });
    client.connect().await.expect("connect");

    let outcome = recv_expect!(rx.recv());
    assert!(!outcome.is_timed_out());
    let reply = outcome.into_packet().expect("reply packet");
    assert!(reply.is_reply());
    assert_eq!(reply.body_str(), Some("Test"));
    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn client_request_is_answered_by_pooled_server_handler(server_config: ServerConfig) {
    let server = PacketServer::new(ServerConfig {
        blocking_handlers: false,
        handler_pool_size: 4,
        ..server_config
    });
    server.on_packet(|packet: &Packet| {
        if packet.expects_reply() {
            let answer = format!("echo:{}", packet.body_lossy());
            packet.reply_with(Packet::with_body(answer))?;
        }
        Ok(())
    });
    let addr = server.start().expect("start");
    let client = connected_client(addr).await;
    let (tx, mut rx) = unbounded_channel();

    for word in ["one", "two", "three"] {
        let tx = tx.clone();
        client
            .send_expecting_reply(Packet::with_body(word), move |outcome| {
                let body = outcome.packet().map(Packet::body_lossy);
                tx.send(body)?;
                Ok(())
            })
            .expect("send");
    }

    let mut answers = Vec::new();
    for _ in 0..3 {
        answers.push(recv_expect!(rx.recv()).expect("not timed out"));
    }
    answers.sort();
    assert_eq!(answers, ["echo:one", "echo:three", "echo:two"]);
    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn unanswered_request_times_out_exactly_once(server_config: ServerConfig) {
    let server = PacketServer::new(server_config);
    let addr = server.start().expect("start");
    let client = connected_client(addr).await;
    let (tx, mut rx) = unbounded_channel();

    client
        .send_with_reply(
            Packet::with_body("anyone?"),
            Duration::from_millis(100),
            move |outcome| {
                tx.send(outcome.is_timed_out())?;
                Ok(())
            },
        )
        .expect("send");

    assert!(recv_expect!(rx.recv()), "callback reports a timeout");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err(), "callback fires once");
    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn third_connection_waits_for_a_free_slot(server_config: ServerConfig) {
    let server = PacketServer::new(ServerConfig {
        max_connections: 2,
        ..server_config
    });
    let (tx, mut rx) = unbounded_channel();
    server.on_connect(move |connection: &Connection| {
        tx.send(connection.id())?;
        Ok(())
    });
    let addr = server.start().expect("start");

    let first = TcpStream::connect(addr).await.expect("first");
    let _second = TcpStream::connect(addr).await.expect("second");
    let first_id = recv_expect!(rx.recv());
    recv_expect!(rx.recv());
    let _third = TcpStream::connect(addr).await.expect("third reaches the backlog");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "third connection is not served yet");
    assert_eq!(server.connections().len(), 2);

    drop(first);

    let third_id = recv_expect!(rx.recv());
    assert!(third_id > first_id);
    wait_until(|| server.connections().len() == 2).await;
    assert!(server.connections().iter().all(|c| c.id() != first_id));
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn disconnect_handlers_fire_once_per_connection(server_config: ServerConfig) {
    let server = PacketServer::new(server_config);
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    server.on_disconnect(move |_: &Connection| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let addr = server.start().expect("start");
    let client = connected_client(addr).await;
    wait_until(|| server.connections().len() == 1).await;

    let server_side = server.connections().remove(0);
    client.close().await;
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1).await;
    server_side.close();
    server.shutdown().await;

    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn injected_id_generator_numbers_requests(server_config: ServerConfig) {
    let server = PacketServer::new(server_config).with_id_generator(IdGenerator::starting_at(100));
    server.on_connect(|connection: &Connection| {
        connection.send_expecting_reply(Packet::with_body("first"), |_| Ok(()))?;
        connection.send_expecting_reply(Packet::with_body("second"), |_| Ok(()))?;
        Ok(())
    });
    let addr = server.start().expect("start");
    let mut peer = connect_peer(addr).await;

    let first = next_packet(&mut peer).await;
    let second = next_packet(&mut peer).await;

    assert_eq!((first.id(), second.id()), (100, 101));
    assert!(first.expects_reply() && second.expects_reply());
    server.shutdown().await;
}

#[rstest]
#[case::blocking(true)]
#[case::pooled(false)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_handler_does_not_hold_up_other_connections(
    server_config: ServerConfig,
    #[case] blocking_handlers: bool,
) {
    let server = PacketServer::new(ServerConfig {
        blocking_handlers,
        handler_pool_size: 4,
        ..server_config
    });
    let (tx, mut rx) = unbounded_channel();
    server.on_packet(move |packet: &Packet| {
        let body = packet.body_lossy();
        if body == "slow" {
            tx.send("slow started".to_owned())?;
            thread::sleep(Duration::from_secs(1));
        }
        tx.send(body)?;
        Ok(())
    });
    let addr = server.start().expect("start");
    let first = connected_client(addr).await;
    let second = connected_client(addr).await;

    first.send(Packet::with_body("slow")).expect("send slow");
    assert_eq!(recv_expect!(rx.recv()), "slow started");
    second.send(Packet::with_body("fast")).expect("send fast");

    let next = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("fast packet handled while the slow handler runs");
    assert_eq!(next.as_deref(), Some("fast"));
    assert_eq!(recv_expect!(rx.recv()), "slow");
    first.close().await;
    second.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn pooled_connect_handlers_run_before_the_first_packet(server_config: ServerConfig) {
    let server = PacketServer::new(ServerConfig {
        blocking_handlers: false,
        handler_pool_size: 1,
        ..server_config
    });
    let order = Arc::new(Mutex::new(Vec::new()));
    let connects = Arc::clone(&order);
    server.on_connect(move |_: &Connection| {
        thread::sleep(Duration::from_millis(100));
        connects.lock().expect("order lock").push("connect");
        Ok(())
    });
    let packets = Arc::clone(&order);
    server.on_packet(move |_: &Packet| {
        packets.lock().expect("order lock").push("packet");
        Ok(())
    });
    let addr = server.start().expect("start");
    let client = connected_client(addr).await;

    client.send(Packet::with_body("first")).expect("send");

    wait_until(|| order.lock().expect("order lock").len() == 2).await;
    assert_eq!(*order.lock().expect("order lock"), ["connect", "packet"]);
    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn client_connect_handler_can_send_through_the_client(server_config: ServerConfig) {
    let server = PacketServer::new(server_config);
    let (tx, mut rx) = unbounded_channel();
    server.on_packet(move |packet: &Packet| {
        tx.send(packet.body_lossy())?;
        Ok(())
    });
    let addr = server.start().expect("start");
    let client = Arc::new(PacketClient::new(client_config(addr)));
    let weak = Arc::downgrade(&client);
    client.on_connect(move |_: &Connection| {
        let client = weak.upgrade().ok_or("client dropped")?;
        if client.is_connected() {
            client.send(Packet::with_body("hello from connect"))?;
        }
        Ok(())
    });

    timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect completes")
        .expect("connect");

    assert_eq!(recv_expect!(rx.recv()), "hello from connect");
    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn closed_server_refuses_new_connections(server_config: ServerConfig) {
    let server = PacketServer::new(server_config);
    let addr = server.start().expect("start");
    let client = connected_client(addr).await;
    wait_until(|| server.connections().len() == 1).await;

    server.close();

    let refused = timeout(Duration::from_secs(5), async {
        while TcpStream::connect(addr).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(refused.is_ok(), "listener still accepts after close");
    assert!(client.is_connected());
    client.close().await;
    server.shutdown().await;
}
