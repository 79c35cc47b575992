// End-to-end transfers over loopback sockets: a spawned Server plus either
// the library Client or a hand-rolled peer when a test needs to misbehave.

use std::sync::Arc;
use std::time::Duration;

use streamprobe::protocol::{encode_preamble, ACK_BYTE};
use streamprobe::{
    AckProtocol, Client, Config, Error, Measurements, PreambleMessage, Protocol, Server,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::sleep;

async fn spawn_server(config: Config) -> Arc<Server> {
    let server = Arc::new(Server::new(config));
    let runner = server.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            panic!("server exited with error: {}", e);
        }
    });
    // Give the listener a moment to bind
    sleep(Duration::from_millis(100)).await;
    server
}

async fn wait_for_sessions(server: &Server, sessions: u64, timeout: Duration) -> Measurements {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let m = server.get_measurements();
        if m.sessions >= sessions {
            return m;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} sessions (have {})",
            sessions,
            m.sessions
        );
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_tcp_streaming_transfer() {
    let server = spawn_server(Config::server(15991).with_protocol(Protocol::Tcp)).await;

    let config = Config::client("127.0.0.1".to_string(), 15991)
        .with_protocol(Protocol::Tcp)
        .with_ack_protocol(AckProtocol::Streaming)
        .with_payload_size(512);

    let mut client = Client::new(config).unwrap();
    let result = client.run().await.unwrap();

    // Threshold is a lower bound; overshoot stays under one payload
    assert!(result.bytes_sent >= 1_000_000);
    assert!(result.bytes_sent < 1_000_512);
    assert!(result.packets_sent >= 1954);

    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert!(totals.total_bytes_received >= 1_000_000);
    assert!(totals.total_bytes_received <= result.bytes_sent);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_tcp_stop_wait_transfer() {
    let server = spawn_server(Config::server(15992).with_protocol(Protocol::Tcp)).await;

    let config = Config::client("127.0.0.1".to_string(), 15992)
        .with_protocol(Protocol::Tcp)
        .with_ack_protocol(AckProtocol::StopWait)
        .with_payload_size(1024)
        .with_data_transfer_size(10_000);

    let mut client = Client::new(config).unwrap();
    let result = client.run().await.unwrap();

    assert_eq!(result.packets_sent, 10);
    assert_eq!(result.bytes_sent, 10_240);

    // Stop-and-wait is lockstep: the receiver consumed exactly as many
    // messages as the sender acknowledged
    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert_eq!(totals.total_packets_received, result.packets_sent);
    assert_eq!(totals.total_bytes_received, result.bytes_sent);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_udp_streaming_transfer() {
    let server = spawn_server(Config::server(15993).with_protocol(Protocol::Udp)).await;

    let config = Config::client("127.0.0.1".to_string(), 15993)
        .with_protocol(Protocol::Udp)
        .with_ack_protocol(AckProtocol::Streaming)
        .with_payload_size(512);

    let mut client = Client::new(config).unwrap();
    let result = client.run().await.unwrap();

    assert_eq!(result.bytes_sent, 10_240);
    assert_eq!(result.packets_sent, 20);

    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert!(totals.total_bytes_received >= 10_000);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_udp_stop_wait_transfer() {
    let server = spawn_server(Config::server(15994).with_protocol(Protocol::Udp)).await;

    let config = Config::client("127.0.0.1".to_string(), 15994)
        .with_protocol(Protocol::Udp)
        .with_ack_protocol(AckProtocol::StopWait)
        .with_payload_size(1024)
        .with_data_transfer_size(4_000);

    let mut client = Client::new(config).unwrap();
    let result = client.run().await.unwrap();

    assert_eq!(result.packets_sent, 4);
    assert_eq!(result.bytes_sent, 4_096);

    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert_eq!(totals.total_packets_received, 4);
    assert_eq!(totals.total_bytes_received, 4_096);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_udp_idle_timeout_completes_with_partial_counts() {
    let server = spawn_server(
        Config::server(15995)
            .with_protocol(Protocol::Udp)
            .with_idle_timeout(Duration::from_millis(300)),
    )
    .await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect("127.0.0.1:15995").await.unwrap();

    let preamble = PreambleMessage::new(AckProtocol::Streaming, 10_000, 512);
    socket.send(&encode_preamble(&preamble).unwrap()).await.unwrap();

    let mut ack = [0u8; 1];
    socket.recv(&mut ack).await.unwrap();
    assert_eq!(ack[0], ACK_BYTE);

    // Send three messages, then go quiet well below the threshold
    let payload = [0u8; 512];
    for _ in 0..3 {
        socket.send(&payload).await.unwrap();
    }

    // The session must end soon after the idle deadline, not block or error
    let totals = wait_for_sessions(&server, 1, Duration::from_secs(2)).await;
    assert_eq!(totals.total_bytes_received, 1_536);
    assert_eq!(totals.total_packets_received, 3);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_udp_foreign_datagrams_are_not_counted() {
    let server = spawn_server(Config::server(15996).with_protocol(Protocol::Udp)).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect("127.0.0.1:15996").await.unwrap();

    let preamble = PreambleMessage::new(AckProtocol::Streaming, 10_000, 512);
    socket.send(&encode_preamble(&preamble).unwrap()).await.unwrap();

    let mut ack = [0u8; 1];
    socket.recv(&mut ack).await.unwrap();
    assert_eq!(ack[0], ACK_BYTE);

    let payload = [0u8; 512];
    for _ in 0..5 {
        socket.send(&payload).await.unwrap();
    }

    // A different address injects a datagram mid-transfer; it is not a
    // valid preamble and must be discarded without counting
    let foreign = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    foreign
        .send_to(&[0xffu8; 64], "127.0.0.1:15996")
        .await
        .unwrap();

    for _ in 0..15 {
        socket.send(&payload).await.unwrap();
    }

    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert_eq!(totals.total_bytes_received, 20 * 512);
    assert_eq!(totals.total_packets_received, 20);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_udp_malformed_preamble_never_stops_the_listener() {
    let server = spawn_server(Config::server(15997).with_protocol(Protocol::Udp)).await;

    // Corrupt preamble: no terminator within the datagram
    let rogue = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    rogue
        .send_to(&[0xffu8; 100], "127.0.0.1:15997")
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    // The next valid probe still succeeds
    let config = Config::client("127.0.0.1".to_string(), 15997)
        .with_protocol(Protocol::Udp)
        .with_payload_size(512);

    let mut client = Client::new(config).unwrap();
    let result = client.run().await.unwrap();
    assert!(result.bytes_sent >= 10_000);

    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert_eq!(totals.sessions, 1);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_tcp_malformed_preamble_never_stops_the_listener() {
    let server = spawn_server(Config::server(15998).with_protocol(Protocol::Tcp)).await;

    // A connection that never sends the terminator is dropped without
    // taking the listener down
    let mut rogue = tokio::net::TcpStream::connect("127.0.0.1:15998")
        .await
        .unwrap();
    rogue.write_all(&[b'x'; 200]).await.unwrap();
    drop(rogue);
    sleep(Duration::from_millis(100)).await;

    let config = Config::client("127.0.0.1".to_string(), 15998)
        .with_protocol(Protocol::Tcp)
        .with_ack_protocol(AckProtocol::StopWait)
        .with_payload_size(1024)
        .with_data_transfer_size(10_000);

    let mut client = Client::new(config).unwrap();
    let result = client.run().await.unwrap();
    assert_eq!(result.packets_sent, 10);

    let totals = wait_for_sessions(&server, 1, Duration::from_secs(5)).await;
    assert_eq!(totals.sessions, 1);

    server.shutdown_token().cancel();
}

#[tokio::test]
async fn test_tcp_connect_refused() {
    // Nothing listens on the discard port
    let config = Config::client("127.0.0.1".to_string(), 9)
        .with_protocol(Protocol::Tcp);

    let mut client = Client::new(config).unwrap();
    let result = client.connect().await;
    assert!(matches!(result, Err(Error::Connection(_))));
}

#[tokio::test]
async fn test_preamble_rejected_on_wrong_ack_byte() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 128];
        let _ = stream.read(&mut buf).await.unwrap();
        // Anything but the reserved acknowledgment value
        stream.write_all(&[0u8]).await.unwrap();
    });

    let config = Config::client("127.0.0.1".to_string(), port).with_protocol(Protocol::Tcp);
    let mut client = Client::new(config).unwrap();
    client.connect().await.unwrap();

    let result = client.start().await;
    assert!(matches!(result, Err(Error::PreambleRejected)));
}
