//! Integration tests for tagwire.
//!
//! Every test runs a real endpoint on 127.0.0.1 with an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tagwire::codec::MsgPackCodec;
use tagwire::messages::{
    Echo, LoginReply, LoginRequest, OfflineNotice, OfflineRequest, PlayerData, ServerState, ECHO,
    LOGIN, OFFLINE,
};
use tagwire::protocol::{build_frame, encode_message, read_frame, Frame, Header, DEFAULT_MAX_PAYLOAD_SIZE};
use tagwire::{
    Connection, ConnectionConfig, ConnectionState, DispatchTable, Endpoint, EndpointConfig, TagwireError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

fn server_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    table
        .register(ECHO, |msg: Echo, ctx| async move { ctx.reply(&msg).await })
        .unwrap();
    table
        .register(LOGIN, |_req: LoginRequest, ctx| async move {
            ctx.reply(&LoginReply {
                player: PlayerData::default(),
                need_create_role: false,
            })
            .await
        })
        .unwrap();
    table
}

async fn start_server(table: DispatchTable) -> (Endpoint, JoinHandle<tagwire::Result<()>>) {
    let endpoint = Endpoint::bind("127.0.0.1:0", Arc::new(table), EndpointConfig::default())
        .await
        .unwrap();
    let accept = endpoint.spawn_accept_loop();
    (endpoint, accept)
}

/// Client whose echo replies land in a channel.
async fn echo_client(endpoint: &Endpoint, config: ConnectionConfig) -> (Connection, mpsc::UnboundedReceiver<Echo>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut table = DispatchTable::new();
    table
        .register(ECHO, move |msg: Echo, _ctx| {
            let _ = tx.send(msg);
            async { Ok(()) }
        })
        .unwrap();

    let conn = Connection::dial(endpoint.local_addr(), Arc::new(table), config)
        .await
        .unwrap();
    (conn, rx)
}

async fn read_one(stream: &mut TcpStream) -> Frame {
    tokio::time::timeout(WAIT, read_frame(stream, DEFAULT_MAX_PAYLOAD_SIZE))
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .expect("server closed the connection")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Echo `{"Value":42}` comes back byte for byte.
#[tokio::test]
async fn test_echo_scenario_on_the_wire() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let mut stream = TcpStream::connect(endpoint.local_addr()).await.unwrap();

    let request = build_frame(&Header::new(ECHO, 12), br#"{"Value":42}"#);
    stream.write_all(&request).await.unwrap();

    let mut raw = [0u8; 20];
    tokio::time::timeout(WAIT, stream.read_exact(&mut raw))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&raw[..8], &[0, 0, 0, 0, 0, 0, 0, 12]);
    assert_eq!(&raw[8..], br#"{"Value":42}"#);

    endpoint.close().await;
}

/// Login request gets the default player.
#[tokio::test]
async fn test_login_scenario() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let mut stream = TcpStream::connect(endpoint.local_addr()).await.unwrap();

    let request = encode_message::<tagwire::codec::JsonCodec, _>(&LoginRequest {
        username: "user0".to_string(),
        password: "test".to_string(),
    })
    .unwrap();
    stream.write_all(&request).await.unwrap();

    let frame = read_one(&mut stream).await;
    assert_eq!(frame.tag(), LOGIN);
    let reply: LoginReply = serde_json::from_slice(frame.payload()).unwrap();
    assert!(!reply.need_create_role);
    assert_eq!(reply.player.atk, 10);
    assert_eq!(reply.player.def, 10);
    assert_eq!(reply.player.hp, 10);
    assert_eq!(reply.player.level, 1);
    assert_eq!(reply.player.mp, 10);
    assert_eq!(reply.player.money, 0);
    assert_eq!(reply.player.role_name, "TEST");

    endpoint.close().await;
}

/// Typed round trip through two connections.
#[tokio::test]
async fn test_round_trip_between_connections() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let (conn, mut replies) = echo_client(&endpoint, ConnectionConfig::default()).await;

    conn.send(&Echo { value: -7 }).await.unwrap();

    let reply = tokio::time::timeout(WAIT, replies.recv()).await.unwrap().unwrap();
    assert_eq!(reply, Echo { value: -7 });

    conn.close().unwrap();
    endpoint.close().await;
}

/// Frames dribbled in one byte at a time are still decoded.
#[tokio::test]
async fn test_fragmented_frames() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let mut stream = TcpStream::connect(endpoint.local_addr()).await.unwrap();
    stream.set_nodelay(true).unwrap();

    let mut bytes = build_frame(&Header::new(ECHO, 11), br#"{"Value":1}"#).to_vec();
    bytes.extend_from_slice(&build_frame(&Header::new(ECHO, 11), br#"{"Value":2}"#));
    for byte in &bytes {
        stream.write_all(std::slice::from_ref(byte)).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(read_one(&mut stream).await.payload(), br#"{"Value":1}"#);
    assert_eq!(read_one(&mut stream).await.payload(), br#"{"Value":2}"#);

    endpoint.close().await;
}

/// Messages from one connection are handled and answered in send order.
#[tokio::test]
async fn test_per_connection_ordering() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let config = ConnectionConfig {
        queue_capacity: 64,
        ..Default::default()
    };
    let (conn, mut replies) = echo_client(&endpoint, config).await;

    for value in 0..500 {
        conn.send(&Echo { value }).await.unwrap();
    }

    for expected in 0..500 {
        let reply = tokio::time::timeout(WAIT, replies.recv()).await.unwrap().unwrap();
        assert_eq!(reply.value, expected);
    }

    conn.close().unwrap();
    endpoint.close().await;
}

/// Senders can share one connection from many tasks without interleaving
/// bytes of different frames.
#[tokio::test]
async fn test_concurrent_senders_share_connection() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let (conn, mut replies) = echo_client(&endpoint, ConnectionConfig::default()).await;

    let senders: Vec<_> = (0..8)
        .map(|task| {
            let conn = conn.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    conn.send(&Echo { value: task * 100 + i }).await.unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..200 {
        let reply = tokio::time::timeout(WAIT, replies.recv()).await.unwrap().unwrap();
        seen.push(reply.value);
    }
    seen.sort_unstable();
    let mut expected: Vec<i64> = (0..8).flat_map(|t| (0..25).map(move |i| t * 100 + i)).collect();
    expected.sort_unstable();
    assert_eq!(seen, expected);

    conn.close().unwrap();
    endpoint.close().await;
}

/// With an unbuffered queue a send stalls once the peer stops reading, and
/// closing the connection releases the stalled sender.
#[tokio::test]
async fn test_backpressure_and_close_wakes_sender() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _silent_peer = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let conn = Connection::dial(addr, Arc::new(DispatchTable::new()), ConnectionConfig::default())
        .await
        .unwrap();
    let payload = Bytes::from(vec![0u8; 1 << 20]);

    let mut blocked = None;
    for _ in 0..256 {
        let sender = conn.clone();
        let payload = payload.clone();
        let mut task = tokio::spawn(async move { sender.send_frame(9, payload).await });
        match tokio::time::timeout(Duration::from_millis(500), &mut task).await {
            Ok(result) => result.unwrap().unwrap(),
            Err(_) => {
                blocked = Some(task);
                break;
            }
        }
    }
    let blocked = blocked.expect("sends never blocked on a peer that does not read");

    conn.close().unwrap();

    let result = tokio::time::timeout(WAIT, blocked).await.unwrap().unwrap();
    assert!(matches!(result, Err(TagwireError::ConnectionClosed)));
    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
}

/// Closing twice fails the second time and nothing else.
#[tokio::test]
async fn test_close_idempotence() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let (conn, _replies) = echo_client(&endpoint, ConnectionConfig::default()).await;

    assert!(conn.close().is_ok());
    assert!(matches!(conn.close(), Err(TagwireError::AlreadyClosed)));

    tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.close(), Err(TagwireError::AlreadyClosed)));
    assert!(matches!(
        conn.send(&Echo { value: 1 }).await,
        Err(TagwireError::ConnectionClosed)
    ));

    endpoint.close().await;
}

/// Unknown tags and undecodable payloads are dropped, the connection lives on.
#[tokio::test]
async fn test_dispatch_miss_tolerance() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let mut stream = TcpStream::connect(endpoint.local_addr()).await.unwrap();

    stream
        .write_all(&build_frame(&Header::new(42, 5), b"hello"))
        .await
        .unwrap();
    stream
        .write_all(&build_frame(&Header::new(ECHO, 3), b"{{{"))
        .await
        .unwrap();
    stream
        .write_all(&build_frame(&Header::new(ECHO, 11), br#"{"Value":5}"#))
        .await
        .unwrap();

    let frame = read_one(&mut stream).await;
    assert_eq!(frame.tag(), ECHO);
    assert_eq!(frame.payload(), br#"{"Value":5}"#);
    assert_eq!(endpoint.connection_count(), 1);

    endpoint.close().await;
}

/// A client offline notice closes the server side and leaves the registry.
#[tokio::test]
async fn test_offline_notice_closes_connection() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let mut stream = TcpStream::connect(endpoint.local_addr()).await.unwrap();
    wait_until(|| endpoint.connection_count() == 1).await;

    let offline = encode_message::<tagwire::codec::JsonCodec, _>(&OfflineRequest {}).unwrap();
    assert_eq!(&offline[..4], &OFFLINE.to_be_bytes());
    stream.write_all(&offline).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
    wait_until(|| endpoint.connection_count() == 0).await;

    endpoint.close().await;
}

/// A server kick notice closes the client through its termination policy.
#[tokio::test]
async fn test_server_kick_closes_client() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let (client, _replies) = echo_client(&endpoint, ConnectionConfig::default()).await;
    wait_until(|| endpoint.connection_count() == 1).await;

    let server_side = endpoint.connections().pop().unwrap();
    server_side
        .send(&OfflineNotice {
            server_state: ServerState::Shutdown,
            error: String::new(),
        })
        .await
        .unwrap();

    tokio::time::timeout(WAIT, client.closed()).await.unwrap();
    tokio::time::timeout(WAIT, server_side.closed()).await.unwrap();
    wait_until(|| endpoint.connection_count() == 0).await;

    endpoint.close().await;
}

/// Endpoint close tears down every live connection.
#[tokio::test]
async fn test_endpoint_close_closes_all_connections() {
    let (endpoint, accept) = start_server(server_table()).await;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(echo_client(&endpoint, ConnectionConfig::default()).await);
    }
    wait_until(|| endpoint.connection_count() == 5).await;

    tokio::time::timeout(WAIT, endpoint.close()).await.unwrap();
    assert_eq!(endpoint.connection_count(), 0);
    accept.await.unwrap().unwrap();

    for (client, _) in &clients {
        tokio::time::timeout(WAIT, client.closed()).await.unwrap();
    }
    assert!(TcpStream::connect(endpoint.local_addr()).await.is_err());
}

/// Connections that end on their own are pruned from the registry.
#[tokio::test]
async fn test_registry_pruning() {
    let (endpoint, _accept) = start_server(server_table()).await;

    let (first, _r1) = echo_client(&endpoint, ConnectionConfig::default()).await;
    let (_second, _r2) = echo_client(&endpoint, ConnectionConfig::default()).await;
    wait_until(|| endpoint.connection_count() == 2).await;

    first.close().unwrap();
    wait_until(|| endpoint.connection_count() == 1).await;

    endpoint.close().await;
}

/// Dropping every client handle without `close()` releases the socket, so the
/// server sees EOF and prunes the connection.
#[tokio::test]
async fn test_dropped_client_handle_releases_socket() {
    let (endpoint, _accept) = start_server(server_table()).await;
    let (conn, _replies) = echo_client(&endpoint, ConnectionConfig::default()).await;
    wait_until(|| endpoint.connection_count() == 1).await;

    drop(conn);

    wait_until(|| endpoint.connection_count() == 0).await;
    endpoint.close().await;
}

/// Both ends can agree on MessagePack instead of JSON.
#[tokio::test]
async fn test_msgpack_end_to_end() {
    let mut table = DispatchTable::new();
    table
        .register_with::<MsgPackCodec, _, _, _>(ECHO, |msg: Echo, ctx| async move {
            ctx.reply_with::<MsgPackCodec, _>(&Echo { value: msg.value * 2 }).await
        })
        .unwrap();
    let (endpoint, _accept) = start_server(table).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client_table = DispatchTable::new();
    client_table
        .register_with::<MsgPackCodec, _, _, _>(ECHO, move |msg: Echo, _ctx| {
            let _ = tx.send(msg.value);
            async { Ok(()) }
        })
        .unwrap();
    let conn = Connection::dial(endpoint.local_addr(), Arc::new(client_table), ConnectionConfig::default())
        .await
        .unwrap();

    conn.send_with::<MsgPackCodec, _>(&Echo { value: 21 }).await.unwrap();

    assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap(), Some(42));

    conn.close().unwrap();
    endpoint.close().await;
}

/// Many clients in parallel, each with several requests in flight.
#[tokio::test]
async fn test_many_concurrent_clients() {
    let (endpoint, _accept) = start_server(server_table()).await;

    let clients: Vec<_> = (0..20)
        .map(|client| {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                let (conn, mut replies) = echo_client(&endpoint, ConnectionConfig::default()).await;
                for i in 0..10 {
                    conn.send(&Echo { value: client * 1000 + i }).await.unwrap();
                }
                for i in 0..10 {
                    let reply = tokio::time::timeout(WAIT, replies.recv()).await.unwrap().unwrap();
                    assert_eq!(reply.value, client * 1000 + i);
                }
                conn.close().unwrap();
            })
        })
        .collect();
    for client in clients {
        client.await.unwrap();
    }

    endpoint.close().await;
}

/// Dialing a port nobody listens on reports a dial error.
#[tokio::test]
async fn test_dial_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = Connection::dial(addr, Arc::new(DispatchTable::new()), ConnectionConfig::default()).await;
    assert!(matches!(result, Err(TagwireError::Dial { .. })));
}
