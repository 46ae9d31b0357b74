//! Integration tests for the mazenet server: handshake, identity, clock,
//! replication, movement, disconnect and shutdown over real sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mazenet::console::run_console;
use mazenet::{MazenetServer, PROTOCOL_VERSION, ServerHandle};
use mazenet_client::{ClientConfig, GameClient};
use mazenet_protocol::{
    BincodeCodec, Channel, ClockPing, Codec, ComponentSet, Dead, Direction,
    DisplayName, EntityAssigned, EntityId, Envelope, Handshake,
    HandshakeAccepted, HandshakeRejected, IdentityAnnounce, MapData,
    MoveIntent, Position, Protocol, ReplicationBatch, ServerTime, TypeTag,
    WireType,
};
use tokio::io::AsyncReadExt;
use mazenet_session::SessionState;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const WIDTH: u32 = 20;
const HEIGHT: u32 = 15;
const WAIT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port.
async fn start_server() -> (ServerHandle, JoinHandle<Result<(), mazenet::MazenetError>>) {
    let server = MazenetServer::builder()
        .bind("127.0.0.1")
        .port(0)
        .map_size(WIDTH, HEIGHT)
        .build()
        .await
        .expect("server should build");
    let handle = server.handle();
    let task = tokio::spawn(server.run());

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (handle, task)
}

/// Polls `check` until it holds or `WAIT` elapses.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A client speaking the wire protocol by hand.
struct RawClient {
    ws: ClientWs,
    protocol: Protocol,
    seq: u64,
}

impl RawClient {
    async fn connect(handle: &ServerHandle) -> Self {
        let (ws, _) =
            tokio_tungstenite::connect_async(format!("ws://{}", handle.local_addr()))
                .await
                .expect("should connect");
        Self {
            ws,
            protocol: Protocol::standard().unwrap(),
            seq: 0,
        }
    }

    async fn send<T: WireType>(&mut self, message: &T) {
        self.seq += 1;
        let frame = self.protocol.frame(self.seq, message).unwrap();
        self.ws
            .send(Message::Binary(frame.bytes.into()))
            .await
            .expect("send");
    }

    async fn send_raw(&mut self, bytes: Vec<u8>) {
        self.ws
            .send(Message::Binary(bytes.into()))
            .await
            .expect("send");
    }

    /// Sends an envelope with an arbitrary tag and body.
    async fn send_envelope(&mut self, tag: TypeTag, body: Vec<u8>) {
        self.seq += 1;
        let envelope = Envelope {
            seq: self.seq,
            channel: Channel::Control,
            tag,
            body,
        };
        let bytes = BincodeCodec.encode(&envelope).unwrap();
        self.send_raw(bytes).await;
    }

    /// Next envelope, or `None` once the server closes.
    async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("server went quiet");
            match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(self.protocol.open(&bytes).expect("decodable envelope"));
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Skips envelopes until one of type `T` arrives.
    async fn recv_as<T: WireType>(&mut self) -> T {
        loop {
            let envelope = self.recv().await.expect("connection open");
            if envelope.tag == T::TAG {
                return self.protocol.registry().decode_as(&envelope.body).unwrap();
            }
        }
    }

    async fn handshake(&mut self) -> HandshakeAccepted {
        self.send(&Handshake {
            version: PROTOCOL_VERSION,
        })
        .await;
        self.recv_as::<HandshakeAccepted>().await
    }
}

fn position_in(batch: &ReplicationBatch, protocol: &Protocol, entity: EntityId) -> Option<Position> {
    let state = batch.entities.iter().find(|s| s.entity == entity)?;
    let set = ComponentSet::decode(protocol.registry(), &state.components).ok()?;
    set.get::<Position>().copied()
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_stalled_peer_does_not_block_other_clients() {
    let server = MazenetServer::builder()
        .bind("127.0.0.1")
        .port(0)
        .map_size(WIDTH, HEIGHT)
        .handshake_timeout(Duration::from_millis(300))
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr();
    let _task = tokio::spawn(server.run());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Opens TCP and never sends the HTTP upgrade.
    let mut stalled = tokio::net::TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = tokio::time::timeout(
        Duration::from_secs(3),
        GameClient::connect(&addr.to_string(), "Alice", ClientConfig::default()),
    )
    .await
    .expect("accept loop blocked by a stalled peer")
    .expect("client should connect");
    assert!(client.is_connected());

    // The stalled peer is dropped once the handshake timeout passes.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(WAIT, stalled.read(&mut buf))
        .await
        .expect("stalled peer should be closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    client.close().await;
}

#[tokio::test]
async fn test_build_rejects_unusable_maps() {
    let too_small = MazenetServer::builder()
        .bind("127.0.0.1")
        .port(0)
        .map_size(0, 0)
        .build()
        .await;
    assert!(matches!(too_small, Err(mazenet::MazenetError::InvalidConfig(_))));

    let inconsistent = MazenetServer::builder()
        .bind("127.0.0.1")
        .port(0)
        .map(MapData {
            width: 5,
            height: 5,
            cells: Vec::new(),
        })
        .build()
        .await;
    assert!(matches!(inconsistent, Err(mazenet::MazenetError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_handshake_success() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;

    let accepted = client.handshake().await;

    assert!(accepted.connection > 0);
    assert!(eventually(|| handle.connections().len() == 1).await);
    assert_eq!(handle.connections()[0].state, SessionState::Connected);
}

#[tokio::test]
async fn test_handshake_version_mismatch_is_rejected_and_closed() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;

    client
        .send(&Handshake {
            version: PROTOCOL_VERSION + 998,
        })
        .await;

    let envelope = client.recv().await.expect("rejection");
    assert_eq!(envelope.tag, HandshakeRejected::TAG);
    let rejected: HandshakeRejected =
        client.protocol.registry().decode_as(&envelope.body).unwrap();
    assert!(rejected.reason.contains("version mismatch"));

    assert!(client.recv().await.is_none());
    assert!(handle.connections().is_empty());
}

#[tokio::test]
async fn test_first_message_must_be_handshake() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;

    client
        .send(&IdentityAnnounce {
            name: "Alice".into(),
        })
        .await;

    let envelope = client.recv().await.expect("rejection");
    assert_eq!(envelope.tag, HandshakeRejected::TAG);
    assert!(client.recv().await.is_none());
}

// =========================================================================
// Identity and replication
// =========================================================================

#[tokio::test]
async fn test_identity_yields_entity_time_map_and_position() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;
    client.handshake().await;

    client
        .send(&IdentityAnnounce {
            name: "Alice".into(),
        })
        .await;

    let mut entity = None;
    let mut server_time = None;
    let mut map: Option<MapData> = None;
    let mut position = None;
    while position.is_none() || map.is_none() || server_time.is_none() {
        let envelope = client.recv().await.expect("connection open");
        let registry = client.protocol.registry();
        if envelope.tag == EntityAssigned::TAG {
            let msg: EntityAssigned = registry.decode_as(&envelope.body).unwrap();
            entity = Some(msg.entity);
        } else if envelope.tag == ServerTime::TAG {
            let msg: ServerTime = registry.decode_as(&envelope.body).unwrap();
            server_time = Some(msg.server_time);
        } else if envelope.tag == MapData::TAG {
            map = Some(registry.decode_as(&envelope.body).unwrap());
        } else if envelope.tag == ReplicationBatch::TAG {
            let batch: ReplicationBatch = registry.decode_as(&envelope.body).unwrap();
            if let Some(entity) = entity {
                position = position.or(position_in(&batch, &client.protocol, entity));
            }
        }
    }

    let entity = entity.expect("entity assigned");
    assert!(entity.0 >= 1);
    assert!(server_time.is_some());
    let map = map.unwrap();
    assert_eq!((map.width, map.height), (WIDTH, HEIGHT));
    assert!(map.is_consistent());
    let position = position.unwrap();
    assert!(map.is_floor(position.x, position.y));

    let info = handle.connections().pop().unwrap();
    assert_eq!(info.state, SessionState::Active);
    assert_eq!(info.name.as_deref(), Some("Alice"));
    assert_eq!(info.entity, Some(entity));
}

#[tokio::test]
async fn test_second_identity_keeps_first_entity() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;
    client.handshake().await;

    client.send(&IdentityAnnounce { name: "Alice".into() }).await;
    let first = client.recv_as::<EntityAssigned>().await;
    client.send(&IdentityAnnounce { name: "Mallory".into() }).await;

    assert!(
        eventually(|| handle.connections()[0].name.as_deref() == Some("Alice")).await
    );
    let stats = handle.world().stats().await.unwrap();
    assert_eq!(stats.allocated, 1);
    assert_eq!(handle.connections()[0].entity, Some(first.entity));
}

#[tokio::test]
async fn test_move_before_identity_is_ignored() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;
    client.handshake().await;

    client
        .send(&MoveIntent {
            direction: Direction::North,
        })
        .await;
    client.send(&IdentityAnnounce { name: "Alice".into() }).await;
    client.recv_as::<EntityAssigned>().await;

    let info = handle.connections().pop().unwrap();
    assert_eq!(info.state, SessionState::Active);
    assert_eq!(info.moves, 0);
}

#[tokio::test]
async fn test_clock_ping_is_stamped_by_server() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;
    client.handshake().await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    client
        .send(&ClockPing {
            sent_time: 0,
            observed_time: 0,
        })
        .await;
    let reply = client.recv_as::<ClockPing>().await;

    assert_eq!(reply.sent_time, 0);
    assert!(reply.observed_time > 0);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped_and_connection_kept() {
    let (handle, _task) = start_server().await;
    let mut client = RawClient::connect(&handle).await;
    client.handshake().await;

    client.send_raw(vec![0xde, 0xad, 0xbe, 0xef]).await;
    client.send_envelope(TypeTag(4242), vec![1, 2, 3]).await;
    client.send_envelope(IdentityAnnounce::TAG, vec![0xff]).await;
    client
        .send(&ClockPing {
            sent_time: 7,
            observed_time: 7,
        })
        .await;

    let reply = client.recv_as::<ClockPing>().await;
    assert_eq!(reply.sent_time, 7);
    assert_ne!(reply.observed_time, reply.sent_time);

    let connections = handle.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].state, SessionState::Connected);
}

#[tokio::test]
async fn test_players_see_each_other() {
    let (handle, _task) = start_server().await;
    let alice = GameClient::connect(&handle.local_addr().to_string(), "Alice", ClientConfig::default())
        .await
        .unwrap();
    let bob = GameClient::connect(&handle.local_addr().to_string(), "Bob", ClientConfig::default())
        .await
        .unwrap();

    let alice_id = alice.wait_for_entity().await.unwrap();
    let bob_id = bob.wait_for_entity().await.unwrap();
    assert_ne!(alice_id, bob_id);

    assert!(
        eventually(|| {
            let snap = alice.snapshot();
            snap.get(&bob_id)
                .and_then(|set| set.get::<DisplayName>())
                .is_some_and(|n| n.name == "Bob")
        })
        .await
    );
}

// =========================================================================
// Client runtime against the server
// =========================================================================

#[tokio::test]
async fn test_client_receives_entity_time_map_and_position() {
    let (handle, _task) = start_server().await;
    let client = GameClient::connect(&handle.local_addr().to_string(), "Alice", ClientConfig::default())
        .await
        .unwrap();

    let entity = client.wait_for_entity().await.unwrap();
    let map = client.wait_for_map().await.unwrap();
    client.wait_for_sync().await.unwrap();

    assert_eq!((map.width, map.height), (WIDTH, HEIGHT));
    assert!(client.server_time().unwrap() >= 0);
    assert!(client.render_time().unwrap() < client.server_time().unwrap() + 1);
    assert!(
        eventually(|| client
            .snapshot()
            .get(&entity)
            .is_some_and(|set| set.contains::<Position>()))
        .await
    );
}

#[tokio::test]
async fn test_two_moves_within_interval_reach_server_once() {
    let (handle, _task) = start_server().await;
    let config = ClientConfig::default().with_move_interval(Duration::from_secs(2));
    let client = GameClient::connect(&handle.local_addr().to_string(), "Alice", config)
        .await
        .unwrap();
    let entity = client.wait_for_entity().await.unwrap();
    assert!(
        eventually(|| client.snapshot().get(&entity).is_some_and(|s| s.contains::<Position>())).await
    );
    let start = *client.snapshot()[&entity].get::<Position>().unwrap();

    assert!(client.move_towards(Direction::North).await.unwrap());
    assert!(!client.move_towards(Direction::North).await.unwrap());

    let target = start.step(Direction::North);
    assert!(
        eventually(|| client.snapshot()[&entity].get::<Position>() == Some(&target)).await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(handle.connections()[0].moves, 1);
    assert_eq!(client.snapshot()[&entity].get::<Position>(), Some(&target));
}

#[tokio::test]
async fn test_disconnect_marks_entity_dead_and_removes_connection() {
    let (handle, _task) = start_server().await;
    let client = GameClient::connect(&handle.local_addr().to_string(), "Alice", ClientConfig::default())
        .await
        .unwrap();
    let entity = client.wait_for_entity().await.unwrap();

    client.close().await;

    assert!(eventually(|| handle.connections().is_empty()).await);
    let mut dead = false;
    for _ in 0..50 {
        let set = handle.world().inspect(entity).await.unwrap();
        if set.is_some_and(|s| s.contains::<Dead>()) {
            dead = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dead);
}

// =========================================================================
// Shutdown and console
// =========================================================================

#[tokio::test]
async fn test_shutdown_stops_server_and_disconnects_clients() {
    let (handle, task) = start_server().await;
    let client = GameClient::connect(&handle.local_addr().to_string(), "Alice", ClientConfig::default())
        .await
        .unwrap();
    client.wait_for_entity().await.unwrap();

    handle.shutdown();

    let result = tokio::time::timeout(WAIT, task).await.expect("server stops");
    assert!(result.unwrap().is_ok());
    assert!(eventually(|| !client.is_connected()).await);
    assert!(handle.world().stats().await.is_err());
}

#[tokio::test]
async fn test_console_exit_triggers_shutdown() {
    let (handle, task) = start_server().await;

    run_console(&b"connections\nbogus\nexit\n"[..], handle.clone()).await;

    assert!(handle.is_shutting_down());
    let result = tokio::time::timeout(WAIT, task).await.expect("server stops");
    assert!(result.unwrap().is_ok());
}
