//! Session lifecycle tests against a running simulation.

use std::sync::Arc;

use mazenet_protocol::{Dead, Direction, MonotonicClock, Position, Protocol};
use mazenet_session::{ConnectionSession, SessionError, SessionState, SessionTable};
use mazenet_transport::{ConnectionId, Frame, Outbox};
use mazenet_world::{WorldConfig, WorldHandle, spawn_world};
use tokio::sync::mpsc::Receiver;

struct Fixture {
    world: WorldHandle,
    table: SessionTable,
}

fn fixture() -> Fixture {
    let protocol = Arc::new(Protocol::standard().unwrap());
    let mut config = WorldConfig::default();
    config.tick.initial_jitter_us = 0;
    let (world, _task) = spawn_world(config, protocol, MonotonicClock::new());
    Fixture {
        world,
        table: SessionTable::new(),
    }
}

fn open(fx: &Fixture, id: u64) -> (ConnectionSession, Receiver<Frame>) {
    let (outbox, _control, repl) = Outbox::channel(ConnectionId::new(id));
    let session = ConnectionSession::open(fx.world.clone(), outbox, fx.table.clone())
        .expect("world running");
    (session, repl)
}

#[tokio::test(start_paused = true)]
async fn test_open_registers_connected_session() {
    let fx = fixture();
    let (session, _repl) = open(&fx, 1);

    assert_eq!(session.state(), SessionState::Connected);
    let info = fx.table.get(ConnectionId::new(1)).expect("listed");
    assert_eq!(info.state, SessionState::Connected);
    assert_eq!(info.name, None);
    assert_eq!(fx.world.stats().await.unwrap().subscribers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_identities_allocate_exactly_one_entity() {
    let fx = fixture();
    let (mut session, _repl) = open(&fx, 1);

    let entity = session.announce("Alice").unwrap();
    let second = session.announce("Mallory");

    assert!(matches!(second, Err(SessionError::AlreadyIdentified)));
    assert_eq!(session.entity(), Some(entity));
    assert_eq!(session.name(), Some("Alice"));

    let stats = fx.world.stats().await.unwrap();
    assert_eq!(stats.allocated, 1);
    assert_eq!(stats.entities, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_name_is_refused_and_session_stays_connected() {
    let fx = fixture();
    let (mut session, _repl) = open(&fx, 1);

    let result = session.announce("   ");

    assert!(matches!(result, Err(SessionError::EmptyName)));
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.announce("Alice").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_move_before_identity_is_not_active() {
    let fx = fixture();
    let (mut session, _repl) = open(&fx, 1);

    let result = session.request_move(Direction::North);

    assert!(matches!(result, Err(SessionError::NotActive)));
    assert_eq!(session.moves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_moves_are_counted_and_applied() {
    let fx = fixture();
    let (mut session, _repl) = open(&fx, 1);
    let entity = session.announce("Alice").unwrap();

    session.request_move(Direction::North).unwrap();

    assert_eq!(fx.table.get(session.conn_id()).unwrap().moves, 1);
    let set = fx.world.inspect(entity).await.unwrap().unwrap();
    assert_eq!(set.get::<Position>(), Some(&Position { x: 16, y: 11 }));
}

#[tokio::test(start_paused = true)]
async fn test_close_while_active_marks_dead_once_and_detaches() {
    let fx = fixture();
    let (mut session, mut repl) = open(&fx, 1);
    let entity = session.announce("Alice").unwrap();
    repl.recv().await.expect("initial snapshot");

    assert!(session.close(500));
    assert!(!session.close(900));

    let set = fx.world.inspect(entity).await.unwrap().expect("corpse");
    assert_eq!(set.get::<Dead>(), Some(&Dead { died_at: 500 }));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(fx.table.is_empty());

    // Detached: the replication lane closes without another batch.
    assert!(repl.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_close_before_identity_spawns_nothing() {
    let fx = fixture();
    let (mut session, _repl) = open(&fx, 1);

    assert!(session.close(10));

    let stats = fx.world.stats().await.unwrap();
    assert_eq!(stats.entities, 0);
    assert_eq!(stats.subscribers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_identity_after_close_is_refused() {
    let fx = fixture();
    let (mut session, _repl) = open(&fx, 1);
    session.close(0);

    assert!(matches!(session.announce("Alice"), Err(SessionError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_drop_while_active_marks_dead_and_unregisters() {
    let fx = fixture();
    let (mut session, mut repl) = open(&fx, 1);
    let entity = session.announce("Alice").unwrap();
    repl.recv().await.expect("initial snapshot");

    drop(session);

    let set = fx.world.inspect(entity).await.unwrap().expect("corpse");
    assert!(set.get::<Dead>().is_some());
    assert!(fx.table.is_empty());
    assert_eq!(fx.world.stats().await.unwrap().subscribers, 0);
}
