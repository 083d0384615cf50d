// Multi-instance fan-out: several hubs sharing one bus, the way a fleet
// of chat servers shares an external pub/sub backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::sleep;

use roomcast::admission::Admission;
use roomcast::auth::HmacTokenValidator;
use roomcast::bus::{Bus, InMemoryBus};
use roomcast::connection::Connection;
use roomcast::dispatcher::Dispatcher;
use roomcast::hub::Hub;
use roomcast::metrics::Metrics;
use roomcast::store::{MessageStore, SqliteStore};

struct Instance {
    hub: Arc<Hub>,
    dispatcher: Dispatcher,
}

/// One chat-server instance: its own hub and dispatcher, sharing the
/// cluster bus and the backing store.
fn instance(bus: Arc<dyn Bus>, store: Arc<SqliteStore>) -> Instance {
    let metrics = Arc::new(Metrics::new());
    let hub = Hub::new(bus.clone(), metrics.clone(), 100);
    hub.start();
    let dispatcher = Dispatcher::new(
        Arc::new(HmacTokenValidator::new("fanout-secret")),
        Admission::new(store.clone()),
        store,
        bus,
        hub.clone(),
        metrics,
    );
    Instance { hub, dispatcher }
}

fn connection(addr: &str, user_id: i64, username: &str) -> (Arc<Connection>, Receiver<String>) {
    let (conn, rx) = Connection::new(addr, 64);
    conn.set_identity(user_id, username);
    (conn, rx)
}

async fn settle() {
    sleep(Duration::from_millis(80)).await;
}

fn drain(rx: &mut Receiver<String>) {
    while rx.try_recv().is_ok() {}
}

/// Frames of one type currently sitting in a queue.
fn frames_of_type(rx: &mut Receiver<String>, frame_type: &str) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        if v["type"] == frame_type {
            frames.push(v);
        }
    }
    frames
}

#[tokio::test]
async fn message_reaches_members_on_every_instance() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let a = instance(bus.clone(), store.clone());
    let b = instance(bus.clone(), store.clone());

    let (alice, mut alice_rx) = connection("10.0.0.1", 42, "alice");
    let (bob, mut bob_rx) = connection("10.0.0.2", 7, "bob");

    a.dispatcher
        .handle(&alice, r#"{"type":"join_room","room_id":1}"#)
        .await;
    b.dispatcher
        .handle(&bob, r#"{"type":"join_room","room_id":1}"#)
        .await;
    settle().await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    a.dispatcher
        .handle(&alice, r#"{"type":"send_message","content":"hi"}"#)
        .await;
    settle().await;

    // the sender gets its own message back through the bus loop, and the
    // remote instance's member gets the same frame
    for rx in [&mut alice_rx, &mut bob_rx] {
        let messages = frames_of_type(rx, "new_message");
        assert_eq!(messages.len(), 1, "expected exactly one delivery");
        assert_eq!(messages[0]["content"], "hi");
        assert_eq!(messages[0]["username"], "alice");
        assert_eq!(messages[0]["room_id"], 1);
    }

    // exactly one row persisted
    assert_eq!(store.list_before(1, 0, 100).unwrap().len(), 1);
}

#[tokio::test]
async fn per_publisher_order_is_preserved_across_instances() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let a = instance(bus.clone(), store.clone());
    let b = instance(bus.clone(), store.clone());

    let (alice, mut alice_rx) = connection("10.0.0.1", 42, "alice");
    let (bob, mut bob_rx) = connection("10.0.0.2", 7, "bob");
    a.dispatcher
        .handle(&alice, r#"{"type":"join_room","room_id":1}"#)
        .await;
    b.dispatcher
        .handle(&bob, r#"{"type":"join_room","room_id":1}"#)
        .await;
    settle().await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    for i in 0..5 {
        a.dispatcher
            .handle(
                &alice,
                &format!(r#"{{"type":"send_message","content":"m{i}"}}"#),
            )
            .await;
    }
    settle().await;

    let contents: Vec<String> = frames_of_type(&mut bob_rx, "new_message")
        .iter()
        .map(|f| f["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn presence_crosses_instances() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let a = instance(bus.clone(), store.clone());
    let b = instance(bus.clone(), store.clone());

    let (bob, mut bob_rx) = connection("10.0.0.2", 7, "bob");
    b.dispatcher
        .handle(&bob, r#"{"type":"join_room","room_id":1}"#)
        .await;
    settle().await;
    drain(&mut bob_rx);

    let (alice, mut alice_rx) = connection("10.0.0.1", 42, "alice");
    a.dispatcher
        .handle(&alice, r#"{"type":"join_room","room_id":1}"#)
        .await;
    settle().await;

    let joined = frames_of_type(&mut bob_rx, "user_joined");
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0]["user_id"], 42);
    assert_eq!(joined[0]["username"], "alice");
    drain(&mut alice_rx);

    a.dispatcher.handle(&alice, r#"{"type":"leave_room"}"#).await;
    settle().await;

    let left = frames_of_type(&mut bob_rx, "user_left");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["user_id"], 42);
}

#[tokio::test]
async fn events_stay_scoped_to_their_room() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let a = instance(bus.clone(), store.clone());
    let b = instance(bus.clone(), store.clone());

    let other = store
        .create_room("other", roomcast::models::RoomKind::Public)
        .unwrap();

    let (alice, mut alice_rx) = connection("10.0.0.1", 42, "alice");
    let (bob, mut bob_rx) = connection("10.0.0.2", 7, "bob");
    a.dispatcher
        .handle(&alice, r#"{"type":"join_room","room_id":1}"#)
        .await;
    b.dispatcher
        .handle(&bob, &format!(r#"{{"type":"join_room","room_id":{}}}"#, other.id))
        .await;
    settle().await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    a.dispatcher
        .handle(&alice, r#"{"type":"send_message","content":"room 1 only"}"#)
        .await;
    settle().await;

    assert_eq!(frames_of_type(&mut alice_rx, "new_message").len(), 1);
    assert!(frames_of_type(&mut bob_rx, "new_message").is_empty());
}

#[tokio::test]
async fn disconnect_leaves_no_trace_in_the_hub() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let a = instance(bus.clone(), store.clone());

    let (alice, _alice_rx) = connection("10.0.0.1", 42, "alice");
    a.dispatcher
        .handle(&alice, r#"{"type":"join_room","room_id":1}"#)
        .await;
    settle().await;
    assert!(a.hub.contains(1, alice.id()));

    // the reader exit contract: unregister, then close
    a.hub.unregister(alice.clone(), 1).await;
    alice.close();
    settle().await;

    assert!(!a.hub.contains(1, alice.id()));
    assert_eq!(a.hub.room_count(), 0);
    assert!(alice.is_closed());
}
