//! End-to-end relay flows driven through `ChatRelay` and `Session` directly.

use chat_types::{
    ClientEvent, Envelope, IncomingMessage, JoinRoom, MessageId, MessageRead, MessageStatus,
    OutgoingMessage, Register, RoomPost, ServerEvent, StatusUpdate, Username,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use veilchat_relay::config::Config;
use veilchat_relay::connections::Inbound;
use veilchat_relay::server::{ChatRelay, REASON_QUEUE_FULL};
use veilchat_relay::session::Session;
use veilchat_relay::storage::{
    IdentityDirectory, MemoryStorage, OfflineQueue, QueueSettings, SqliteStorage,
};

fn user(name: &str) -> Username {
    Username::parse(name).unwrap()
}

fn envelope(fill: u8) -> String {
    Envelope::new([fill; 24], vec![fill; 48]).to_base64()
}

fn message_frame(to: &str, id: &str, fill: u8) -> String {
    ClientEvent::Message(OutgoingMessage {
        recipient: user(to),
        encrypted_content: envelope(fill),
        timer: None,
        message_id: MessageId::parse(id).unwrap(),
        allow_queue: None,
    })
    .to_json()
    .unwrap()
}

fn register_frame(name: &str) -> String {
    ClientEvent::Register(Register {
        username: user(name),
        public_key: None,
    })
    .to_json()
    .unwrap()
}

fn drain(rx: &mut Inbound) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn messages(events: &[ServerEvent]) -> Vec<IncomingMessage> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Message(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn statuses(events: &[ServerEvent]) -> Vec<StatusUpdate> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::MessageStatus(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

async fn connect(relay: &Arc<ChatRelay>, name: &str) -> (Session, Inbound) {
    let (id, rx) = relay.open_connection();
    let mut session = Session::new(relay.clone(), id);
    session.handle_frame(&register_frame(name)).await.unwrap();
    (session, rx)
}

async fn storage_pending(relay: &ChatRelay, name: &str) -> u64 {
    relay.queue().pending_count(&user(name)).await.unwrap()
}

async fn directory_with<S: IdentityDirectory>(storage: &S, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        storage
            .register(&user(name), &[i as u8 + 1; 32])
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn offline_message_is_queued_then_received_on_register() {
    let storage = Arc::new(MemoryStorage::new());
    directory_with(storage.as_ref(), &["alice", "bob"]).await;
    let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage.clone()));

    let (mut alice, mut alice_rx) = connect(&relay, "alice").await;
    drain(&mut alice_rx);

    alice
        .handle_frame(&message_frame("bob", "m1", 5))
        .await
        .unwrap();
    let acks = statuses(&drain(&mut alice_rx));
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].status, MessageStatus::Queued);
    assert_eq!(storage.pending_count(&user("bob")).await.unwrap(), 1);

    let (_bob, mut bob_rx) = connect(&relay, "bob").await;
    let delivered = messages(&drain(&mut bob_rx));

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].sender, user("alice"));
    assert_eq!(delivered[0].status, MessageStatus::Received);
    assert_eq!(delivered[0].encrypted_content, envelope(5));
    assert_eq!(storage.pending_count(&user("bob")).await.unwrap(), 0);
}

#[tokio::test]
async fn queued_messages_drain_in_send_order() {
    let storage = Arc::new(MemoryStorage::new());
    directory_with(storage.as_ref(), &["alice", "bob"]).await;
    let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage));

    let (mut alice, _alice_rx) = connect(&relay, "alice").await;
    for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
        alice
            .handle_frame(&message_frame("bob", id, i as u8))
            .await
            .unwrap();
    }

    let (_bob, mut bob_rx) = connect(&relay, "bob").await;
    let ids: Vec<String> = messages(&drain(&mut bob_rx))
        .into_iter()
        .map(|m| m.message_id.as_str().to_string())
        .collect();
    assert_eq!(ids, ["m1", "m2", "m3"]);
}

#[tokio::test]
async fn queue_survives_relay_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.db");

    {
        let storage = Arc::new(
            SqliteStorage::new(&path, QueueSettings::default())
                .await
                .unwrap(),
        );
        directory_with(storage.as_ref(), &["alice", "bob"]).await;
        let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage));
        let (mut alice, _rx) = connect(&relay, "alice").await;
        alice
            .handle_frame(&message_frame("bob", "m1", 9))
            .await
            .unwrap();
    }

    let storage = Arc::new(
        SqliteStorage::new(&path, QueueSettings::default())
            .await
            .unwrap(),
    );
    let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage));
    let (_bob, mut bob_rx) = connect(&relay, "bob").await;

    let delivered = messages(&drain(&mut bob_rx));
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].encrypted_content, envelope(9));
}

#[tokio::test]
async fn full_queue_fails_with_reason() {
    let storage = Arc::new(MemoryStorage::with_settings(QueueSettings {
        max_len: 1,
        ..QueueSettings::default()
    }));
    directory_with(storage.as_ref(), &["alice", "bob"]).await;
    let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage));

    let (mut alice, mut alice_rx) = connect(&relay, "alice").await;
    drain(&mut alice_rx);
    alice
        .handle_frame(&message_frame("bob", "m1", 1))
        .await
        .unwrap();
    alice
        .handle_frame(&message_frame("bob", "m2", 2))
        .await
        .unwrap();

    let acks = statuses(&drain(&mut alice_rx));
    assert_eq!(acks[0].status, MessageStatus::Queued);
    assert_eq!(acks[1].status, MessageStatus::Failed);
    assert_eq!(acks[1].reason.as_deref(), Some(REASON_QUEUE_FULL));
}

#[tokio::test]
async fn drained_message_can_be_marked_read() {
    let storage = Arc::new(MemoryStorage::new());
    directory_with(storage.as_ref(), &["alice", "bob"]).await;
    let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage));

    let (mut alice, mut alice_rx) = connect(&relay, "alice").await;
    alice
        .handle_frame(&message_frame("bob", "m1", 1))
        .await
        .unwrap();
    let (mut bob, mut bob_rx) = connect(&relay, "bob").await;
    drain(&mut bob_rx);
    drain(&mut alice_rx);

    let read = ClientEvent::MessageRead(MessageRead {
        message_id: MessageId::parse("m1").unwrap(),
    })
    .to_json()
    .unwrap();
    bob.handle_frame(&read).await.unwrap();

    let acks = statuses(&drain(&mut alice_rx));
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].status, MessageStatus::Read);
}

#[tokio::test]
async fn newest_session_wins_and_old_close_is_harmless() {
    let storage = Arc::new(MemoryStorage::new());
    directory_with(storage.as_ref(), &["alice", "bob"]).await;
    let relay = Arc::new(ChatRelay::with_storage(Config::default(), storage));

    let (mut bob_old, mut old_rx) = connect(&relay, "bob").await;
    let (_bob_new, mut new_rx) = connect(&relay, "bob").await;

    // The replaced connection can no longer speak for bob.
    let read = ClientEvent::MessageRead(MessageRead {
        message_id: MessageId::parse("m0").unwrap(),
    })
    .to_json()
    .unwrap();
    let err = bob_old.handle_frame(&read).await.unwrap_err();
    assert_eq!(err.client_message(), "signed in from another connection");
    // Later frames on it are ignored rather than routed or queued.
    bob_old
        .handle_frame(&message_frame("alice", "m0", 1))
        .await
        .unwrap();
    assert_eq!(storage_pending(&relay, "alice").await, 0);
    bob_old.close().await;
    drain(&mut old_rx);
    drain(&mut new_rx);

    let (mut alice, _alice_rx) = connect(&relay, "alice").await;
    drain(&mut new_rx);
    alice
        .handle_frame(&message_frame("bob", "m1", 1))
        .await
        .unwrap();

    assert_eq!(messages(&drain(&mut new_rx)).len(), 1);
    assert!(messages(&drain(&mut old_rx)).is_empty());
}

#[tokio::test]
async fn room_members_only_see_their_own_envelope() {
    let relay = Arc::new(ChatRelay::with_storage(
        Config::default(),
        Arc::new(MemoryStorage::new()),
    ));

    let mut joined = Vec::new();
    for name in ["ann", "ben", "cat"] {
        let (id, rx) = relay.open_connection();
        let mut session = Session::new(relay.clone(), id);
        let join = ClientEvent::JoinRoom(JoinRoom {
            room_name: "ops".into(),
            password: "hunter2".into(),
            username: user(name),
            public_key: format!("{name}-key"),
        })
        .to_json()
        .unwrap();
        session.handle_frame(&join).await.unwrap();
        joined.push((session, rx));
    }
    for (_, rx) in joined.iter_mut() {
        drain(rx);
    }

    let ciphertexts: BTreeMap<Username, String> = [
        (user("ben"), envelope(2)),
        (user("cat"), envelope(3)),
    ]
    .into_iter()
    .collect();
    let post = ClientEvent::RoomMessage(RoomPost {
        room_name: "ops".into(),
        message_id: MessageId::parse("r1").unwrap(),
        ciphertexts,
    })
    .to_json()
    .unwrap();
    joined[0].0.handle_frame(&post).await.unwrap();

    let for_ben = drain(&mut joined[1].1);
    let for_cat = drain(&mut joined[2].1);
    match (&for_ben[..], &for_cat[..]) {
        ([ServerEvent::RoomMessage(b)], [ServerEvent::RoomMessage(c)]) => {
            assert_eq!(b.encrypted_content, envelope(2));
            assert_eq!(c.encrypted_content, envelope(3));
            assert_eq!(b.sender, user("ann"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(drain(&mut joined[0].1).is_empty());

    let wrong = ClientEvent::JoinRoom(JoinRoom {
        room_name: "ops".into(),
        password: "guess".into(),
        username: user("eve"),
        public_key: "eve-key".into(),
    })
    .to_json()
    .unwrap();
    let (id, _rx) = relay.open_connection();
    let err = Session::new(relay.clone(), id)
        .handle_frame(&wrong)
        .await
        .unwrap_err();
    assert_eq!(err.client_message(), "incorrect room password");
}
