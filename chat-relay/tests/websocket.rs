//! Client ↔ relay over real WebSocket connections.

use chat_client::{ChatClient, ChatEvent, ClientConfig, KeyPair, WsTransport};
use chat_types::{MessageStatus, Username};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use veilchat_relay::config::Config;
use veilchat_relay::http::build_router;
use veilchat_relay::server::ChatRelay;
use veilchat_relay::storage::{IdentityDirectory, MemoryStorage};

const WAIT: Duration = Duration::from_secs(5);

fn user(name: &str) -> Username {
    Username::parse(name).unwrap()
}

struct TestRelay {
    addr: SocketAddr,
    relay: Arc<ChatRelay>,
}

impl TestRelay {
    async fn start(config: Config) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let relay = Arc::new(ChatRelay::with_storage(config, storage));
        let app = build_router(relay.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        Self { addr, relay }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn enroll(&self, name: &str) -> KeyPair {
        let keys = KeyPair::generate().unwrap();
        self.relay
            .directory()
            .register(&user(name), keys.public().as_bytes())
            .await
            .unwrap();
        keys
    }

    async fn client(&self, name: &str, keys: KeyPair) -> ChatClient<WsTransport> {
        let config = ClientConfig::new(&self.url(), user(name), keys);
        let client = ChatClient::new(config, WsTransport::new());
        tokio::time::timeout(WAIT, client.connect())
            .await
            .unwrap()
            .unwrap();
        client
    }
}

/// Skip events until `pick` returns something.
async fn wait_for<T, F>(client: &ChatClient<WsTransport>, mut pick: F) -> T
where
    F: FnMut(ChatEvent) -> Option<T>,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = client.next_event().await.unwrap();
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn live_message_is_delivered_decrypted_and_read() {
    let relay = TestRelay::start(Config::default()).await;
    let alice_keys = relay.enroll("alice").await;
    let bob_keys = relay.enroll("bob").await;
    let (alice_pub, bob_pub) = (*alice_keys.public(), *bob_keys.public());

    let alice = relay.client("alice", alice_keys).await;
    let bob = relay.client("bob", bob_keys).await;
    alice.add_contact(user("bob"), bob_pub).await;
    bob.add_contact(user("alice"), alice_pub).await;

    let id = alice.send_message(&user("bob"), b"hi bob", None).await.unwrap();

    let received = wait_for(&bob, |event| match event {
        ChatEvent::Message(message) => Some(message),
        _ => None,
    })
    .await;
    assert_eq!(received.message_id, id);
    assert_eq!(received.plaintext.as_deref(), Some(&b"hi bob"[..]));
    assert_eq!(received.status, MessageStatus::Delivered);

    let delivered = wait_for(&alice, |event| match event {
        ChatEvent::StatusChanged { status, .. } => Some(status),
        _ => None,
    })
    .await;
    assert_eq!(delivered, MessageStatus::Delivered);

    bob.mark_read(&id).await.unwrap();
    let read = wait_for(&alice, |event| match event {
        ChatEvent::StatusChanged { message_id, status, .. } if message_id == id => Some(status),
        _ => None,
    })
    .await;
    assert_eq!(read, MessageStatus::Read);
}

#[tokio::test]
async fn offline_recipient_receives_queued_message_on_connect() {
    let relay = TestRelay::start(Config::default()).await;
    let alice_keys = relay.enroll("alice").await;
    let bob_keys = relay.enroll("bob").await;
    let (alice_pub, bob_pub) = (*alice_keys.public(), *bob_keys.public());

    let alice = relay.client("alice", alice_keys).await;
    alice.add_contact(user("bob"), bob_pub).await;
    let id = alice
        .send_message(&user("bob"), b"while you were out", Some(60))
        .await
        .unwrap();

    let queued = wait_for(&alice, |event| match event {
        ChatEvent::StatusChanged { status, .. } => Some(status),
        _ => None,
    })
    .await;
    assert_eq!(queued, MessageStatus::Queued);

    let bob = relay.client("bob", bob_keys).await;
    bob.add_contact(user("alice"), alice_pub).await;
    let received = wait_for(&bob, |event| match event {
        ChatEvent::Message(message) => Some(message),
        _ => None,
    })
    .await;

    assert_eq!(received.message_id, id);
    assert_eq!(received.status, MessageStatus::Received);
    assert_eq!(received.timer, Some(60));
    assert_eq!(
        received.plaintext.as_deref(),
        Some(&b"while you were out"[..])
    );
}

#[tokio::test]
async fn unregistered_socket_gets_error_event() {
    let relay = TestRelay::start(Config::default()).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(relay.url()).await.unwrap();

    socket
        .send(Message::Text(
            r#"{"event":"typing","data":{"recipient":"bob"}}"#.into(),
        ))
        .await
        .unwrap();

    let reply = tokio::time::timeout(WAIT, socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        reply.into_text().unwrap(),
        r#"{"event":"error","data":"not registered"}"#
    );
}

#[tokio::test]
async fn idle_socket_is_closed_after_register_timeout() {
    let mut config = Config::default();
    config.limits.register_timeout_secs = 1;
    let relay = TestRelay::start(config).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(relay.url()).await.unwrap();

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;

    assert!(ended.is_ok());
    assert_eq!(relay.relay.total_sessions(), 0);
}
