#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use kiosk_client_sdk::storage::{MemoryStorage, NoStorage, SESSION_ID_KEY};
use kiosk_client_sdk::ws::{Channel, ConnectionState, Handlers, Message};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

/// What the mock server observed, tagged with the connection index.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServerEvent {
    Connected(usize),
    Text(usize, String),
    Disconnected(usize),
}

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    /// Frames pushed to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Tells every connection to close gracefully
    kick_tx: broadcast::Sender<()>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (kick_tx, _) = broadcast::channel::<()>(8);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let broadcast_tx = message_tx.clone();
        let kick = kick_tx.clone();

        tokio::spawn(async move {
            let connections = AtomicUsize::new(0);
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let index = connections.fetch_add(1, Ordering::SeqCst);
                let (mut write, mut read) = ws_stream.split();
                let events = events_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();
                let mut kick_rx = kick.subscribe();
                drop(events_tx.send(ServerEvent::Connected(index)));

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(events.send(ServerEvent::Text(index, text.to_string())));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            msg = msg_rx.recv() => {
                                let Ok(text) = msg else { break };
                                if write.send(Message::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            _ = kick_rx.recv() => {
                                drop(write.send(Message::Close(None)).await);
                                break;
                            }
                        }
                    }
                    drop(events.send(ServerEvent::Disconnected(index)));
                });
            }
        });

        Self {
            addr,
            message_tx,
            kick_tx,
            events_rx,
        }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Send a frame to all connected clients.
    fn send(&self, message: &str) {
        drop(self.message_tx.send(message.to_owned()));
    }

    /// Close every open connection from the server side.
    fn kick(&self) {
        drop(self.kick_tx.send(()));
    }

    async fn next_event(&mut self) -> ServerEvent {
        timeout(WAIT, self.events_rx.recv())
            .await
            .expect("timed out waiting for server event")
            .unwrap()
    }

    /// Next text frame from connection `index`, parsed as JSON.
    async fn next_json(&mut self, index: usize) -> Value {
        loop {
            match self.next_event().await {
                ServerEvent::Text(i, text) if i == index => {
                    return serde_json::from_str(&text).unwrap();
                }
                ServerEvent::Connected(_) => {}
                other => panic!("unexpected server event: {other:?}"),
            }
        }
    }

    async fn assert_quiet(&mut self) {
        if let Ok(Some(event)) = timeout(QUIET, self.events_rx.recv()).await {
            panic!("unexpected server event: {event:?}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClientEvent {
    Open,
    Message(String),
    Close,
}

fn recording_handlers() -> (Handlers, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (open, message, close) = (tx.clone(), tx.clone(), tx);

    let handlers = Handlers::new()
        .with_open(move || drop(open.send(ClientEvent::Open)))
        .with_message(move |m| {
            let text = m.to_text().unwrap().to_owned();
            drop(message.send(ClientEvent::Message(text)));
        })
        .with_close(move || drop(close.send(ClientEvent::Close)));

    (handlers, rx)
}

async fn next_client_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for client event")
        .unwrap()
}

async fn assert_client_quiet(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    if let Ok(Some(event)) = timeout(QUIET, rx.recv()).await {
        panic!("unexpected client event: {event:?}");
    }
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

mod queueing {
    use super::*;

    #[tokio::test]
    async fn messages_sent_before_open_should_flush_in_order() {
        let mut server = MockWsServer::start().await;
        let storage = MemoryStorage::new();
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/cart"), handlers, storage.clone());

        storage.set_session_id("s1");
        channel.send(object(json!({ "action": "add", "product_id": 1 })));
        storage.set_session_id("s2");
        channel.send(object(json!({ "action": "add", "product_id": 2 })));
        storage.remove(SESSION_ID_KEY);
        channel.send(object(json!({ "action": "checkout" })));

        assert_eq!(channel.queued(), 3);
        assert!(!channel.is_ready());

        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(channel.queued(), 0);
        assert!(channel.is_ready());
        assert!(channel.state().is_open());

        assert_eq!(server.next_event().await, ServerEvent::Connected(0));
        assert_eq!(
            server.next_json(0).await,
            json!({ "action": "add", "product_id": 1, "session_id": "s1" })
        );
        assert_eq!(
            server.next_json(0).await,
            json!({ "action": "add", "product_id": 2, "session_id": "s2" })
        );
        assert_eq!(server.next_json(0).await, json!({ "action": "checkout" }));
    }

    #[tokio::test]
    async fn send_while_open_should_bypass_queue() {
        let mut server = MockWsServer::start().await;
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/scale"), handlers, NoStorage);

        channel.send_json(&json!({ "seq": 0 })).unwrap();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);

        for seq in 1..=3 {
            channel.send_json(&json!({ "seq": seq })).unwrap();
            assert_eq!(channel.queued(), 0);
        }

        for seq in 0..=3 {
            assert_eq!(server.next_json(0).await, json!({ "seq": seq }));
        }
    }

    #[tokio::test]
    async fn failed_connect_should_keep_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(format!("ws://{addr}/ws"), handlers, NoStorage);

        channel.send_json(&json!({ "action": "tare" })).unwrap();

        assert_eq!(next_client_event(&mut events).await, ClientEvent::Close);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.queued(), 1);
        assert_client_quiet(&mut events).await;
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn connect_should_close_previous_handle() {
        let mut server = MockWsServer::start().await;
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/cards"), handlers, NoStorage);

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_event().await, ServerEvent::Connected(0));

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);

        let mut seen = vec![server.next_event().await, server.next_event().await];
        seen.sort_by_key(|e| format!("{e:?}"));
        assert_eq!(
            seen,
            vec![ServerEvent::Connected(1), ServerEvent::Disconnected(0)]
        );

        // The replaced handle's close is not reported.
        assert_client_quiet(&mut events).await;
        assert!(channel.state().is_open());

        channel.send_json(&json!({ "action": "listen" })).unwrap();
        assert_eq!(server.next_json(1).await, json!({ "action": "listen" }));
    }

    #[tokio::test]
    async fn server_close_should_not_reconnect() {
        let mut server = MockWsServer::start().await;
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/relay"), handlers, NoStorage);
        let mut states = channel.state_receiver();

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_event().await, ServerEvent::Connected(0));

        server.kick();

        assert_eq!(next_client_event(&mut events).await, ClientEvent::Close);
        assert_eq!(server.next_event().await, ServerEvent::Disconnected(0));
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        assert!(!channel.is_ready());
        server.assert_quiet().await;

        // A send is the caller asking again.
        channel.send_json(&json!({ "relay": "open" })).unwrap();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_event().await, ServerEvent::Connected(1));
        assert_eq!(server.next_json(1).await, json!({ "relay": "open" }));
    }

    #[tokio::test]
    async fn close_should_queue_until_reconnect() {
        let mut server = MockWsServer::start().await;
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/cart"), handlers, NoStorage);

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_event().await, ServerEvent::Connected(0));

        channel.close();
        assert_eq!(channel.state(), ConnectionState::Closing);
        channel.send_json(&json!({ "action": "clear" })).unwrap();
        assert_eq!(channel.queued(), 1);

        assert_eq!(next_client_event(&mut events).await, ClientEvent::Close);
        assert_eq!(server.next_event().await, ServerEvent::Disconnected(0));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(channel.queued(), 1);
        server.assert_quiet().await;

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_json(1).await, json!({ "action": "clear" }));
        assert_eq!(channel.queued(), 0);
    }

    #[tokio::test]
    async fn incoming_frames_should_be_forwarded_raw() {
        let mut server = MockWsServer::start().await;
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/scale"), handlers, NoStorage);

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_event().await, ServerEvent::Connected(0));

        server.send("{\"weight\": 120");
        server.send("stable");

        assert_eq!(
            next_client_event(&mut events).await,
            ClientEvent::Message("{\"weight\": 120".to_owned())
        );
        assert_eq!(
            next_client_event(&mut events).await,
            ClientEvent::Message("stable".to_owned())
        );
    }

    #[tokio::test]
    async fn dropping_channel_should_close_socket() {
        let mut server = MockWsServer::start().await;
        let (handlers, mut events) = recording_handlers();
        let channel = Channel::new(server.ws_url("/ws/cards"), handlers, NoStorage);

        channel.connect();
        assert_eq!(next_client_event(&mut events).await, ClientEvent::Open);
        assert_eq!(server.next_event().await, ServerEvent::Connected(0));

        let clone = channel.clone();
        drop(channel);
        assert!(clone.is_ready());
        drop(clone);

        assert_eq!(server.next_event().await, ServerEvent::Disconnected(0));
    }

    #[tokio::test]
    async fn handlers_may_send_from_on_open() {
        let mut server = MockWsServer::start().await;
        let slot: Arc<std::sync::OnceLock<Channel>> = Arc::new(std::sync::OnceLock::new());
        let greeter = Arc::clone(&slot);

        let handlers = Handlers::new().with_open(move || {
            if let Some(channel) = greeter.get() {
                channel.send_json(&json!({ "hello": "kiosk" })).unwrap();
            }
        });
        let channel = Channel::new(server.ws_url("/ws"), handlers, NoStorage);
        slot.set(channel.clone()).unwrap();

        channel.send_json(&json!({ "first": true })).unwrap();

        assert_eq!(server.next_json(0).await, json!({ "first": true }));
        assert_eq!(server.next_json(0).await, json!({ "hello": "kiosk" }));
    }
}
