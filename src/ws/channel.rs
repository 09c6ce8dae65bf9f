use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::traits::EventHandler;
use crate::storage::Storage;
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// A client-to-server payload. Always a JSON object.
pub type OutgoingMessage = Map<String, Value>;

/// Field added to every outgoing message when a session identifier is stored.
pub const SESSION_ID_FIELD: &str = "session_id";

/// How long to wait for the close handshake to be written before dropping the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection handle
    Disconnected,
    /// Handle created, socket not open yet
    Connecting,
    /// Socket open, messages are written immediately
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// [`Channel::close`] was called and the socket has not reported closed yet
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

enum Command {
    Send(OutgoingMessage),
    Close,
}

/// The live connection. Owned by the channel; the socket itself is owned by the
/// task that `commands` feeds.
struct Handle {
    id: u64,
    ready: bool,
    closing: bool,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Default)]
struct Shared {
    handle: Option<Handle>,
    queue: VecDeque<OutgoingMessage>,
    next_id: u64,
}

struct Inner {
    url: String,
    handler: Box<dyn EventHandler>,
    storage: Box<dyn Storage>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// A single WebSocket connection that buffers messages until it is open.
///
/// Messages sent while the socket is connecting (or absent) go to a FIFO pending
/// queue; when the socket opens the queue is flushed in order, then
/// [`EventHandler::on_open`] runs. Messages sent while the socket is open are
/// written straight away, behind anything already flushed. Sending with no
/// connection at all also starts one.
///
/// Close and error are the same event: the handle is cleared and
/// [`EventHandler::on_close`] runs. Nothing reconnects on its own; the next
/// [`Channel::send`] or an explicit [`Channel::connect`] does.
///
/// The queue has no size cap. While the server is unreachable it keeps growing.
///
/// Clones share the same connection and queue. Dropping the last clone closes the
/// socket.
///
/// # Example
///
/// ```no_run
/// use kiosk_client_sdk::storage::MemoryStorage;
/// use kiosk_client_sdk::ws::{Channel, Handlers};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryStorage::new();
/// storage.set_session_id("till-4");
///
/// let handlers = Handlers::new().with_message(|message| println!("{message}"));
/// let channel = Channel::new("ws://kiosk.local/ws/scale", handlers, storage);
///
/// // Queued, and opens the connection.
/// channel.send_json(&json!({ "action": "tare" }))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Creates a channel for `url`. Nothing connects until [`Channel::connect`] or
    /// [`Channel::send`] is called.
    pub fn new<U, H, S>(url: U, handler: H, storage: S) -> Self
    where
        U: Into<String>,
        H: EventHandler,
        S: Storage,
    {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                handler: Box::new(handler),
                storage: Box::new(storage),
                shared: Mutex::new(Shared::default()),
                state_tx,
            }),
        }
    }

    /// Opens a new connection, closing the current one first if there is one.
    ///
    /// Events from the replaced connection are ignored from here on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn connect(&self) {
        let mut guard = self.inner.lock();
        open(&self.inner, &mut guard);
    }

    /// Sends `message`, attaching the stored session identifier if there is one.
    ///
    /// Written immediately when the socket is open, queued otherwise. With no
    /// connection at all, queues and calls [`Channel::connect`].
    ///
    /// # Panics
    ///
    /// Panics when it needs to connect outside of a tokio runtime.
    pub fn send(&self, mut message: OutgoingMessage) {
        if let Some(session_id) = self.inner.storage.session_id() {
            message.insert(SESSION_ID_FIELD.to_owned(), Value::String(session_id));
        }

        let mut guard = self.inner.lock();
        let shared = &mut *guard;
        match shared.handle.as_ref() {
            Some(handle) if handle.ready => {
                // The task may have stopped a moment ago; keep the message if so.
                if let Err(mpsc::error::SendError(Command::Send(message))) =
                    handle.commands.send(Command::Send(message))
                {
                    shared.queue.push_back(message);
                }
            }
            Some(_) => shared.queue.push_back(message),
            None => {
                shared.queue.push_back(message);
                open(&self.inner, shared);
            }
        }
    }

    /// Serializes `message` and [`Channel::send`]s it.
    ///
    /// # Errors
    ///
    /// Fails only if `message` does not serialize to a JSON object.
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        match serde_json::to_value(message)? {
            Value::Object(map) => {
                self.send(map);
                Ok(())
            }
            other => Err(Error::validation(format!(
                "outgoing message must be a JSON object, got {other}"
            ))),
        }
    }

    /// Closes the current connection, if any. Messages sent until the socket
    /// reports closed are queued.
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        if let Some(handle) = guard.handle.as_mut() {
            handle.ready = false;
            handle.closing = true;
            _ = handle.commands.send(Command::Close);
            self.inner.set_state(ConnectionState::Closing);
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether messages are currently written immediately.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.lock().handle.as_ref().is_some_and(|h| h.ready)
    }

    /// Number of messages waiting in the pending queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

/// Replaces the handle in `shared` with a fresh one and spawns its task.
fn open(inner: &Arc<Inner>, shared: &mut Shared) {
    if let Some(previous) = shared.handle.take() {
        _ = previous.commands.send(Command::Close);
    }

    shared.next_id = shared.next_id.wrapping_add(1);
    let id = shared.next_id;
    let (commands, commands_rx) = mpsc::unbounded_channel();
    shared.handle = Some(Handle {
        id,
        ready: false,
        closing: false,
        commands,
    });
    inner.set_state(ConnectionState::Connecting);

    #[cfg(feature = "tracing")]
    tracing::debug!(url = %inner.url, id, "Opening WebSocket connection");

    tokio::spawn(run(Arc::downgrade(inner), inner.url.clone(), id, commands_rx));
}

/// Owns one socket from connect to close.
async fn run(
    weak: Weak<Inner>,
    url: String,
    id: u64,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    // Before the socket opens the only command that can arrive is `Close` (or the
    // channel going away), since sends are queued until the handle is ready.
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => Some(result),
        _ = commands.recv() => None,
    };
    let Some(connected) = connected else {
        finish(&weak, id, VecDeque::new(), &mut commands);
        return;
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let error = Error::from(e);
            #[cfg(feature = "tracing")]
            tracing::warn!(%url, "Unable to connect: {error:?}");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;
            finish(&weak, id, VecDeque::new(), &mut commands);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    let Some(mut backlog) = mark_open(&weak, id) else {
        _ = timeout(CLOSE_TIMEOUT, write.close()).await;
        finish(&weak, id, VecDeque::new(), &mut commands);
        return;
    };

    if let Err(e) = flush(&mut write, &mut backlog).await {
        #[cfg(feature = "tracing")]
        tracing::warn!(%url, pending = backlog.len(), "Unable to flush queued messages: {e:?}");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
        finish(&weak, id, backlog, &mut commands);
        return;
    }

    match weak.upgrade() {
        Some(inner) => inner.handler.on_open(),
        None => return,
    }

    let mut unsent = VecDeque::new();
    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "Received WebSocket message");
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.handler.on_message(message);
                }
                Some(Ok(Message::Close(frame))) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%url, ?frame, "Server closed the WebSocket connection");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &frame;
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite.
                }
                Some(Err(e)) => {
                    let error = Error::from(e);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%url, "WebSocket error: {error:?}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                    break;
                }
                None => break,
            },

            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = write_message(&mut write, &message).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%url, "Unable to send message: {e:?}");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        unsent.push_back(message);
                        break;
                    }
                }
                // Closed, replaced, or every channel clone dropped.
                Some(Command::Close) | None => break,
            },
        }
    }

    _ = timeout(CLOSE_TIMEOUT, write.close()).await;

    finish(&weak, id, unsent, &mut commands);
}

/// Marks handle `id` ready and takes the pending queue for flushing.
///
/// Returns `None` when the handle was replaced or closed while connecting.
fn mark_open(weak: &Weak<Inner>, id: u64) -> Option<VecDeque<OutgoingMessage>> {
    let inner = weak.upgrade()?;
    let mut guard = inner.lock();
    let shared = &mut *guard;

    let handle = shared
        .handle
        .as_mut()
        .filter(|h| h.id == id && !h.closing)?;
    handle.ready = true;
    let backlog = std::mem::take(&mut shared.queue);
    drop(guard);

    inner.set_state(ConnectionState::Open {
        since: Instant::now(),
    });

    #[cfg(feature = "tracing")]
    tracing::debug!(url = %inner.url, id, pending = backlog.len(), "WebSocket connection open");

    Some(backlog)
}

/// Runs the close reaction for handle `id` and puts `unsent` messages back,
/// followed by anything still waiting in `commands`.
///
/// The reaction only fires if `id` is still the current handle; events of a
/// replaced handle are dropped, but its unsent messages are not.
fn finish(
    weak: &Weak<Inner>,
    id: u64,
    mut unsent: VecDeque<OutgoingMessage>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    let current = {
        let mut guard = inner.lock();
        let shared = &mut *guard;

        let current = shared.handle.as_ref().is_some_and(|h| h.id == id);
        if current {
            shared.handle = None;
        }

        // With the handle gone from `shared` nothing can reach `commands` any more.
        while let Ok(command) = commands.try_recv() {
            if let Command::Send(message) = command {
                unsent.push_back(message);
            }
        }

        if let Some(handle) = shared.handle.as_ref().filter(|h| h.ready) {
            let mut rejected = VecDeque::new();
            for message in unsent.drain(..) {
                if let Err(mpsc::error::SendError(Command::Send(message))) =
                    handle.commands.send(Command::Send(message))
                {
                    rejected.push_back(message);
                }
            }
            unsent = rejected;
        }

        while let Some(message) = unsent.pop_back() {
            shared.queue.push_front(message);
        }

        current
    };

    if current {
        inner.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %inner.url, id, "WebSocket connection closed");

        inner.handler.on_close();
    }
}

async fn flush(write: &mut WsSink, backlog: &mut VecDeque<OutgoingMessage>) -> Result<()> {
    while let Some(message) = backlog.pop_front() {
        if let Err(e) = write_message(write, &message).await {
            backlog.push_front(message);
            return Err(e);
        }
    }

    Ok(())
}

async fn write_message(write: &mut WsSink, message: &OutgoingMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;

    #[cfg(feature = "tracing")]
    tracing::trace!(%text, "Sending WebSocket text message");

    write.send(Message::Text(text.into())).await?;
    Ok(())
}
