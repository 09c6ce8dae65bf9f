//! Event reactions for a [`super::Channel`].

use std::fmt;

use tokio_tungstenite::tungstenite::Message;

/// Receives the events of a [`super::Channel`].
///
/// Calls are made from the connection task, never while the channel's internal
/// lock is held, so a handler may call back into the channel (for example to
/// `send` from `on_open`).
///
/// # Example
///
/// ```ignore
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_message(&self, message: Message) {
///         println!("{message}");
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync + 'static {
    /// A text or binary frame arrived. It is passed on untouched.
    fn on_message(&self, message: Message);

    /// The socket opened and the pending queue has been flushed.
    fn on_open(&self) {}

    /// The socket closed or failed. The two are not told apart.
    fn on_close(&self) {}
}

type Callback = Box<dyn Fn() + Send + Sync>;
type MessageCallback = Box<dyn Fn(Message) + Send + Sync>;

/// An [`EventHandler`] assembled from optional closures.
///
/// ```
/// use kiosk_client_sdk::ws::Handlers;
///
/// let handlers = Handlers::new()
///     .with_message(|message| println!("scale: {message}"))
///     .with_close(|| eprintln!("scale disconnected"));
/// ```
#[derive(Default)]
pub struct Handlers {
    open: Option<Callback>,
    message: Option<MessageCallback>,
    close: Option<Callback>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_open<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.open = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_message<F: Fn(Message) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_close<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.close = Some(Box::new(f));
        self
    }
}

impl EventHandler for Handlers {
    fn on_message(&self, message: Message) {
        if let Some(f) = &self.message {
            f(message);
        }
    }

    fn on_open(&self) {
        if let Some(f) = &self.open {
            f();
        }
    }

    fn on_close(&self) {
        if let Some(f) = &self.close {
            f();
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("open", &self.open.is_some())
            .field("message", &self.message.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}
