//! Socket Channel: a WebSocket connection with a pending queue.
//!
//! **Feature flag:** `ws`
//!
//! # Architecture
//!
//! - [`Channel`]: one connection handle plus the FIFO queue of messages waiting
//!   for it to open; `connect` / `send` / `close`
//! - [`EventHandler`]: open, message and close reactions; [`Handlers`] builds one
//!   from closures
//!
//! Each connection runs in its own tokio task that owns the socket. The channel
//! talks to it over an unbounded command channel and ignores everything a
//! replaced connection reports.
//!
//! # Example
//!
//! ```no_run
//! use kiosk_client_sdk::storage::NoStorage;
//! use kiosk_client_sdk::ws::{Channel, Handlers};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Channel::new(
//!     "ws://kiosk.local/ws/cards",
//!     Handlers::new()
//!         .with_open(|| println!("card reader online"))
//!         .with_message(|message| println!("card: {message}")),
//!     NoStorage,
//! );
//!
//! channel.connect();
//! channel.send_json(&json!({ "action": "listen" }))?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod traits;

pub use channel::{Channel, ConnectionState, OutgoingMessage, SESSION_ID_FIELD};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
/// WebSocket frame type handed to [`EventHandler::on_message`].
pub use tokio_tungstenite::tungstenite::Message;
