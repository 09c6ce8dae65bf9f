//! Socket Channel walkthrough: queue before open, flush, then live traffic.
//!
//! Run with tracing enabled:
//! ```sh
//! WS_URL=ws://localhost:8000/ws/cart RUST_LOG=info,kiosk_client_sdk=debug cargo run --example channel --features ws,tracing
//! ```

use std::time::Duration;

use kiosk_client_sdk::storage::MemoryStorage;
use kiosk_client_sdk::ws::{Channel, ConnectionState, Handlers};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_URL: &str = "ws://localhost:8000/ws/cart";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("WS_URL").unwrap_or_else(|_| DEFAULT_URL.to_owned());

    let storage = MemoryStorage::new();
    storage.set_session_id("demo-till");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handlers = Handlers::new()
        .with_open(|| info!(event = "open"))
        .with_message(move |message| drop(tx.send(message)))
        .with_close(|| warn!(event = "close"));

    let channel = Channel::new(url, handlers, storage.clone());
    let mut state = channel.state_receiver();

    // Nothing is open yet: these are queued and the first one starts connecting.
    channel.send_json(&json!({ "action": "add", "product_id": 17 }))?;
    channel.send_json(&json!({ "action": "add", "product_id": 42 }))?;
    info!(queued = channel.queued(), state = ?channel.state());

    let opened = timeout(Duration::from_secs(5), state.wait_for(|s| s.is_open()))
        .await
        .map(|result| result.map(|_| ()));
    match opened {
        Ok(Ok(())) => info!(queued = channel.queued(), "queue flushed"),
        Ok(Err(e)) => debug!(error = %e),
        Err(_) => {
            warn!(url = %channel.url(), queued = channel.queued(), "not open after 5s");
            return Ok(());
        }
    }

    channel.send_json(&json!({ "action": "summary" }))?;

    let mut count = 0;
    while let Ok(Some(message)) = timeout(Duration::from_secs(5), rx.recv()).await {
        info!(message = %message);
        count += 1;
        if count >= 5 {
            break;
        }
    }
    info!(received = count);

    channel.close();
    let closed = timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .is_ok_and(|result| result.is_ok());
    info!(closed, state = ?channel.state());

    Ok(())
}
