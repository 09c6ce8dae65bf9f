//! Request Client walkthrough against a running kiosk backend.
//!
//! Run with tracing enabled:
//! ```sh
//! API_BASE_URL=http://localhost:8000/api RUST_LOG=info,hyper_util=off,hyper=off,reqwest=off cargo run --example request --features api,tracing
//! ```
//!
//! Pass the browser's cookie header to send the stored token:
//! ```sh
//! COOKIE="accessToken=eyJ...; session_id=till-4" cargo run --example request --features api,tracing
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=request.log RUST_LOG=info cargo run --example request --features api,tracing
//! ```

use std::fs::File;

use futures::StreamExt as _;
use kiosk_client_sdk::api::{ApiRequest, Client};
use kiosk_client_sdk::storage::MemoryStorage;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Debug, Serialize)]
struct ProductQuery<'a> {
    category: &'a str,
    limit: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let storage = std::env::var("COOKIE")
        .map(|header| MemoryStorage::from_cookie_header(&header))
        .unwrap_or_default();
    let client = Client::from_env(storage)?;
    info!(base_url = %client.base_url());

    match client.get("/health").await {
        Ok(response) => info!(
            endpoint = "health",
            status = %response.status(),
            data = %response.data()
        ),
        Err(e) => debug!(endpoint = "health", error = %e),
    }

    let query = ProductQuery {
        category: "bakery",
        limit: 5,
    };
    match client
        .execute(&ApiRequest::get("/products").with_query(&query))
        .await
    {
        Ok(response) => info!(
            endpoint = "products",
            status = %response.status(),
            url = %response.url(),
            data = %response.data()
        ),
        Err(e) => debug!(endpoint = "products", error = %e),
    }

    match client
        .post("/cart/items", json!({ "product_id": 17, "quantity": 2 }))
        .await
    {
        Ok(response) => info!(
            endpoint = "cart_items",
            status = %response.status(),
            success = response.is_success(),
            data = %response.data()
        ),
        Err(e) => debug!(endpoint = "cart_items", error = %e),
    }

    // Refetch whenever the selected category changes.
    let (tx, rx) = watch::channel(ApiRequest::get("/products?category=bakery"));
    let stream = client.refetch_on_change(rx);
    let mut stream = Box::pin(stream);

    let categories = ["dairy", "produce"];
    let mut next = categories.iter();
    while let Some(result) = stream.next().await {
        match result {
            Ok(response) => info!(
                stream = "products",
                url = %response.url(),
                data = %response.data()
            ),
            Err(e) => debug!(stream = "products", error = %e),
        }

        let Some(category) = next.next() else {
            break;
        };
        tx.send_replace(ApiRequest::get(format!("/products?category={category}")));
    }

    Ok(())
}
