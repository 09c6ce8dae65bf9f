//! Request Client for the kiosk HTTP API.
//!
//! **Feature flag:** `api`
//!
//! A thin layer over [`reqwest`] that binds requests to a base URL, sends JSON,
//! authenticates with the stored access token and parses whatever comes back as
//! leniently as the front end expects.
//!
//! | Concern | Behavior |
//! |---------|----------|
//! | Base URL | `API_BASE_URL`, falling back to `/api` |
//! | Headers | `Content-Type: application/json`, plus `Authorization: JWT <token>` when a token is stored |
//! | Bodies | parsed with [`crate::serde_helpers::parse_lenient`]; failures are logged and yield `Null` |
//! | Status codes | returned as-is, never turned into errors |
//!
//! # Example
//!
//! ```no_run
//! use kiosk_client_sdk::api::{ApiRequest, Client};
//! use kiosk_client_sdk::storage::MemoryStorage;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::from_cookie_header("accessToken=eyJhbGciOi...");
//! let client = Client::from_env(storage)?;
//!
//! let response = client
//!     .execute(&ApiRequest::post("/cart/items", json!({ "product_id": 7 })))
//!     .await?;
//! if response.data().is_null() {
//!     eprintln!("unparsable body: {}", response.body());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod types;

pub use client::{Client, Config};
pub use types::{ApiRequest, ApiResponse};
