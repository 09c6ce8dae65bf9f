use bon::Builder;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::{Result, ToQueryParams as _, serde_helpers};

/// A request to execute against the configured base URL.
///
/// `path` is joined onto the base URL unless it is already an absolute URL.
///
/// ```
/// use kiosk_client_sdk::api::ApiRequest;
/// use reqwest::Method;
/// use serde_json::json;
///
/// let request = ApiRequest::builder()
///     .method(Method::POST)
///     .path("/cart/items")
///     .body(json!({ "product_id": 7, "quantity": 2 }))
///     .build();
///
/// assert_eq!(request.path, "/cart/items");
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Builder)]
pub struct ApiRequest {
    #[builder(default = Method::GET)]
    pub method: Method,
    #[builder(into)]
    pub path: String,
    /// Sent as the JSON request body.
    pub body: Option<Value>,
    /// Added on top of the client's default headers.
    #[builder(default)]
    pub headers: HeaderMap,
}

impl ApiRequest {
    #[must_use]
    pub fn get<P: Into<String>>(path: P) -> Self {
        Self::builder().path(path).build()
    }

    #[must_use]
    pub fn post<P: Into<String>>(path: P, body: Value) -> Self {
        Self::builder()
            .method(Method::POST)
            .path(path)
            .body(body)
            .build()
    }

    #[must_use]
    pub fn put<P: Into<String>>(path: P, body: Value) -> Self {
        Self::builder()
            .method(Method::PUT)
            .path(path)
            .body(body)
            .build()
    }

    #[must_use]
    pub fn delete<P: Into<String>>(path: P) -> Self {
        Self::builder().method(Method::DELETE).path(path).build()
    }

    /// Appends `query`, URL-encoded, to the path.
    #[must_use]
    pub fn with_query<Q: Serialize>(mut self, query: &Q) -> Self {
        let params = query.query_params();
        if let Some(params) = params.strip_prefix('?') {
            self.path.push(if self.path.contains('?') { '&' } else { '?' });
            self.path.push_str(params);
        }
        self
    }
}

/// The outcome of an executed request.
///
/// `data` holds the permissively parsed body; it is `Null` when the body claimed
/// to be JSON but could not be parsed. The rest of the original response (status,
/// headers, final URL and raw body) is always available.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub(crate) data: Value,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) url: Url,
    pub(crate) body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Deserializes the parsed body into `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_helpers::from_data(&self.data)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The raw body text as received.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub fn into_data(self) -> Value {
        self.data
    }
}
