use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use bon::Builder;
use futures::Stream;
use reqwest::{
    Client as ReqwestClient,
    header::{HeaderMap, HeaderValue},
};
use serde_json::Value;
use tokio::sync::watch;
use url::Url;

use super::types::{ApiRequest, ApiResponse};
use crate::storage::Storage;
use crate::{API_BASE_URL_VAR, Result, auth};

/// Base path used when [`API_BASE_URL_VAR`] is unset or empty.
pub const DEFAULT_BASE_URL: &str = "/api";

/// Origin a relative base URL is resolved against.
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Configuration for [`Client`]
#[derive(Clone, Debug, Builder)]
pub struct Config {
    /// Absolute URL, or a path resolved against `origin`. Defaults to the value of
    /// the `API_BASE_URL` environment variable, then to `/api`.
    #[builder(into, default = base_url_from_env())]
    base_url: String,
    /// Origin used when `base_url` is relative.
    #[builder(into, default = DEFAULT_ORIGIN.to_owned())]
    origin: String,
    /// Extra headers sent with every request. These override the built-in defaults.
    #[builder(default)]
    default_headers: HeaderMap,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn resolve_base_url(&self) -> Result<Url> {
        match Url::parse(&self.base_url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(Url::parse(&self.origin)?.join(&self.base_url)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `path` starts with `scheme://`.
fn has_scheme(path: &str) -> bool {
    let Some((scheme, _)) = path.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn base_url_from_env() -> String {
    std::env::var(API_BASE_URL_VAR)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
}

/// HTTP client for the kiosk back end.
///
/// Every request carries `Content-Type: application/json`. When the [`Storage`]
/// holds an access token, `Authorization: JWT <token>` is added right before the
/// request is sent, so logging in or out takes effect on the next call. Bodies are
/// parsed with [`crate::serde_helpers::parse_lenient`]; a body that cannot be
/// parsed is logged and surfaces as `Null` data.
///
/// Non-success statuses are not errors: they come back as an [`ApiResponse`] like
/// any other. Only transport failures are returned as `Err`.
///
/// # Example
///
/// ```no_run
/// use kiosk_client_sdk::api::Client;
/// use kiosk_client_sdk::storage::MemoryStorage;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryStorage::new();
/// let client = Client::new("https://kiosk.local/api", storage.clone())?;
///
/// storage.set_access_token("eyJhbGciOi...");
/// let cart = client.get("/cart").await?;
/// println!("{}: {}", cart.status(), cart.data());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    /// The [`Url`] requests are made relative to.
    base_url: Url,
    client: ReqwestClient,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client for `base_url`, which may be absolute or a path resolved
    /// against [`DEFAULT_ORIGIN`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client fails to build.
    pub fn new<S: Storage>(base_url: &str, storage: S) -> Result<Client> {
        Self::with_config(Config::builder().base_url(base_url).build(), storage)
    }

    /// Creates a client from the environment, see [`Config`].
    pub fn from_env<S: Storage>(storage: S) -> Result<Client> {
        Self::with_config(Config::default(), storage)
    }

    pub fn with_config<S: Storage>(config: Config, storage: S) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("kiosk_client_sdk"));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.extend(config.default_headers.clone());
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url: config.resolve_base_url()?,
                config,
                client,
                storage: Arc::new(storage),
            }),
        })
    }

    /// Returns the resolved base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Joins `path` onto the base URL with a single `/` between them.
    ///
    /// `scheme://` URLs are returned as they are and `//host` URLs take the base
    /// URL's scheme. Anything else, `user:me` included, is a path.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        if path.starts_with("//") {
            return Ok(self.inner.base_url.join(path)?);
        }
        if has_scheme(path) {
            return Ok(Url::parse(path)?);
        }

        let base = self.inner.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// Executes `request` and parses the response body.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), self.url_for(&request.path)?)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }
        let mut http_request = builder.build()?;

        auth::apply(self.inner.storage.as_ref(), http_request.headers_mut())?;

        crate::request(&self.inner.client, http_request).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.execute(&ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.execute(&ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.execute(&ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.execute(&ApiRequest::delete(path)).await
    }

    /// Returns a stream that executes the watched request now and again every time
    /// it changes. The stream ends once the sender side is dropped.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use futures::StreamExt as _;
    /// use kiosk_client_sdk::api::{ApiRequest, Client};
    /// use kiosk_client_sdk::storage::NoStorage;
    /// use tokio::sync::watch;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new("https://kiosk.local/api", NoStorage)?;
    /// let (category, requests) = watch::channel(ApiRequest::get("/products?category=fruit"));
    ///
    /// let mut products = Box::pin(client.refetch_on_change(requests));
    /// let fruit = products.next().await;
    ///
    /// category.send_replace(ApiRequest::get("/products?category=bakery"));
    /// let bakery = products.next().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn refetch_on_change(
        &self,
        mut requests: watch::Receiver<ApiRequest>,
    ) -> impl Stream<Item = Result<ApiResponse>> + '_ {
        stream! {
            loop {
                let request = requests.borrow_and_update().clone();
                yield self.execute(&request).await;

                if requests.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}
