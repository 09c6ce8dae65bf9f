#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[cfg(feature = "api")]
pub mod api;
pub mod auth;
pub mod error;
pub mod serde_helpers;
pub mod storage;
#[cfg(feature = "ws")]
pub mod ws;

use serde::Serialize;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable holding the Request Client's base URL.
pub const API_BASE_URL_VAR: &str = "API_BASE_URL";

/// Trait for converting request types to URL query parameters.
///
/// This trait is automatically implemented for all types that implement [`Serialize`].
/// It uses [`serde_html_form`] to serialize the struct fields into a query string.
/// Arrays are serialized as repeated keys (`key=val1&key=val2`).
pub trait ToQueryParams: Serialize {
    /// Converts the value to a URL query string.
    ///
    /// Returns an empty string if no parameters are set, otherwise returns
    /// a string starting with `?` followed by URL-encoded key-value pairs.
    fn query_params(&self) -> String {
        let params = serde_html_form::to_string(self)
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to convert to URL-encoded string {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_html_form::ser::Error = e;
            })
            .unwrap_or_default();

        if params.is_empty() {
            String::new()
        } else {
            format!("?{params}")
        }
    }
}

impl<T: Serialize> ToQueryParams for T {}

#[cfg(feature = "api")]
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request(client: &reqwest::Client, request: reqwest::Request) -> Result<api::ApiResponse> {
    let response = client.execute(request).await?;
    let status = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status.as_u16());

    let headers = response.headers().clone();
    let url = response.url().clone();
    let body = response.text().await?;

    let data = serde_helpers::parse_lenient(&body).unwrap_or_else(|e| {
        #[cfg(feature = "tracing")]
        tracing::error!(
            status = %status,
            url = %url,
            error = %e,
            "Unable to parse response body"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
        serde_json::Value::Null
    });

    Ok(api::ApiResponse {
        data,
        status,
        headers,
        url,
        body,
    })
}
