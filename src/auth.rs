//! Authorization header handling for the Request Client.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};

use crate::Result;
use crate::storage::Storage;

/// Scheme used by the kiosk back end for bearer tokens.
pub const JWT_SCHEME: &str = "JWT";

/// Returns the `Authorization` header value for `token`, i.e. `JWT <token>`.
///
/// The value is marked sensitive so it is redacted from `Debug` output.
pub fn authorization_value(token: &SecretString) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("{JWT_SCHEME} {}", token.expose_secret()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Adds `Authorization: JWT <token>` to `headers` when `storage` holds an access
/// token. Headers are left untouched otherwise.
pub(crate) fn apply<S: Storage + ?Sized>(storage: &S, headers: &mut HeaderMap) -> Result<()> {
    if let Some(token) = storage.access_token() {
        headers.insert(AUTHORIZATION, authorization_value(&token)?);
    }

    Ok(())
}
