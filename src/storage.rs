//! Client-side credential storage.
//!
//! The front end keeps two values outside of the request and socket helpers: the
//! `accessToken` cookie, used to authenticate HTTP calls, and the `session_id`
//! entry, attached to every outgoing socket message. Neither helper ever writes
//! them; they only read through the [`Storage`] trait.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use secrecy::SecretString;

/// Cookie holding the access token sent as `Authorization: JWT <token>`.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Storage key holding the session identifier attached to socket messages.
pub const SESSION_ID_KEY: &str = "session_id";

/// Read access to the stored credentials.
pub trait Storage: Send + Sync + 'static {
    /// Returns the current access token, if one is stored.
    fn access_token(&self) -> Option<SecretString>;

    /// Returns the current session identifier, if one is stored.
    fn session_id(&self) -> Option<String>;
}

/// Storage with nothing in it. Requests go out unauthenticated and socket
/// messages carry no `session_id`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStorage;

impl Storage for NoStorage {
    fn access_token(&self) -> Option<SecretString> {
        None
    }

    fn session_id(&self) -> Option<String> {
        None
    }
}

/// In-memory key/value storage shared between clones.
///
/// Cloning is cheap and every clone sees the same entries, so the application can
/// keep one handle to log in and out while the clients read through another.
///
/// ```
/// use kiosk_client_sdk::storage::{MemoryStorage, Storage as _};
///
/// let storage = MemoryStorage::from_cookie_header("theme=dark; accessToken=abc.def.ghi");
/// storage.set_session_id("till-4");
///
/// assert!(storage.access_token().is_some());
/// assert_eq!(storage.session_id().as_deref(), Some("till-4"));
/// ```
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the storage from a `Cookie` request header value (`a=1; b=2`).
    ///
    /// Pairs without `=` are skipped. Values are taken verbatim; a pair quoted with
    /// double quotes has the quotes removed.
    #[must_use]
    pub fn from_cookie_header(header: &str) -> Self {
        let storage = Self::new();
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            storage.set(name, value);
        }
        storage
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn set<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn set_access_token<V: Into<String>>(&self, token: V) {
        self.set(ACCESS_TOKEN_COOKIE, token);
    }

    pub fn set_session_id<V: Into<String>>(&self, session_id: V) {
        self.set(SESSION_ID_KEY, session_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Storage for MemoryStorage {
    fn access_token(&self) -> Option<SecretString> {
        self.get(ACCESS_TOKEN_COOKIE)
            .filter(|token| !token.is_empty())
            .map(SecretString::from)
    }

    fn session_id(&self) -> Option<String> {
        self.get(SESSION_ID_KEY).filter(|id| !id.is_empty())
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only; the access token must never reach a log line.
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        f.debug_struct("MemoryStorage").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret as _;

    use super::*;

    #[test]
    fn cookie_header_should_seed_entries() {
        let storage =
            MemoryStorage::from_cookie_header(" lang=fr ; accessToken=\"tok\"; broken; =x; session_id=s1");

        assert_eq!(storage.get("lang").as_deref(), Some("fr"));
        assert_eq!(
            storage.access_token().map(|t| t.expose_secret().to_owned()),
            Some("tok".to_owned())
        );
        assert_eq!(storage.session_id().as_deref(), Some("s1"));
        assert!(storage.get("broken").is_none());
    }

    #[test]
    fn clones_should_share_entries() {
        let storage = MemoryStorage::new();
        let reader = storage.clone();

        assert!(reader.session_id().is_none());
        storage.set_session_id("abc");
        assert_eq!(reader.session_id().as_deref(), Some("abc"));

        storage.remove(SESSION_ID_KEY);
        assert!(reader.session_id().is_none());
    }

    #[test]
    fn empty_values_should_read_as_absent() {
        let storage = MemoryStorage::new();
        storage.set_access_token("");
        storage.set_session_id("");

        assert!(storage.access_token().is_none());
        assert!(storage.session_id().is_none());
    }

    #[test]
    fn debug_should_not_leak_values() {
        let storage = MemoryStorage::new();
        storage.set_access_token("super-secret");

        let debug = format!("{storage:?}");
        assert!(debug.contains(ACCESS_TOKEN_COOKIE));
        assert!(!debug.contains("super-secret"));
    }
}
