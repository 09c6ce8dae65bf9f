//! Permissive parsing of response bodies.
//!
//! Kiosk endpoints are not consistent about what they return: some send JSON
//! documents, some a bare number or `true`, a few plain text. [`parse_lenient`]
//! accepts all of these and only fails on text that claims to be JSON but is not.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Longest literal keyword (`-infinity`) checked before JSON classification.
const MAX_KEYWORD_LEN: usize = 9;
/// Integer digits accepted for a bare number.
const MAX_INTEGER_DIGITS: usize = 16;
/// Fraction digits accepted for a bare number.
const MAX_FRACTION_DIGITS: usize = 17;

/// Parses `text` into a JSON value, tolerating non-JSON primitives.
///
/// - `true`, `false` and `null` (any case) become the JSON literals; `undefined`,
///   `NaN`, `Infinity` and `-Infinity` become `Null`.
/// - `"quoted"` text without escapes is unquoted.
/// - Objects, arrays, strings and plain decimal numbers are parsed as JSON, so
///   `42` becomes the number `42`.
/// - Anything else is returned unchanged as a string.
///
/// # Errors
///
/// Returns an error when `text` looks like JSON (starts with `"`, `[` or `{`)
/// but is not valid JSON.
///
/// # Example
///
/// ```
/// use kiosk_client_sdk::serde_helpers::parse_lenient;
/// use serde_json::json;
///
/// assert_eq!(parse_lenient("42")?, json!(42));
/// assert_eq!(parse_lenient("TRUE")?, json!(true));
/// assert_eq!(parse_lenient("out of stock")?, json!("out of stock"));
/// assert!(parse_lenient("{\"total\": ").is_err());
/// # Ok::<(), serde_json::Error>(())
/// ```
pub fn parse_lenient(text: &str) -> serde_json::Result<Value> {
    // A lone `"` opens and closes itself.
    if text == "\"" {
        return Ok(Value::String(String::new()));
    }

    if let Some(inner) = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        && !inner.contains('\\')
    {
        return Ok(Value::String(inner.to_owned()));
    }

    let trimmed = text.trim();
    if trimmed.len() <= MAX_KEYWORD_LEN {
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" | "undefined" | "nan" | "infinity" | "-infinity" => return Ok(Value::Null),
            _ => {}
        }
    }

    if !looks_like_json(trimmed) {
        return Ok(Value::String(text.to_owned()));
    }

    serde_json::from_str(text)
}

/// Deserializes an already parsed body into `T`.
pub fn from_data<T: DeserializeOwned>(data: &Value) -> crate::Result<T> {
    #[cfg(feature = "tracing")]
    tracing::trace!(
        type_name = %std::any::type_name::<T>(),
        json = %data,
        "deserializing response data"
    );

    Ok(T::deserialize(data)?)
}

fn looks_like_json(trimmed: &str) -> bool {
    matches!(trimmed.as_bytes().first(), Some(b'"' | b'[' | b'{')) || is_plain_number(trimmed)
}

/// `-?\d{1,16}(\.\d{1,17})?([Ee][+-]?\d+)?`
fn is_plain_number(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);

    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(at) => s.split_at(at),
        None => (s, ""),
    };

    let (integer, fraction) = match mantissa.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (mantissa, None),
    };

    if !digits_within(integer, MAX_INTEGER_DIGITS) {
        return false;
    }
    if let Some(fraction) = fraction
        && !digits_within(fraction, MAX_FRACTION_DIGITS)
    {
        return false;
    }

    if exponent.is_empty() {
        return true;
    }
    let exponent = exponent.strip_prefix(['e', 'E']).unwrap_or(exponent);
    let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
    digits_within(exponent, usize::MAX)
}

fn digits_within(s: &str, max: usize) -> bool {
    !s.is_empty() && s.len() <= max && s.bytes().all(|b| b.is_ascii_digit())
}
