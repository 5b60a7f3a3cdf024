//! URL canonicalization.
//!
//! The comparison form of a URL is `origin + pathname` (or the full
//! serialization when the query is kept), percent-decoded after the parts
//! have been joined.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{BookmarkerError, Result};

/// Parse a raw URL string.
pub fn parse(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| BookmarkerError::invalid_url(raw, e))
}

/// Canonical string for `url`, with or without its query string.
///
/// Without the query, fragment and query are both dropped.
pub fn canonicalize(url: &Url, include_query: bool) -> String {
    let joined = if include_query {
        url.as_str().to_string()
    } else {
        format!("{}{}", url.origin().ascii_serialization(), url.path())
    };

    decode(&joined)
}

/// Parse `raw` then canonicalize it.
pub fn canonicalize_str(raw: &str, include_query: bool) -> Result<String> {
    parse(raw).map(|url| canonicalize(&url, include_query))
}

/// Percent-decode the whole string. Sequences that decode to invalid
/// UTF-8 leave the input untouched.
pub fn decode(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
