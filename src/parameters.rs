//! Query parameter specs and the parameter matcher.
//!
//! An entry declares which query parameters make up a bookmark's identity.
//! Matching keeps only those parameters, so two URLs that differ in
//! tracking noise canonicalize to the same bookmark URL.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::canonical;
use crate::error::{BookmarkerError, Result};

/// One declared query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    /// Exact value the parameter must carry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub optional: bool,
}

impl ParameterSpec {
    /// Parse `key`, `key?`, `key=value` or `key?=value`.
    ///
    /// The value runs from the first `=` to the next one; anything after a
    /// second `=` is ignored. A `?` marks the parameter optional when it
    /// trails the key.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split('=');
        let key = parts.next().unwrap_or(raw);
        let value = parts.next().map(str::to_string);

        let (key, optional) = match key.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (key, false),
        };

        if key.is_empty() {
            return Err(BookmarkerError::MalformedParameter(raw.to_string()));
        }

        Ok(Self {
            key: key.to_string(),
            value,
            optional,
        })
    }

    fn admits(&self, actual: &str) -> bool {
        self.value.as_deref().map_or(true, |required| required == actual)
    }
}

impl fmt::Display for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if self.optional {
            write!(f, "?")?;
        }
        if let Some(value) = &self.value {
            write!(f, "={}", value)?;
        }
        Ok(())
    }
}

/// Filter `url` down to the declared parameters.
///
/// Returns `Ok(None)` when a required parameter is missing or a parameter
/// carries a value other than the one required. Otherwise the result is the
/// canonical (query-less) URL with the declared parameters set on it, in
/// declaration order.
pub fn filter_query(url: &Url, specs: &[ParameterSpec]) -> Result<Option<Url>> {
    let base = canonical::canonicalize(url, false);
    let mut filtered = canonical::parse(&base)?;

    let mut selected: Vec<(String, String)> = Vec::new();
    for spec in specs {
        let actual = url
            .query_pairs()
            .find(|(key, _)| key == spec.key.as_str())
            .map(|(_, value)| value.into_owned());

        let Some(value) = actual else {
            if spec.optional {
                continue;
            }
            return Ok(None);
        };

        if !spec.admits(&value) {
            return Ok(None);
        }

        set_pair(&mut selected, &spec.key, value);
    }

    if !selected.is_empty() {
        // A decoded `%3F` in the path can leave a query on the base; keep it.
        let mut pairs: Vec<(String, String)> = filtered.query_pairs().into_owned().collect();
        for (key, value) in selected {
            set_pair(&mut pairs, &key, value);
        }
        filtered.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    Ok(Some(filtered))
}

/// Replace the first pair named `key` and drop later duplicates, or append.
fn set_pair(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    match pairs.iter().position(|(k, _)| k == key) {
        Some(first) => {
            pairs[first].1 = value;
            let mut index = 0;
            pairs.retain(|(k, _)| {
                let keep = index <= first || k != key;
                index += 1;
                keep
            });
        }
        None => pairs.push((key.to_string(), value)),
    }
}
