//! Error types for the bookmarker engine.

use thiserror::Error;

/// Result type for bookmarker operations.
pub type Result<T> = std::result::Result<T, BookmarkerError>;

/// Errors raised by rule compilation, matching and bookmark operations.
///
/// A lookup that finds nothing is not an error: those return `None` or an
/// empty list.
#[derive(Debug, Error)]
pub enum BookmarkerError {
    /// An entry or step regex failed to compile.
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A parameter spec string could not be parsed.
    #[error("malformed parameter spec `{0}`")]
    MalformedParameter(String),

    /// A post-processing step type that has no handler.
    #[error("unknown post-processing step `{0}`")]
    UnknownStep(String),

    /// A post-processing step configured with the wrong number of values.
    #[error("post-processing step `{step}` expects {expected} value(s), got {actual}")]
    StepArity {
        step: String,
        expected: usize,
        actual: usize,
    },

    /// Options could not be read or normalized.
    #[error("configuration error: {0}")]
    Config(String),

    /// A URL that does not parse.
    #[error("invalid URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A bookmark was requested for a URL that fails the entry's parameters.
    #[error("URL `{0}` does not satisfy the entry's parameters")]
    EntryMismatch(String),

    /// An entry key that is not part of the installed rule set.
    #[error("no entry at area {area}, index {entry}")]
    UnknownEntry { area: usize, entry: usize },

    /// A path whose root resolved to nothing.
    #[error("path `{0}` has no bookmark root")]
    MissingRoot(String),

    /// A post-processing step failed to match at apply time.
    #[error("post-processing inconsistency: {0}")]
    PostProcessing(String),

    /// The bookmark store rejected or failed a call.
    #[error("bookmark store unavailable: {0}")]
    StoreUnavailable(String),

    /// The bookmark store has no node with this id.
    #[error("bookmark node not found: {0}")]
    NodeNotFound(String),

    /// The host has no handler for this request.
    #[error("not supported by this host: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BookmarkerError {
    /// True for errors that point at bad options rather than runtime state.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BookmarkerError::InvalidPattern { .. }
                | BookmarkerError::MalformedParameter(_)
                | BookmarkerError::UnknownStep(_)
                | BookmarkerError::StepArity { .. }
                | BookmarkerError::Config(_)
        )
    }

    pub(crate) fn invalid_pattern(pattern: &str, source: regex::Error) -> Self {
        BookmarkerError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        }
    }

    pub(crate) fn invalid_url(url: &str, source: url::ParseError) -> Self {
        BookmarkerError::InvalidUrl {
            url: url.to_string(),
            source,
        }
    }
}
