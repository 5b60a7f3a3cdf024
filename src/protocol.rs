//! Request/response messages between the engine and its consumers
//! (popup, options page, CLI `serve`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bookmarks::Bookmarker;
use crate::config::Options;
use crate::error::{BookmarkerError, Result};
use crate::rules::{EntryKey, EntryPath, EntrySummary};
use crate::tabs::{TabId, TabNavigator};

/// A consumer request, tagged by its `action` name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    #[serde(rename = "bookmarks--get-entry-matching")]
    GetEntryMatching { url: String },

    #[serde(rename = "bookmarks--get-bookmarks-and-paths-matching")]
    GetBookmarksAndPathsMatching { url: String, entry: EntryKey },

    #[serde(rename = "bookmarks--add")]
    Add {
        url: String,
        title: String,
        entry: EntryKey,
        path: EntryPath,
        #[serde(default, rename = "tabID", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },

    #[serde(rename = "bookmarks--move", rename_all = "camelCase")]
    Move { bookmark_id: String, path: EntryPath },

    #[serde(rename = "bookmarks--remove", rename_all = "camelCase")]
    Remove { bookmark_id: String },

    #[serde(rename = "bookmarks--get-state")]
    GetState { url: String },

    #[serde(rename = "bookmarks--reprocess-entries")]
    ReprocessEntries,

    #[serde(rename = "tabs--move-to")]
    MoveTo {
        #[serde(rename = "tabID")]
        tab_id: TabId,
        url: String,
    },

    #[serde(rename = "get-options")]
    GetOptions,

    #[serde(rename = "get-default-options")]
    GetDefaultOptions,
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::GetEntryMatching { .. } => "bookmarks--get-entry-matching",
            Request::GetBookmarksAndPathsMatching { .. } => {
                "bookmarks--get-bookmarks-and-paths-matching"
            }
            Request::Add { .. } => "bookmarks--add",
            Request::Move { .. } => "bookmarks--move",
            Request::Remove { .. } => "bookmarks--remove",
            Request::GetState { .. } => "bookmarks--get-state",
            Request::ReprocessEntries => "bookmarks--reprocess-entries",
            Request::MoveTo { .. } => "tabs--move-to",
            Request::GetOptions => "get-options",
            Request::GetDefaultOptions => "get-default-options",
        }
    }
}

/// Reply to a request: `response` echoes the action, then either a
/// `result` or an `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(action: &str, result: Value) -> Self {
        Self {
            response: action.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(action: &str, error: impl ToString) -> Self {
        Self {
            response: action.to_string(),
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Dispatcher {
    bookmarker: Arc<Bookmarker>,
    navigator: Option<Arc<dyn TabNavigator>>,
}

impl Dispatcher {
    pub fn new(bookmarker: Arc<Bookmarker>) -> Self {
        Self {
            bookmarker,
            navigator: None,
        }
    }

    /// Answer `tabs--move-to` through `navigator`. Without one the request
    /// fails as unsupported.
    pub fn with_navigator(mut self, navigator: Arc<dyn TabNavigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Run one request. Failures become error responses.
    pub async fn dispatch(&self, request: Request) -> Response {
        let action = request.action();
        debug!("Dispatching {}", action);

        match self.handle(request).await {
            Ok(result) => Response::ok(action, result),
            Err(e) => {
                warn!("⚠️  {} failed: {}", action, e);
                Response::err(action, e)
            }
        }
    }

    /// Parse and run one JSON-encoded request.
    pub async fn dispatch_json(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => Response::err("invalid-request", e),
        }
    }

    async fn handle(&self, request: Request) -> Result<Value> {
        let bookmarker = &self.bookmarker;

        let result = match request {
            Request::GetEntryMatching { url } => {
                let summary: Option<EntrySummary> =
                    bookmarker.get_entry_matching(&url)?.map(|e| e.summary());
                serde_json::to_value(summary)?
            }
            Request::GetBookmarksAndPathsMatching { url, entry } => {
                let entry = bookmarker.find_entry(entry)?;
                let matches = bookmarker.get_bookmarks_and_paths_matching(&url, &entry).await?;
                serde_json::to_value(matches)?
            }
            Request::Add {
                url,
                title,
                entry,
                path,
                tab_id,
            } => {
                let entry = bookmarker.find_entry(entry)?;
                let created = bookmarker.add(&url, &title, &entry, &path, tab_id).await?;
                serde_json::to_value(created)?
            }
            Request::Move { bookmark_id, path } => {
                let moved = bookmarker.move_bookmark(&bookmark_id, &path).await?;
                serde_json::to_value(moved)?
            }
            Request::Remove { bookmark_id } => {
                bookmarker.remove(&bookmark_id).await?;
                Value::Null
            }
            Request::GetState { url } => {
                serde_json::to_value(bookmarker.get_state_and_title_for(&url).await?)?
            }
            Request::ReprocessEntries => {
                let installed = bookmarker.reprocess_entries().await?;
                json!({ "version": installed.version(), "entries": installed.len() })
            }
            Request::MoveTo { tab_id, url } => {
                let navigator = self
                    .navigator
                    .as_ref()
                    .ok_or_else(|| BookmarkerError::Unsupported("tabs--move-to".to_string()))?;
                navigator.navigate(tab_id, &url).await?;
                Value::Null
            }
            Request::GetOptions => serde_json::to_value(bookmarker.options().await?)?,
            Request::GetDefaultOptions => serde_json::to_value(Options::default())?,
        };

        Ok(result)
    }
}
