//! Toolbar indicator state derived from entry and bookmark lookups.

use serde::{Deserialize, Serialize};

use crate::rules::EntryPath;
use crate::store::BookmarkNode;

pub const PROCESSING_TITLE: &str = "Processing bookmarker entries...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IconState {
    Processing,
    NotBookmarked,
    Bookmarked,
    BookmarkedWithOtherUrl,
}

impl IconState {
    /// Icon resource directory for this state.
    pub fn icon_path(&self) -> &'static str {
        match self {
            IconState::Processing => "res/icons/processing",
            IconState::NotBookmarked => "res/icons/not-favorited",
            IconState::Bookmarked => "res/icons/favorited",
            IconState::BookmarkedWithOtherUrl => "res/icons/favorited-other-url",
        }
    }
}

/// Indicator state and tooltip. A `None` state means hide the indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAndTitle {
    pub state: Option<IconState>,
    pub title: Option<String>,
}

impl StateAndTitle {
    pub fn hidden() -> Self {
        Self {
            state: None,
            title: None,
        }
    }

    pub fn processing() -> Self {
        Self {
            state: Some(IconState::Processing),
            title: Some(PROCESSING_TITLE.to_string()),
        }
    }

    pub fn not_bookmarked(area: &str) -> Self {
        Self {
            state: Some(IconState::NotBookmarked),
            title: Some(format!("Add '{}' bookmark", area)),
        }
    }

    /// State for one or more bookmarks found under an entry's paths.
    ///
    /// Bookmarked if any stored URL equals `current_url`, otherwise
    /// bookmarked with another URL. An empty slice means not bookmarked.
    pub fn from_matches(area: &str, matches: &[PathMatch], current_url: &str) -> Self {
        if matches.is_empty() {
            return Self::not_bookmarked(area);
        }

        let mut state = IconState::BookmarkedWithOtherUrl;
        let mut labels = Vec::with_capacity(matches.len());
        for found in matches {
            if found.bookmark.url.as_deref() == Some(current_url) {
                state = IconState::Bookmarked;
                labels.push(found.path.title.clone());
            } else {
                labels.push(format!("{} (but with another URL)", found.path.title));
            }
        }

        Self {
            state: Some(state),
            title: Some(human_join(&labels)),
        }
    }
}

/// A stored bookmark and the entry path whose folder holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMatch {
    pub bookmark: BookmarkNode,
    pub path: EntryPath,
}

/// "X", "X and Y", "X, Y, and Z".
pub fn human_join(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}
