//! Bookmark store interface.
//!
//! The host's bookmark tree is an external, mutable store. The engine only
//! queries it and asks it to create, move, update or remove nodes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Well-known root folder ids.
pub mod roots {
    pub const ROOT: &str = "root________";
    pub const MENU: &str = "menu________";
    pub const TOOLBAR: &str = "toolbar_____";
    pub const UNFILED: &str = "unfiled_____";
    pub const MOBILE: &str = "mobile______";

    pub const ALL: [&str; 5] = [ROOT, MENU, TOOLBAR, UNFILED, MOBILE];

    pub fn is_root(id: &str) -> bool {
        ALL.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Bookmark,
    Folder,
    Separator,
}

/// A folder, bookmark or separator as the store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<i64>,
    /// Only filled by `get_subtree`, and only for folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BookmarkNode>>,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.node_type == NodeType::Folder
    }

    pub fn is_bookmark(&self) -> bool {
        self.node_type == NodeType::Bookmark
    }

    pub fn children(&self) -> &[BookmarkNode] {
        self.children.as_deref().unwrap_or_default()
    }
}

/// Search filter; every field that is set must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SearchQuery {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: None,
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            url: None,
            title: Some(title.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDetails {
    pub parent_id: String,
    pub title: String,
    pub url: Option<String>,
    pub node_type: NodeType,
}

impl CreateDetails {
    pub fn folder(parent_id: &str, title: &str) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            title: title.to_string(),
            url: None,
            node_type: NodeType::Folder,
        }
    }

    pub fn bookmark(parent_id: &str, title: &str, url: &str) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            title: title.to_string(),
            url: Some(url.to_string()),
            node_type: NodeType::Bookmark,
        }
    }
}

/// Change notifications emitted after each successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created {
        id: String,
        node: BookmarkNode,
    },
    Moved {
        id: String,
        parent_id: String,
        old_parent_id: String,
    },
    Changed {
        id: String,
        url: Option<String>,
    },
    Removed {
        id: String,
        parent_id: String,
        node: BookmarkNode,
    },
}

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<BookmarkNode>>;

    /// A single node, without children.
    async fn get(&self, id: &str) -> Result<BookmarkNode>;

    /// A node with its descendants filled in.
    async fn get_subtree(&self, id: &str) -> Result<BookmarkNode>;

    async fn create(&self, details: CreateDetails) -> Result<BookmarkNode>;

    async fn move_node(&self, id: &str, parent_id: &str) -> Result<BookmarkNode>;

    async fn update_url(&self, id: &str, url: &str) -> Result<BookmarkNode>;

    async fn remove(&self, id: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
