//! In-process bookmark tree.
//!
//! Seeded with the host's well-known roots and optionally backed by a JSON
//! file holding the whole tree.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{roots, BookmarkNode, BookmarkStore, CreateDetails, NodeType, SearchQuery, StoreEvent};
use crate::error::{BookmarkerError, Result};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct StoredNode {
    id: String,
    parent_id: Option<String>,
    title: String,
    url: Option<String>,
    node_type: NodeType,
    date_added: i64,
    children: Vec<String>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: HashMap<String, StoredNode>,
    /// Insertion order, so searches return nodes in a stable order.
    order: Vec<String>,
}

impl Tree {
    fn seeded() -> Self {
        let mut tree = Tree::default();
        tree.insert(StoredNode {
            id: roots::ROOT.to_string(),
            parent_id: None,
            title: String::new(),
            url: None,
            node_type: NodeType::Folder,
            date_added: Utc::now().timestamp_millis(),
            children: vec![],
        });

        for (id, title) in [
            (roots::MENU, "Bookmarks Menu"),
            (roots::TOOLBAR, "Bookmarks Toolbar"),
            (roots::UNFILED, "Other Bookmarks"),
            (roots::MOBILE, "Mobile Bookmarks"),
        ] {
            tree.attach(roots::ROOT, id, title, None, NodeType::Folder);
        }
        tree
    }

    fn insert(&mut self, node: StoredNode) {
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    fn attach(
        &mut self,
        parent_id: &str,
        id: &str,
        title: &str,
        url: Option<String>,
        node_type: NodeType,
    ) {
        self.insert(StoredNode {
            id: id.to_string(),
            parent_id: Some(parent_id.to_string()),
            title: title.to_string(),
            url,
            node_type,
            date_added: Utc::now().timestamp_millis(),
            children: vec![],
        });
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.children.push(id.to_string());
        }
    }

    fn node(&self, id: &str) -> Result<&StoredNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| BookmarkerError::NodeNotFound(id.to_string()))
    }

    fn folder(&self, id: &str) -> Result<&StoredNode> {
        let node = self.node(id)?;
        if node.node_type != NodeType::Folder {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "node {} is not a folder",
                id
            )));
        }
        Ok(node)
    }

    fn view(&self, node: &StoredNode, with_children: bool) -> BookmarkNode {
        let children = (with_children && node.node_type == NodeType::Folder).then(|| {
            node.children
                .iter()
                .filter_map(|id| self.nodes.get(id))
                .map(|child| self.view(child, true))
                .collect()
        });

        BookmarkNode {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            title: node.title.clone(),
            url: node.url.clone(),
            node_type: node.node_type,
            date_added: Some(node.date_added),
            children,
        }
    }

    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut current = Some(id.to_string());
        while let Some(cursor) = current {
            if cursor == ancestor {
                return true;
            }
            current = self.nodes.get(&cursor).and_then(|n| n.parent_id.clone());
        }
        false
    }

    fn detach(&mut self, id: &str, parent_id: &str) {
        if let Some(parent) = self.nodes.get_mut(parent_id) {
            parent.children.retain(|child| child != id);
        }
    }

    fn load_node(&mut self, node: &BookmarkNode, parent_id: Option<&str>) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "duplicate bookmark id {}",
                node.id
            )));
        }

        self.insert(StoredNode {
            id: node.id.clone(),
            parent_id: parent_id.map(str::to_string),
            title: node.title.clone(),
            url: node.url.clone(),
            node_type: node.node_type,
            date_added: node.date_added.unwrap_or_else(|| Utc::now().timestamp_millis()),
            children: node.children().iter().map(|c| c.id.clone()).collect(),
        });

        for child in node.children() {
            self.load_node(child, Some(&node.id))?;
        }
        Ok(())
    }
}

/// Bookmark store kept entirely in memory.
pub struct MemoryStore {
    tree: RwLock<Tree>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store holding only the well-known roots.
    pub fn new() -> Self {
        Self::with_tree(Tree::seeded())
    }

    fn with_tree(tree: Tree) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tree: RwLock::new(tree),
            events,
        }
    }

    /// Build a store from a serialized tree rooted at `root`.
    pub fn from_tree(root: &BookmarkNode) -> Result<Self> {
        if !root.is_folder() {
            return Err(BookmarkerError::StoreUnavailable(
                "tree root must be a folder".to_string(),
            ));
        }

        let mut tree = Tree::default();
        tree.load_node(root, None)?;
        Ok(Self::with_tree(tree))
    }

    /// The whole tree, starting at the root folder.
    pub async fn to_tree(&self) -> Result<BookmarkNode> {
        self.get_subtree(roots::ROOT).await
    }

    /// Load a tree file; a missing file yields a freshly seeded store.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            debug!("No bookmark file at {:?}, starting empty", path);
            return Ok(Self::new());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let root: BookmarkNode = serde_json::from_str(&raw)?;
        Self::from_tree(&root)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let tree = self.to_tree().await?;
        let content = serde_json::to_string_pretty(&tree)?;
        tokio::fs::write(path, content).await?;
        debug!("Saved bookmark tree to {:?}", path);
        Ok(())
    }

    /// Number of nodes, roots included.
    pub async fn len(&self) -> usize {
        self.tree.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[async_trait]
impl BookmarkStore for MemoryStore {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<BookmarkNode>> {
        let tree = self.tree.read().await;
        let hits = tree
            .order
            .iter()
            .filter_map(|id| tree.nodes.get(id))
            .filter(|node| !roots::is_root(&node.id))
            .filter(|node| query.url.as_ref().map_or(true, |u| node.url.as_ref() == Some(u)))
            .filter(|node| query.title.as_ref().map_or(true, |t| &node.title == t))
            .map(|node| tree.view(node, false))
            .collect();
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<BookmarkNode> {
        let tree = self.tree.read().await;
        let node = tree.node(id)?;
        Ok(tree.view(node, false))
    }

    async fn get_subtree(&self, id: &str) -> Result<BookmarkNode> {
        let tree = self.tree.read().await;
        let node = tree.node(id)?;
        Ok(tree.view(node, true))
    }

    async fn create(&self, details: CreateDetails) -> Result<BookmarkNode> {
        let mut tree = self.tree.write().await;
        tree.folder(&details.parent_id)?;

        if details.node_type == NodeType::Bookmark && details.url.is_none() {
            return Err(BookmarkerError::StoreUnavailable(
                "bookmarks need a URL".to_string(),
            ));
        }

        let id = new_id();
        let url = match details.node_type {
            NodeType::Bookmark => details.url,
            _ => None,
        };
        tree.attach(&details.parent_id, &id, &details.title, url, details.node_type);

        let node = tree.view(tree.node(&id)?, true);
        drop(tree);

        debug!("Created {:?} {} under {}", node.node_type, id, details.parent_id);
        self.emit(StoreEvent::Created {
            id,
            node: node.clone(),
        });
        Ok(node)
    }

    async fn move_node(&self, id: &str, parent_id: &str) -> Result<BookmarkNode> {
        let mut tree = self.tree.write().await;
        if roots::is_root(id) {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "cannot move root {}",
                id
            )));
        }

        tree.folder(parent_id)?;
        let old_parent_id = tree.node(id)?.parent_id.clone().unwrap_or_default();
        if tree.is_ancestor(id, parent_id) {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "cannot move {} into its own subtree",
                id
            )));
        }

        tree.detach(id, &old_parent_id);
        if let Some(parent) = tree.nodes.get_mut(parent_id) {
            parent.children.push(id.to_string());
        }
        if let Some(node) = tree.nodes.get_mut(id) {
            node.parent_id = Some(parent_id.to_string());
        }

        let node = tree.view(tree.node(id)?, false);
        drop(tree);

        self.emit(StoreEvent::Moved {
            id: id.to_string(),
            parent_id: parent_id.to_string(),
            old_parent_id,
        });
        Ok(node)
    }

    async fn update_url(&self, id: &str, url: &str) -> Result<BookmarkNode> {
        let mut tree = self.tree.write().await;
        let node = tree
            .nodes
            .get_mut(id)
            .ok_or_else(|| BookmarkerError::NodeNotFound(id.to_string()))?;
        if node.node_type != NodeType::Bookmark {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "node {} is not a bookmark",
                id
            )));
        }
        node.url = Some(url.to_string());

        let node = tree.view(tree.node(id)?, false);
        drop(tree);

        self.emit(StoreEvent::Changed {
            id: id.to_string(),
            url: node.url.clone(),
        });
        Ok(node)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut tree = self.tree.write().await;
        if roots::is_root(id) {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "cannot remove root {}",
                id
            )));
        }

        let stored = tree.node(id)?;
        if !stored.children.is_empty() {
            return Err(BookmarkerError::StoreUnavailable(format!(
                "folder {} is not empty",
                id
            )));
        }

        let node = tree.view(stored, false);
        let parent_id = node.parent_id.clone().unwrap_or_default();
        tree.detach(id, &parent_id);
        tree.nodes.remove(id);
        tree.order.retain(|other| other != id);
        drop(tree);

        self.emit(StoreEvent::Removed {
            id: id.to_string(),
            parent_id,
            node,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_roots() {
        let store = MemoryStore::new();
        let root = store.to_tree().await.unwrap();
        let ids: Vec<&str> = root.children().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![roots::MENU, roots::TOOLBAR, roots::UNFILED, roots::MOBILE]);
        assert_eq!(store.len().await, 5);
    }

    #[tokio::test]
    async fn test_create_and_search() {
        let store = MemoryStore::new();
        let folder = store
            .create(CreateDetails::folder(roots::TOOLBAR, "Sites"))
            .await
            .unwrap();
        let bookmark = store
            .create(CreateDetails::bookmark(&folder.id, "Example", "https://example.com/"))
            .await
            .unwrap();

        assert_eq!(folder.children, Some(vec![]));
        assert_eq!(bookmark.parent_id.as_deref(), Some(folder.id.as_str()));

        let hits = store.search(&SearchQuery::url("https://example.com/")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, bookmark.id);

        let hits = store.search(&SearchQuery::title("Sites")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_folder());

        assert!(store.search(&SearchQuery::title("Bookmarks Toolbar")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_folder_parent() {
        let store = MemoryStore::new();
        let bookmark = store
            .create(CreateDetails::bookmark(roots::UNFILED, "A", "https://a.com/"))
            .await
            .unwrap();

        let err = store
            .create(CreateDetails::folder(&bookmark.id, "Nested"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookmarkerError::StoreUnavailable(_)));

        let err = store
            .create(CreateDetails::folder("missing", "Nested"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookmarkerError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_move_update_remove_emit_events() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        let bookmark = store
            .create(CreateDetails::bookmark(roots::UNFILED, "A", "https://a.com/"))
            .await
            .unwrap();
        store.move_node(&bookmark.id, roots::MENU).await.unwrap();
        store.update_url(&bookmark.id, "https://b.com/").await.unwrap();
        store.remove(&bookmark.id).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Created { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Moved {
                id: bookmark.id.clone(),
                parent_id: roots::MENU.to_string(),
                old_parent_id: roots::UNFILED.to_string(),
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Changed {
                id: bookmark.id.clone(),
                url: Some("https://b.com/".to_string()),
            }
        );
        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Removed { .. }));

        assert!(matches!(
            store.get(&bookmark.id).await,
            Err(BookmarkerError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_guards_on_roots_and_cycles() {
        let store = MemoryStore::new();
        assert!(store.remove(roots::TOOLBAR).await.is_err());
        assert!(store.move_node(roots::MENU, roots::TOOLBAR).await.is_err());

        let outer = store.create(CreateDetails::folder(roots::MENU, "Outer")).await.unwrap();
        let inner = store.create(CreateDetails::folder(&outer.id, "Inner")).await.unwrap();
        assert!(store.move_node(&outer.id, &inner.id).await.is_err());
        assert!(store.remove(&outer.id).await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmarks.json");

        let store = MemoryStore::new();
        let folder = store.create(CreateDetails::folder(roots::TOOLBAR, "Sites")).await.unwrap();
        store
            .create(CreateDetails::bookmark(&folder.id, "Example", "https://example.com/"))
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let loaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(loaded.len().await, 7);
        let subtree = loaded.get_subtree(&folder.id).await.unwrap();
        assert_eq!(subtree.children()[0].url.as_deref(), Some("https://example.com/"));
        assert_eq!(subtree.parent_id.as_deref(), Some(roots::TOOLBAR));
    }

    #[tokio::test]
    async fn test_load_missing_file_seeds_roots() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("none.json")).await.unwrap();
        assert_eq!(store.len().await, 5);
    }
}
