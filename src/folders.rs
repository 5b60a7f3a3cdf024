//! Folder path resolution against the bookmark store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::error::{BookmarkerError, Result};
use crate::rules::EntryPath;
use crate::store::{BookmarkNode, BookmarkStore, CreateDetails, SearchQuery};

/// Finds, and on demand creates, the folder an `EntryPath` names.
pub struct FolderResolver {
    store: Arc<dyn BookmarkStore>,
    /// One creation lock per root id.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FolderResolver {
    pub fn new(store: Arc<dyn BookmarkStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the folder for `path` without creating anything.
    ///
    /// Candidates are folders titled like the last segment; a candidate
    /// only counts if its ancestors carry the remaining segments in order
    /// and the top-most one sits directly under `path.root`.
    pub async fn find_folder(&self, path: &EntryPath) -> Result<Option<BookmarkNode>> {
        let Some(root) = path.root.as_deref() else {
            return Ok(None);
        };

        let Some(last) = path.segments.last() else {
            return match self.store.get(root).await {
                Ok(folder) => Ok(Some(folder)),
                Err(BookmarkerError::NodeNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            };
        };

        let contenders = self.store.search(&SearchQuery::title(last)).await?;
        for contender in contenders.iter().filter(|c| c.is_folder()) {
            if self.ancestry_matches(contender, path, root).await? {
                debug!("Found folder {} for {}", contender.id, path.display_path());
                return Ok(Some(contender.clone()));
            }
        }

        Ok(None)
    }

    async fn ancestry_matches(
        &self,
        folder: &BookmarkNode,
        path: &EntryPath,
        root: &str,
    ) -> Result<bool> {
        let above = &path.segments[..path.segments.len() - 1];
        let mut parent_id = folder.parent_id.clone();

        for segment in above.iter().rev() {
            let Some(id) = parent_id else {
                return Ok(false);
            };

            let parent = self.store.get(&id).await?;
            if &parent.title != segment {
                return Ok(false);
            }
            parent_id = parent.parent_id;
        }

        Ok(parent_id.as_deref() == Some(root))
    }

    /// Walk `path` from its root, creating each missing segment folder.
    ///
    /// Returns the innermost folder. Calls sharing a root are serialized,
    /// so concurrent callers never create duplicate siblings.
    pub async fn find_or_create_folder(&self, path: &EntryPath) -> Result<BookmarkNode> {
        let root = path
            .root
            .as_deref()
            .ok_or_else(|| BookmarkerError::MissingRoot(path.display_path()))?;

        let lock = self.lock_for(root);
        let _guard = lock.lock().await;

        let mut folder = self.store.get_subtree(root).await?;
        for segment in &path.segments {
            let existing = folder
                .children()
                .iter()
                .find(|child| child.is_folder() && &child.title == segment)
                .cloned();

            folder = match existing {
                Some(child) => child,
                None => {
                    info!("📁 Creating folder '{}' under {}", segment, folder.id);
                    let mut created = self
                        .store
                        .create(CreateDetails::folder(&folder.id, segment))
                        .await?;
                    created.children = Some(vec![]);
                    created
                }
            };
        }

        Ok(folder)
    }

    fn lock_for(&self, root: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(root.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{roots, MemoryStore};

    fn resolver() -> (Arc<MemoryStore>, FolderResolver) {
        let store = Arc::new(MemoryStore::new());
        let resolver = FolderResolver::new(store.clone());
        (store, resolver)
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (store, resolver) = resolver();
        let path = EntryPath::new(roots::TOOLBAR, &["Sites", "Example"]);

        let first = resolver.find_or_create_folder(&path).await.unwrap();
        let second = resolver.find_or_create_folder(&path).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.title, "Example");
        assert_eq!(store.len().await, 7);
    }

    #[tokio::test]
    async fn test_find_after_create() {
        let (_store, resolver) = resolver();
        let path = EntryPath::new(roots::TOOLBAR, &["Sites", "Example"]);

        assert!(resolver.find_folder(&path).await.unwrap().is_none());
        let created = resolver.find_or_create_folder(&path).await.unwrap();
        let found = resolver.find_folder(&path).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_same_name_elsewhere_does_not_match() {
        let (store, resolver) = resolver();
        let menu = store
            .create(CreateDetails::folder(roots::MENU, "Sites"))
            .await
            .unwrap();
        store
            .create(CreateDetails::folder(&menu.id, "Example"))
            .await
            .unwrap();
        let other = store
            .create(CreateDetails::folder(roots::TOOLBAR, "Other"))
            .await
            .unwrap();
        store
            .create(CreateDetails::folder(&other.id, "Example"))
            .await
            .unwrap();

        let path = EntryPath::new(roots::TOOLBAR, &["Sites", "Example"]);
        assert!(resolver.find_folder(&path).await.unwrap().is_none());

        let wanted = EntryPath::new(roots::MENU, &["Sites", "Example"]);
        let found = resolver.find_folder(&wanted).await.unwrap().unwrap();
        assert_eq!(found.parent_id.as_deref(), Some(menu.id.as_str()));
    }

    #[tokio::test]
    async fn test_deeper_folder_with_same_suffix_does_not_match() {
        let (store, resolver) = resolver();
        let outer = store.create(CreateDetails::folder(roots::TOOLBAR, "Outer")).await.unwrap();
        let sites = store.create(CreateDetails::folder(&outer.id, "Sites")).await.unwrap();
        store.create(CreateDetails::folder(&sites.id, "Example")).await.unwrap();

        let path = EntryPath::new(roots::TOOLBAR, &["Sites", "Example"]);
        assert!(resolver.find_folder(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bookmark_with_segment_title_is_skipped() {
        let (store, resolver) = resolver();
        store
            .create(CreateDetails::bookmark(roots::TOOLBAR, "Sites", "https://sites.com/"))
            .await
            .unwrap();

        let path = EntryPath::new(roots::TOOLBAR, &["Sites"]);
        assert!(resolver.find_folder(&path).await.unwrap().is_none());
        let created = resolver.find_or_create_folder(&path).await.unwrap();
        assert!(created.is_folder());
    }

    #[tokio::test]
    async fn test_empty_segments_is_root() {
        let (_store, resolver) = resolver();
        let path = EntryPath::new(roots::MENU, &[]);

        let found = resolver.find_folder(&path).await.unwrap().unwrap();
        assert_eq!(found.id, roots::MENU);
        let created = resolver.find_or_create_folder(&path).await.unwrap();
        assert_eq!(created.id, roots::MENU);
    }

    #[tokio::test]
    async fn test_missing_root() {
        let (_store, resolver) = resolver();
        let mut path = EntryPath::new(roots::MENU, &["A"]);
        path.root = None;

        assert!(resolver.find_folder(&path).await.unwrap().is_none());
        assert!(matches!(
            resolver.find_or_create_folder(&path).await,
            Err(BookmarkerError::MissingRoot(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_creation_has_no_duplicates() {
        let (store, resolver) = resolver();
        let path = EntryPath::new(roots::TOOLBAR, &["Sites", "Example"]);
        let sibling = EntryPath::new(roots::TOOLBAR, &["Sites", "Other"]);

        let (a, b, c) = tokio::join!(
            resolver.find_or_create_folder(&path),
            resolver.find_or_create_folder(&path),
            resolver.find_or_create_folder(&sibling),
        );

        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert!(c.is_ok());
        assert_eq!(store.search(&SearchQuery::title("Sites")).await.unwrap().len(), 1);
    }
}
