//! Active tab tracking and indicator refresh.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bookmarks::Bookmarker;
use crate::canonical;
use crate::error::{BookmarkerError, Result};
use crate::rules::RuleSet;
use crate::state::{IconState, StateAndTitle};
use crate::store::StoreEvent;

pub type TabId = u64;
pub type WindowId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

/// What changed in a tab update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabChange {
    #[serde(default)]
    pub status: Option<TabStatus>,
    #[serde(default)]
    pub url: Option<String>,
}

/// The per-tab indicator the host displays.
#[async_trait]
pub trait Indicator: Send + Sync {
    async fn show(&self, tab: TabId, state: IconState, title: &str) -> Result<()>;

    async fn hide(&self, tab: TabId) -> Result<()>;
}

/// Sends a tab to another page. Hosts without tabs have none.
#[async_trait]
pub trait TabNavigator: Send + Sync {
    async fn navigate(&self, tab: TabId, url: &str) -> Result<()>;
}

/// Keeps the active tab of every window and keeps its indicator current.
pub struct TabTracker {
    bookmarker: Arc<Bookmarker>,
    indicator: Arc<dyn Indicator>,
    active: RwLock<HashMap<WindowId, TabInfo>>,
}

impl TabTracker {
    pub fn new(bookmarker: Arc<Bookmarker>, indicator: Arc<dyn Indicator>) -> Self {
        Self {
            bookmarker,
            indicator,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn bookmarker(&self) -> &Arc<Bookmarker> {
        &self.bookmarker
    }

    pub async fn active_tab(&self, window: WindowId) -> Option<TabInfo> {
        self.active.read().await.get(&window).cloned()
    }

    /// A tab became the active one in its window.
    pub async fn on_activated(&self, tab: TabInfo) -> Result<()> {
        self.active.write().await.insert(tab.window_id, tab.clone());
        self.set_icon_for_tab(tab.id, tab.url.as_deref()).await
    }

    pub async fn on_window_removed(&self, window: WindowId) {
        self.active.write().await.remove(&window);
    }

    /// A tab's status or URL changed.
    ///
    /// On `complete` the indicator is re-derived. On `loading` with a new
    /// URL, the tab title still shows the previous address, so bookmarks
    /// for it are pointed at the new URL when the entry follows redirects.
    pub async fn on_updated(&self, change: &TabChange, tab: TabInfo) -> Result<()> {
        {
            let mut active = self.active.write().await;
            if let Some(current) = active.get_mut(&tab.window_id) {
                if current.id == tab.id {
                    *current = tab.clone();
                }
            }
        }

        match change.status {
            Some(TabStatus::Complete) => self.set_icon_for_tab(tab.id, tab.url.as_deref()).await,
            Some(TabStatus::Loading) => {
                let (Some(to), Some(title)) = (change.url.as_deref(), tab.title.as_deref()) else {
                    return Ok(());
                };
                self.follow_redirect(title, to).await
            }
            None => Ok(()),
        }
    }

    async fn follow_redirect(&self, previous_title: &str, to: &str) -> Result<()> {
        let scheme = canonical::parse(to)?.scheme().to_string();
        let from = format!("{}://{}", scheme, previous_title);
        if from == to {
            return Ok(());
        }

        match self.bookmarker.update_redirect_if_applicable(&from, to).await {
            Ok(0) => Ok(()),
            Ok(updated) => {
                info!("↪️  Redirect {} -> {} updated {} bookmark(s)", from, to, updated);
                Ok(())
            }
            Err(BookmarkerError::InvalidUrl { url, .. }) => {
                debug!("Tab title {} is not an address, no redirect to follow", url);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-derive and push the indicator for one tab.
    pub async fn set_icon_for_tab(&self, tab: TabId, url: Option<&str>) -> Result<()> {
        let Some(url) = url else {
            return Ok(());
        };

        let state = match self.bookmarker.get_state_and_title_for(url).await {
            Ok(state) => state,
            Err(BookmarkerError::InvalidUrl { .. }) => StateAndTitle::hidden(),
            Err(e) => return Err(e),
        };

        match state.state {
            Some(icon) => {
                let title = state.title.as_deref().unwrap_or_default();
                self.indicator.show(tab, icon, title).await
            }
            None => self.indicator.hide(tab).await,
        }
    }

    /// Refresh the indicator of every window's active tab.
    pub async fn set_icon_for_active_tabs(&self) -> Result<()> {
        let tabs: Vec<TabInfo> = self.active.read().await.values().cloned().collect();
        debug!("Refreshing indicator for {} active tab(s)", tabs.len());

        let results = join_all(
            tabs.iter()
                .map(|tab| self.set_icon_for_tab(tab.id, tab.url.as_deref())),
        )
        .await;

        results.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Reprocess entries, then refresh every active tab.
    ///
    /// Tabs are refreshed even when reprocessing fails, since the previous
    /// rules were reinstated.
    pub async fn reprocess_entries(&self) -> Result<Arc<RuleSet>> {
        let result = self.bookmarker.reprocess_entries().await;
        self.set_icon_for_active_tabs().await?;
        result
    }

    /// Refresh active tabs whenever the store reports a change that can
    /// alter their state.
    pub fn watch(self: Arc<Self>, mut events: broadcast::Receiver<StoreEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if refreshes_indicator(&event) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("⚠️  Missed {} bookmark events, refreshing anyway", missed);
                    }
                    Err(RecvError::Closed) => break,
                }

                if let Err(e) = self.set_icon_for_active_tabs().await {
                    warn!("⚠️  Failed to refresh indicators: {}", e);
                }
            }
            debug!("Bookmark event stream closed");
        })
    }
}

fn refreshes_indicator(event: &StoreEvent) -> bool {
    match event {
        StoreEvent::Created { node, .. } => node.is_bookmark(),
        StoreEvent::Moved { .. } | StoreEvent::Removed { .. } => true,
        StoreEvent::Changed { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Area, AreaOptions, EntryConfig, EntryPathConfig, GeneralOptions, MemoryOptions, Options,
        Prefix, PrefixRoot,
    };
    use crate::state::PROCESSING_TITLE;
    use crate::store::{roots, BookmarkStore, CreateDetails, MemoryStore};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Show(TabId, IconState, String),
        Hide(TabId),
    }

    #[derive(Default)]
    struct RecordingIndicator {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingIndicator {
        async fn last(&self) -> Option<Call> {
            self.calls.lock().await.last().cloned()
        }

        async fn count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    #[async_trait]
    impl Indicator for RecordingIndicator {
        async fn show(&self, tab: TabId, state: IconState, title: &str) -> Result<()> {
            self.calls.lock().await.push(Call::Show(tab, state, title.to_string()));
            Ok(())
        }

        async fn hide(&self, tab: TabId) -> Result<()> {
            self.calls.lock().await.push(Call::Hide(tab));
            Ok(())
        }
    }

    fn options() -> Options {
        Options {
            areas: vec![Area {
                name: Some("Videos".to_string()),
                prefix: Prefix {
                    root: PrefixRoot::Explicit(roots::TOOLBAR.to_string()),
                    path: vec!["Videos".to_string()],
                },
                opts: AreaOptions {
                    follow_redirects: true,
                },
                entries: vec![EntryConfig {
                    regex: r"^https://video\.example\.com/watch$".to_string(),
                    parameters: vec!["v".to_string()],
                    paths: vec![EntryPathConfig {
                        title: "Later".to_string(),
                        root: PrefixRoot::Inherit,
                        path: vec!["Later".to_string()],
                        default: true,
                    }],
                    and_then: vec![],
                }],
            }],
            general: GeneralOptions::default(),
        }
    }

    async fn tracker() -> (Arc<Bookmarker>, Arc<RecordingIndicator>, Arc<TabTracker>) {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemoryOptions::new(options()));
        let bookmarker = Arc::new(Bookmarker::init(store, source).await.unwrap());
        let indicator = Arc::new(RecordingIndicator::default());
        let tracker = Arc::new(TabTracker::new(bookmarker.clone(), indicator.clone()));
        (bookmarker, indicator, tracker)
    }

    fn tab(id: TabId, window: WindowId, url: &str, title: &str) -> TabInfo {
        TabInfo {
            id,
            window_id: window,
            url: Some(url.to_string()),
            title: Some(title.to_string()),
        }
    }

    async fn add(bookmarker: &Bookmarker, url: &str) -> String {
        let entry = bookmarker.get_entry_matching(url).unwrap().unwrap();
        let path = entry.default_path().unwrap().clone();
        bookmarker.add(url, "video", &entry, &path, None).await.unwrap().id
    }

    #[tokio::test]
    async fn test_activation_shows_state() {
        let (_bookmarker, indicator, tracker) = tracker().await;

        tracker
            .on_activated(tab(1, 10, "https://video.example.com/watch?v=a", "A"))
            .await
            .unwrap();
        assert_eq!(
            indicator.last().await,
            Some(Call::Show(1, IconState::NotBookmarked, "Add 'Videos' bookmark".to_string()))
        );

        tracker
            .on_activated(tab(2, 10, "https://other.org/", "Other"))
            .await
            .unwrap();
        assert_eq!(indicator.last().await, Some(Call::Hide(2)));
        assert_eq!(tracker.active_tab(10).await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_complete_refreshes_and_loading_does_not() {
        let (bookmarker, indicator, tracker) = tracker().await;
        let url = "https://video.example.com/watch?v=b";
        add(&bookmarker, url).await;

        let loading = TabChange {
            status: Some(TabStatus::Loading),
            url: None,
        };
        tracker.on_updated(&loading, tab(3, 1, url, "B")).await.unwrap();
        assert_eq!(indicator.count().await, 0);

        let complete = TabChange {
            status: Some(TabStatus::Complete),
            url: None,
        };
        tracker.on_updated(&complete, tab(3, 1, url, "B")).await.unwrap();
        assert_eq!(
            indicator.last().await,
            Some(Call::Show(3, IconState::Bookmarked, "Later".to_string()))
        );
    }

    #[tokio::test]
    async fn test_loading_follows_redirect() {
        let (bookmarker, _indicator, tracker) = tracker().await;
        let old = "https://video.example.com/watch?v=old";
        let id = add(&bookmarker, old).await;

        let new = "https://video.example.com/watch?v=new";
        let change = TabChange {
            status: Some(TabStatus::Loading),
            url: Some(new.to_string()),
        };
        // While loading, the host shows the previous address as the title.
        let info = tab(4, 1, new, "video.example.com/watch?v=old");
        tracker.on_updated(&change, info).await.unwrap();

        let stored = bookmarker.store().get(&id).await.unwrap();
        assert_eq!(stored.url.as_deref(), Some(new));
    }

    #[tokio::test]
    async fn test_loading_with_page_title_is_ignored() {
        let (bookmarker, _indicator, tracker) = tracker().await;
        let old = "https://video.example.com/watch?v=old";
        let id = add(&bookmarker, old).await;

        let change = TabChange {
            status: Some(TabStatus::Loading),
            url: Some("https://video.example.com/watch?v=new".to_string()),
        };
        let info = tab(4, 1, old, "A Very Good Video");
        tracker.on_updated(&change, info).await.unwrap();

        let stored = bookmarker.store().get(&id).await.unwrap();
        assert_eq!(stored.url.as_deref(), Some(old));
    }

    #[tokio::test]
    async fn test_watch_refreshes_on_new_bookmark() {
        let (bookmarker, indicator, tracker) = tracker().await;
        let url = "https://video.example.com/watch?v=c";
        tracker.on_activated(tab(5, 2, url, "C")).await.unwrap();

        let handle = tracker.clone().watch(bookmarker.subscribe());
        add(&bookmarker, url).await;

        let expected = Some(Call::Show(5, IconState::Bookmarked, "Later".to_string()));
        let mut seen = false;
        for _ in 0..100 {
            if indicator.last().await == expected {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen);
        handle.abort();
    }

    #[test]
    fn test_folder_creation_does_not_refresh() {
        let folder = crate::store::BookmarkNode {
            id: "f".to_string(),
            parent_id: Some(roots::MENU.to_string()),
            title: "F".to_string(),
            url: None,
            node_type: crate::store::NodeType::Folder,
            date_added: None,
            children: None,
        };
        assert!(!refreshes_indicator(&StoreEvent::Created {
            id: "f".to_string(),
            node: folder,
        }));
        assert!(refreshes_indicator(&StoreEvent::Moved {
            id: "b".to_string(),
            parent_id: roots::MENU.to_string(),
            old_parent_id: roots::TOOLBAR.to_string(),
        }));
    }

    #[tokio::test]
    async fn test_reprocess_refreshes_active_tabs() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemoryOptions::new(options()));
        let bookmarker = Arc::new(Bookmarker::new(store.clone(), source));
        let indicator = Arc::new(RecordingIndicator::default());
        let tracker = TabTracker::new(bookmarker, indicator.clone());

        let url = "https://video.example.com/watch?v=d";
        tracker.on_activated(tab(6, 3, url, "D")).await.unwrap();
        assert_eq!(
            indicator.last().await,
            Some(Call::Show(6, IconState::Processing, PROCESSING_TITLE.to_string()))
        );

        store
            .create(CreateDetails::bookmark(roots::UNFILED, "loose", url))
            .await
            .unwrap();
        let installed = tracker.reprocess_entries().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(
            indicator.last().await,
            Some(Call::Show(6, IconState::NotBookmarked, "Add 'Videos' bookmark".to_string()))
        );
    }
}
