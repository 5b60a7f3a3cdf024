//! The bookmarker service: entry lookup, bookmark lookup, indicator state
//! and bookmark mutations, over an installed rule set.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::and_then::{self, Outcome};
use crate::canonical;
use crate::config::{Options, OptionsSource};
use crate::error::{BookmarkerError, Result};
use crate::folders::FolderResolver;
use crate::parameters;
use crate::rules::{self, CompiledEntry, EntryKey, EntryPath, RuleRegistry, RuleSet};
use crate::state::{PathMatch, StateAndTitle};
use crate::store::{BookmarkNode, BookmarkStore, CreateDetails, SearchQuery, StoreEvent};
use crate::tabs::TabId;

pub struct Bookmarker {
    registry: RuleRegistry,
    store: Arc<dyn BookmarkStore>,
    options: Arc<dyn OptionsSource>,
    folders: FolderResolver,
}

impl Bookmarker {
    /// A bookmarker with no rules installed yet; it reports processing
    /// until `reprocess_entries` completes.
    pub fn new(store: Arc<dyn BookmarkStore>, options: Arc<dyn OptionsSource>) -> Self {
        Self {
            registry: RuleRegistry::new(),
            folders: FolderResolver::new(Arc::clone(&store)),
            store,
            options,
        }
    }

    /// Build and compile the initial rule set.
    pub async fn init(
        store: Arc<dyn BookmarkStore>,
        options: Arc<dyn OptionsSource>,
    ) -> Result<Self> {
        let bookmarker = Self::new(store, options);
        bookmarker.reprocess_entries().await?;
        Ok(bookmarker)
    }

    pub fn store(&self) -> &Arc<dyn BookmarkStore> {
        &self.store
    }

    pub fn folders(&self) -> &FolderResolver {
        &self.folders
    }

    /// The currently installed rule set.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.registry.snapshot()
    }

    pub fn is_processing(&self) -> bool {
        self.registry.is_processing()
    }

    pub async fn options(&self) -> Result<Options> {
        self.options.load().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Recompile every entry from the options source and install the result.
    ///
    /// While this runs, lookups see an empty set and the processing flag is
    /// up. On failure the last installed set is put back. Overlapping calls
    /// are allowed; the most recently started successful one wins.
    pub async fn reprocess_entries(&self) -> Result<Arc<RuleSet>> {
        let ticket = self.registry.begin_rebuild();
        info!("🔄 Reprocessing bookmarker entries (rebuild {})", ticket.version());

        let compiled = match self.load_and_compile().await {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!("⚠️  Reprocessing failed, keeping previous entries: {}", e);
                self.registry.abandon(ticket);
                return Err(e);
            }
        };

        let installed = self.registry.install(ticket, compiled);
        info!(
            "✅ Installed {} entries (rule set version {})",
            installed.len(),
            installed.version()
        );
        Ok(installed)
    }

    async fn load_and_compile(&self) -> Result<Vec<CompiledEntry>> {
        let options = self.options.load().await?;
        rules::compile(&options)
    }

    /// The entry governing `url`, if any.
    pub fn get_entry_matching(&self, url: &str) -> Result<Option<Arc<CompiledEntry>>> {
        let parsed = canonical::parse(url)?;
        self.registry.snapshot().resolve(&parsed)
    }

    pub fn find_entry(&self, key: EntryKey) -> Result<Arc<CompiledEntry>> {
        self.registry
            .snapshot()
            .get(key)
            .ok_or(BookmarkerError::UnknownEntry {
                area: key.area,
                entry: key.entry,
            })
    }

    /// Bookmarks stored for `url` under any of `entry`'s paths.
    ///
    /// The URL is filtered by the entry's parameters and run through its
    /// automatic post-processing before the store is searched.
    pub async fn get_bookmarks_and_paths_matching(
        &self,
        url: &str,
        entry: &CompiledEntry,
    ) -> Result<Vec<PathMatch>> {
        let parsed = canonical::parse(url)?;
        let Some(filtered) = parameters::filter_query(&parsed, &entry.parameters)? else {
            return Ok(vec![]);
        };

        let outcome = and_then::apply(entry, Outcome::new(filtered), true)?;
        let search_url = canonical::canonicalize(&outcome.url, true);
        let results = self.store.search(&SearchQuery::url(&search_url)).await?;
        if results.is_empty() {
            return Ok(vec![]);
        }

        let mut folders = Vec::with_capacity(entry.paths.len());
        for path in &entry.paths {
            folders.push(self.folders.find_folder(path).await?);
        }

        let mut matches = Vec::new();
        for bookmark in &results {
            for (path, folder) in entry.paths.iter().zip(&folders) {
                let Some(folder) = folder else { continue };
                if bookmark.parent_id.as_deref() == Some(folder.id.as_str()) {
                    matches.push(PathMatch {
                        bookmark: bookmark.clone(),
                        path: path.clone(),
                    });
                }
            }
        }

        debug!("{} bookmark(s) for {} under entry {}", matches.len(), search_url, entry.key);
        Ok(matches)
    }

    /// Indicator state and tooltip for a page URL.
    pub async fn get_state_and_title_for(&self, url: &str) -> Result<StateAndTitle> {
        let Some(entry) = self.get_entry_matching(url)? else {
            if self.registry.is_processing() {
                return Ok(StateAndTitle::processing());
            }
            return Ok(StateAndTitle::hidden());
        };

        let matches = self.get_bookmarks_and_paths_matching(url, &entry).await?;
        Ok(StateAndTitle::from_matches(&entry.area, &matches, url))
    }

    /// Bookmark `url` under `path`, applying every post-processing step.
    ///
    /// `tab_id` is the tab the request came from, if any. Steps see it in
    /// their context.
    pub async fn add(
        &self,
        url: &str,
        title: &str,
        entry: &CompiledEntry,
        path: &EntryPath,
        tab_id: Option<TabId>,
    ) -> Result<BookmarkNode> {
        let parsed = canonical::parse(url)?;
        let filtered = parameters::filter_query(&parsed, &entry.parameters)?
            .ok_or_else(|| BookmarkerError::EntryMismatch(url.to_string()))?;

        let input = Outcome::new(filtered)
            .with_title(Some(title.to_string()))
            .with_tab(tab_id);
        let outcome = and_then::apply(entry, input, false)?;
        let bookmark_url = canonical::canonicalize(&outcome.url, true);
        let bookmark_title = outcome.title.unwrap_or_else(|| title.to_string());

        let folder = self.folders.find_or_create_folder(path).await?;
        info!("⭐ Adding bookmark {} to {}", bookmark_url, path.display_path());
        self.store
            .create(CreateDetails::bookmark(&folder.id, &bookmark_title, &bookmark_url))
            .await
    }

    /// Move a bookmark into `path`'s folder, creating it if needed.
    pub async fn move_bookmark(&self, bookmark_id: &str, path: &EntryPath) -> Result<BookmarkNode> {
        let folder = self.folders.find_or_create_folder(path).await?;
        info!("📦 Moving bookmark {} to {}", bookmark_id, path.display_path());
        self.store.move_node(bookmark_id, &folder.id).await
    }

    pub async fn remove(&self, bookmark_id: &str) -> Result<()> {
        info!("🗑️  Removing bookmark {}", bookmark_id);
        self.store.remove(bookmark_id).await
    }

    /// Point bookmarks stored for `from` at `to`, when `from`'s area
    /// follows redirects. Returns how many bookmarks were updated.
    pub async fn update_redirect_if_applicable(&self, from: &str, to: &str) -> Result<usize> {
        let Some(entry) = self.get_entry_matching(from)? else {
            return Ok(0);
        };
        if !entry.opts.follow_redirects {
            return Ok(0);
        }

        let matches = self.get_bookmarks_and_paths_matching(from, &entry).await?;
        for found in &matches {
            info!("↪️  Following redirect for {}: {} -> {}", found.bookmark.id, from, to);
            self.store.update_url(&found.bookmark.id, to).await?;
        }
        Ok(matches.len())
    }
}
