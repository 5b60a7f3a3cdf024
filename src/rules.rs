//! Entry rule compilation and resolution.
//!
//! Options are compiled into a `RuleSet` in one top-down pass: the general
//! prefix is resolved first, then each area's prefix against it, then each
//! entry path against its area. Matching never looks at prefixes again.
//!
//! The installed rule set is held by a `RuleRegistry` and replaced by
//! reference on every reprocess, so readers always see a whole set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::and_then::AndThenStep;
use crate::canonical;
use crate::config::{AndThenConfig, Area, AreaOptions, EntryConfig, Options, Prefix, PrefixRoot};
use crate::error::{BookmarkerError, Result};
use crate::parameters::{self, ParameterSpec};

/// Position of an entry in the options: area index, then entry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub area: usize,
    pub entry: usize,
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.area, self.entry)
    }
}

/// A candidate bookmark folder for an entry, with its prefix resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPath {
    pub title: String,
    /// Bookmark root id; `None` when no scope supplied one.
    pub root: Option<String>,
    pub segments: Vec<String>,
    pub is_default: bool,
}

impl EntryPath {
    pub fn new(root: &str, segments: &[&str]) -> Self {
        Self {
            title: segments.last().copied().unwrap_or(root).to_string(),
            root: Some(root.to_string()),
            segments: segments.iter().map(|s| s.to_string()).collect(),
            is_default: false,
        }
    }

    /// `root/seg/seg` for logs and messages.
    pub fn display_path(&self) -> String {
        let mut parts = vec![self.root.as_deref().unwrap_or("<none>")];
        parts.extend(self.segments.iter().map(String::as_str));
        parts.join("/")
    }
}

/// Root and segments after inheritance has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ResolvedPrefix {
    root: Option<String>,
    segments: Vec<String>,
}

impl ResolvedPrefix {
    fn resolve(root: &PrefixRoot, path: &[String], parent: &ResolvedPrefix) -> Self {
        match root {
            PrefixRoot::Inherit => Self {
                root: parent.root.clone(),
                segments: parent.segments.iter().chain(path).cloned().collect(),
            },
            PrefixRoot::None => Self {
                root: None,
                segments: path.to_vec(),
            },
            PrefixRoot::Explicit(id) => Self {
                root: Some(id.clone()),
                segments: path.to_vec(),
            },
        }
    }

    fn from_prefix(prefix: &Prefix, parent: &ResolvedPrefix) -> Self {
        Self::resolve(&prefix.root, &prefix.path, parent)
    }
}

/// A fully resolved matching rule.
#[derive(Debug, Clone)]
pub struct CompiledEntry {
    pub key: EntryKey,
    /// Owning area's name, `""` for unnamed areas.
    pub area: String,
    pub regex: Regex,
    pub parameters: Vec<ParameterSpec>,
    pub paths: Vec<EntryPath>,
    pub opts: AreaOptions,
    pub and_then: Vec<AndThenStep>,
}

impl CompiledEntry {
    /// Filter `url` by this entry's parameters, then test the regex.
    ///
    /// Returns the filtered URL on a match.
    pub fn matches(&self, url: &Url) -> Result<Option<Url>> {
        let Some(filtered) = parameters::filter_query(url, &self.parameters)? else {
            return Ok(None);
        };

        let target = canonical::canonicalize(&filtered, false);
        Ok(self.regex.is_match(&target).then_some(filtered))
    }

    /// First path flagged default.
    pub fn default_path(&self) -> Option<&EntryPath> {
        self.paths.iter().find(|p| p.is_default)
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key,
            area: self.area.clone(),
            regex: self.regex.as_str().to_string(),
            parameters: self.parameters.clone(),
            paths: self.paths.clone(),
            follow_redirects: self.opts.follow_redirects,
            and_then: self.and_then.iter().map(AndThenStep::to_config).collect(),
        }
    }
}

/// Serializable view of a compiled entry for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub key: EntryKey,
    pub area: String,
    pub regex: String,
    pub parameters: Vec<ParameterSpec>,
    pub paths: Vec<EntryPath>,
    pub follow_redirects: bool,
    pub and_then: Vec<AndThenConfig>,
}

/// Compile every entry of every area, in configured order.
///
/// Fails on the first invalid regex, parameter or step.
pub fn compile(options: &Options) -> Result<Vec<CompiledEntry>> {
    let general = ResolvedPrefix::from_prefix(&options.general.prefix, &ResolvedPrefix::default());

    let mut compiled = Vec::with_capacity(options.entry_count());
    for (area_index, area) in options.areas.iter().enumerate() {
        let area_prefix = ResolvedPrefix::from_prefix(&area.prefix, &general);

        for (entry_index, entry) in area.entries.iter().enumerate() {
            let key = EntryKey {
                area: area_index,
                entry: entry_index,
            };
            compiled.push(compile_entry(key, area, &area_prefix, entry)?);
        }
    }

    Ok(compiled)
}

fn compile_entry(
    key: EntryKey,
    area: &Area,
    area_prefix: &ResolvedPrefix,
    entry: &EntryConfig,
) -> Result<CompiledEntry> {
    let regex = Regex::new(&entry.regex)
        .map_err(|e| BookmarkerError::invalid_pattern(&entry.regex, e))?;

    let parameters = entry
        .parameters
        .iter()
        .map(|raw| ParameterSpec::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    let paths: Vec<EntryPath> = entry
        .paths
        .iter()
        .map(|path| {
            let resolved = ResolvedPrefix::resolve(&path.root, &path.path, area_prefix);
            EntryPath {
                title: path.title.clone(),
                root: resolved.root,
                segments: resolved.segments,
                is_default: path.default,
            }
        })
        .collect();

    if paths.iter().filter(|p| p.is_default).count() > 1 {
        warn!("⚠️  Entry {} has more than one default path, using the first", key);
    }

    let and_then = entry
        .and_then
        .iter()
        .map(AndThenStep::compile)
        .collect::<Result<Vec<_>>>()?;

    Ok(CompiledEntry {
        key,
        area: area.name.clone().unwrap_or_default(),
        regex,
        parameters,
        paths,
        opts: area.opts,
        and_then,
    })
}

/// An immutable, versioned set of compiled entries.
#[derive(Debug, Default)]
pub struct RuleSet {
    version: u64,
    entries: Vec<Arc<CompiledEntry>>,
}

impl RuleSet {
    pub fn new(version: u64, entries: Vec<CompiledEntry>) -> Self {
        Self {
            version,
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entries(&self) -> &[Arc<CompiledEntry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: EntryKey) -> Option<Arc<CompiledEntry>> {
        self.entries.iter().find(|e| e.key == key).cloned()
    }

    /// First entry, in area then entry order, that matches `url`.
    pub fn resolve(&self, url: &Url) -> Result<Option<Arc<CompiledEntry>>> {
        for entry in &self.entries {
            if entry.matches(url)?.is_some() {
                debug!("{} matched entry {} ({})", url, entry.key, entry.regex.as_str());
                return Ok(Some(Arc::clone(entry)));
            }
        }

        Ok(None)
    }
}

/// Identifies one rebuild. Later rebuilds carry larger tickets, and the
/// ticket becomes the version of the set it installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RebuildTicket(u64);

impl RebuildTicket {
    pub fn version(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Slots {
    /// What lookups see; empty while a rebuild is pending.
    current: Arc<RuleSet>,
    /// Last set a rebuild completed with.
    installed: Arc<RuleSet>,
    rebuilding: usize,
    settled: bool,
}

/// Holder of the installed rule set and the processing signal.
///
/// Rebuilds may overlap. A rebuild only installs when no later-started
/// rebuild has installed already, and a failed rebuild falls back to the
/// last installed set, never to whatever was visible when it started.
#[derive(Debug)]
pub struct RuleRegistry {
    slots: RwLock<Slots>,
    tickets: AtomicU64,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// An empty registry that reports processing until the first rebuild
    /// finishes.
    pub fn new() -> Self {
        let empty = Arc::new(RuleSet::default());
        Self {
            slots: RwLock::new(Slots {
                current: Arc::clone(&empty),
                installed: empty,
                rebuilding: 0,
                settled: false,
            }),
            tickets: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.read().current)
    }

    pub fn is_processing(&self) -> bool {
        let slots = self.read();
        slots.rebuilding > 0 || !slots.settled
    }

    /// Mark a rebuild in progress and clear the visible set.
    pub fn begin_rebuild(&self) -> RebuildTicket {
        let ticket = RebuildTicket(self.tickets.fetch_add(1, Ordering::SeqCst) + 1);
        let mut slots = self.write();
        slots.rebuilding += 1;
        slots.current = Arc::new(RuleSet::default());
        ticket
    }

    /// Finish a rebuild with freshly compiled entries.
    ///
    /// Returns the set now installed, which is an earlier-finished newer
    /// set when this rebuild was superseded.
    pub fn install(&self, ticket: RebuildTicket, entries: Vec<CompiledEntry>) -> Arc<RuleSet> {
        let mut slots = self.write();
        slots.rebuilding = slots.rebuilding.saturating_sub(1);
        slots.settled = true;

        if ticket.0 > slots.installed.version() {
            let set = Arc::new(RuleSet::new(ticket.0, entries));
            slots.installed = Arc::clone(&set);
            slots.current = Arc::clone(&set);
            return set;
        }

        debug!(
            "Rebuild {} superseded by version {}, discarding",
            ticket.0,
            slots.installed.version()
        );
        if slots.rebuilding == 0 {
            slots.current = Arc::clone(&slots.installed);
        }
        Arc::clone(&slots.installed)
    }

    /// Finish a failed rebuild, falling back to the last installed set.
    pub fn abandon(&self, ticket: RebuildTicket) {
        let mut slots = self.write();
        slots.rebuilding = slots.rebuilding.saturating_sub(1);
        slots.settled = true;
        if slots.rebuilding == 0 {
            slots.current = Arc::clone(&slots.installed);
        }
        debug!(
            "Rebuild {} abandoned, version {} stays installed",
            ticket.0,
            slots.installed.version()
        );
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::config::GeneralOptions;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_constructed_url_resolves_to_its_entry(
            hosts in prop::collection::btree_set("[a-z]{3,8}", 1..6),
            pick in any::<prop::sample::Index>(),
            id in "[0-9]{1,5}",
        ) {
            let hosts: Vec<String> = hosts.into_iter().collect();
            let areas = hosts
                .iter()
                .map(|host| Area {
                    name: Some(host.clone()),
                    entries: vec![EntryConfig {
                        regex: format!(r"^https://{}\.com/item$", host),
                        parameters: vec!["id".to_string()],
                        ..Default::default()
                    }],
                    ..Default::default()
                })
                .collect();
            let options = Options { areas, general: GeneralOptions::default() };
            let set = RuleSet::new(1, compile(&options).unwrap());

            let chosen = pick.index(hosts.len());
            let raw = format!("https://{}.com/item?utm=1&id={}", hosts[chosen], id);
            let hit = set.resolve(&Url::parse(&raw).unwrap()).unwrap().unwrap();

            prop_assert_eq!(hit.key, EntryKey { area: chosen, entry: 0 });
        }
    }
}
