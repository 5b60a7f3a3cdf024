//! Persisted options: areas, entries, path prefixes and post-processing steps.
//!
//! This is the raw, user-edited shape. `rules::compile` turns it into the
//! resolved rule set the matcher works on.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{BookmarkerError, Result};

/// Root of a folder-path prefix.
///
/// On the wire this is a string: `""` for no root, `"prefix"` to inherit
/// the enclosing scope's prefix, or a bookmark root id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PrefixRoot {
    #[default]
    None,
    Inherit,
    Explicit(String),
}

impl PrefixRoot {
    const INHERIT: &'static str = "prefix";

    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "" => PrefixRoot::None,
            Self::INHERIT => PrefixRoot::Inherit,
            other => PrefixRoot::Explicit(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            PrefixRoot::None => "",
            PrefixRoot::Inherit => Self::INHERIT,
            PrefixRoot::Explicit(id) => id,
        }
    }
}

impl Serialize for PrefixRoot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for PrefixRoot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|r| PrefixRoot::from_wire(&r)).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Prefix {
    #[serde(default)]
    pub root: PrefixRoot,
    #[serde(default)]
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeneralOptions {
    #[serde(default)]
    pub prefix: Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaOptions {
    /// Rewrite stored bookmark URLs when the page redirects.
    #[serde(default)]
    pub follow_redirects: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Area {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prefix: Prefix,
    #[serde(default)]
    pub opts: AreaOptions,
    #[serde(default)]
    pub entries: Vec<EntryConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryConfig {
    pub regex: String,
    /// `key`, `key?`, `key=value` or `key?=value`.
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub paths: Vec<EntryPathConfig>,
    #[serde(default)]
    pub and_then: Vec<AndThenConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryPathConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub root: PrefixRoot,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndThenConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<AndThenValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndThenValue {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub areas: Vec<Area>,
    #[serde(default)]
    pub general: GeneralOptions,
}

impl Options {
    /// Parse options JSON, normalizing older layouts first.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(raw)?;
        if normalize_legacy(&mut value)? {
            info!("🔧 Normalized options stored in an older layout");
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load options from a JSON file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            debug!("No options file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&raw)
    }

    pub fn entry_count(&self) -> usize {
        self.areas.iter().map(|a| a.entries.len()).sum()
    }
}

/// Bring older option layouts up to the current shape.
///
/// Returns whether anything was rewritten. The caller decides whether to
/// persist the result.
pub fn normalize_legacy(raw: &mut Value) -> Result<bool> {
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| BookmarkerError::Config("options must be a JSON object".to_string()))?;
    let mut changed = false;

    if !obj.contains_key("areas") {
        obj.insert("areas".to_string(), json!([]));
        changed = true;
    }

    // Before areas existed, entries lived at the top level.
    if let Some(entries) = obj.remove("entries") {
        if let Some(areas) = obj.get_mut("areas").and_then(Value::as_array_mut) {
            areas.push(json!({
                "name": null,
                "prefix": {"root": "", "path": []},
                "entries": entries,
            }));
        }
        changed = true;
    }

    if !obj.contains_key("general") {
        obj.insert(
            "general".to_string(),
            json!({"prefix": {"root": "", "path": []}}),
        );
        changed = true;
    }

    let areas = obj
        .get_mut("areas")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| BookmarkerError::Config("`areas` must be an array".to_string()))?;

    for area in areas.iter_mut().filter_map(Value::as_object_mut) {
        if !area.contains_key("opts") {
            area.insert("opts".to_string(), json!({"followRedirects": false}));
            changed = true;
        }

        let Some(entries) = area.get_mut("entries").and_then(Value::as_array_mut) else {
            continue;
        };

        for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
            match entry.get_mut("andThen").and_then(Value::as_array_mut) {
                None => {
                    entry.insert("andThen".to_string(), json!([]));
                    changed = true;
                }
                Some(steps) => {
                    for step in steps.iter_mut().filter_map(Value::as_object_mut) {
                        if let Some(value) = step.remove("value") {
                            step.insert("values".to_string(), json!([{"value": value}]));
                            changed = true;
                        }
                    }
                }
            }
        }
    }

    Ok(changed)
}

/// Where the engine reads its options from on every reprocess.
#[async_trait]
pub trait OptionsSource: Send + Sync {
    async fn load(&self) -> Result<Options>;
}

/// Options read from a JSON file each time they are requested.
pub struct FileOptions {
    path: PathBuf,
}

impl FileOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OptionsSource for FileOptions {
    async fn load(&self) -> Result<Options> {
        Options::load(&self.path).await
    }
}

/// Options held in memory, replaceable at runtime.
#[derive(Default)]
pub struct MemoryOptions {
    options: RwLock<Options>,
}

impl MemoryOptions {
    pub fn new(options: Options) -> Self {
        Self {
            options: RwLock::new(options),
        }
    }

    pub async fn set(&self, options: Options) {
        *self.options.write().await = options;
    }

    pub async fn get(&self) -> Options {
        self.options.read().await.clone()
    }
}

#[async_trait]
impl OptionsSource for MemoryOptions {
    async fn load(&self) -> Result<Options> {
        Ok(self.get().await)
    }
}
