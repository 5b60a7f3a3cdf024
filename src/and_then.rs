//! Post-processing steps run after an entry matches.
//!
//! Each step rewrites the bookmark URL or title using capture groups.
//! Steps are compiled from their `{type, values}` configuration into typed
//! variants; the set of step kinds is closed.

use regex::{Captures, Regex};
use url::Url;

use crate::canonical;
use crate::config::{AndThenConfig, AndThenValue};
use crate::error::{BookmarkerError, Result};
use crate::rules::CompiledEntry;
use crate::tabs::TabId;

/// Static description of a step kind.
#[derive(Debug, PartialEq, Eq)]
pub struct StepKind {
    pub name: &'static str,
    /// Automatic steps also run during lookups, not only when creating.
    pub automatic: bool,
    /// Number of configured values the step takes.
    pub values: usize,
}

pub const SET_URL: StepKind = StepKind {
    name: "set-url",
    automatic: true,
    values: 1,
};

pub const SET_TITLE: StepKind = StepKind {
    name: "set-title",
    automatic: true,
    values: 2,
};

/// Every step kind that can appear in options.
pub const STEP_KINDS: [&StepKind; 2] = [&SET_URL, &SET_TITLE];

pub fn step_kind(name: &str) -> Option<&'static StepKind> {
    STEP_KINDS.iter().copied().find(|kind| kind.name == name)
}

#[derive(Debug, Clone)]
pub enum AndThenStep {
    /// Replace the URL with `<scheme>://<template>`, filled from the
    /// entry regex's capture groups.
    SetUrl { template: String },
    /// Replace the title with `template`, filled from `pattern`'s capture
    /// groups over the current title.
    SetTitle { pattern: Regex, template: String },
}

impl AndThenStep {
    pub fn compile(config: &AndThenConfig) -> Result<Self> {
        let kind = step_kind(&config.kind)
            .ok_or_else(|| BookmarkerError::UnknownStep(config.kind.clone()))?;

        if config.values.len() < kind.values {
            return Err(BookmarkerError::StepArity {
                step: kind.name.to_string(),
                expected: kind.values,
                actual: config.values.len(),
            });
        }

        let values = &config.values;
        if *kind == SET_URL {
            Ok(AndThenStep::SetUrl {
                template: values[0].value.clone(),
            })
        } else {
            let pattern = Regex::new(&values[0].value)
                .map_err(|e| BookmarkerError::invalid_pattern(&values[0].value, e))?;
            Ok(AndThenStep::SetTitle {
                pattern,
                template: values[1].value.clone(),
            })
        }
    }

    pub fn kind(&self) -> &'static StepKind {
        match self {
            AndThenStep::SetUrl { .. } => &SET_URL,
            AndThenStep::SetTitle { .. } => &SET_TITLE,
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.kind().automatic
    }

    /// The configuration form of this step.
    pub fn to_config(&self) -> AndThenConfig {
        let values = match self {
            AndThenStep::SetUrl { template } => vec![template.clone()],
            AndThenStep::SetTitle { pattern, template } => {
                vec![pattern.as_str().to_string(), template.clone()]
            }
        };

        AndThenConfig {
            kind: self.kind().name.to_string(),
            values: values.into_iter().map(|value| AndThenValue { value }).collect(),
        }
    }

    fn apply(&self, entry: &CompiledEntry, current: &Outcome) -> Result<Change> {
        match self {
            AndThenStep::SetUrl { template } => {
                let target = canonical::canonicalize(&current.url, false);
                let captures = entry.regex.captures(&target).ok_or_else(|| {
                    BookmarkerError::PostProcessing(format!(
                        "entry pattern `{}` does not match `{}`",
                        entry.regex.as_str(),
                        target
                    ))
                })?;

                let raw = format!("{}://{}", current.url.scheme(), fill(template, &captures));
                Ok(Change::Url(canonical::parse(&raw)?))
            }
            AndThenStep::SetTitle { pattern, template } => {
                let Some(title) = current.title.as_deref() else {
                    return Ok(Change::Nothing);
                };

                let captures = pattern.captures(title).ok_or_else(|| {
                    BookmarkerError::PostProcessing(format!(
                        "title pattern `{}` does not match `{}`",
                        pattern.as_str(),
                        title
                    ))
                })?;

                Ok(Change::Title(fill(template, &captures)))
            }
        }
    }
}

enum Change {
    Url(Url),
    Title(String),
    Nothing,
}

/// What the steps work on: the bookmark URL and title, plus the tab the
/// request came from. Lookups run without a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub url: Url,
    pub title: Option<String>,
    pub tab_id: Option<TabId>,
}

impl Outcome {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            title: None,
            tab_id: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_tab(mut self, tab_id: Option<TabId>) -> Self {
        self.tab_id = tab_id;
        self
    }
}

/// Run `entry`'s steps in order over `input`.
///
/// With `automatic_only`, steps that only belong to bookmark creation are
/// skipped. Each step sees the previous step's output.
pub fn apply(entry: &CompiledEntry, input: Outcome, automatic_only: bool) -> Result<Outcome> {
    let mut outcome = input;

    for step in &entry.and_then {
        if automatic_only && !step.is_automatic() {
            continue;
        }

        match step.apply(entry, &outcome)? {
            Change::Url(url) => outcome.url = url,
            Change::Title(title) => outcome.title = Some(title),
            Change::Nothing => {}
        }
    }

    Ok(outcome)
}

/// Substitute `{{i}}` with capture group `i`; unmatched groups become "".
fn fill(template: &str, captures: &Captures<'_>) -> String {
    let mut filled = template.to_string();
    for i in 1..captures.len() {
        let group = captures.get(i).map_or("", |m| m.as_str());
        filled = filled.replace(&format!("{{{{{}}}}}", i), group);
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Area, EntryConfig, Options};
    use crate::rules;

    fn step(kind: &str, values: &[&str]) -> AndThenConfig {
        AndThenConfig {
            kind: kind.to_string(),
            values: values
                .iter()
                .map(|v| AndThenValue { value: v.to_string() })
                .collect(),
        }
    }

    fn entry(regex: &str, steps: Vec<AndThenConfig>) -> CompiledEntry {
        let options = Options {
            areas: vec![Area {
                entries: vec![EntryConfig {
                    regex: regex.to_string(),
                    and_then: steps,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        rules::compile(&options).unwrap().remove(0)
    }

    #[test]
    fn test_set_url_from_captures() {
        let entry = entry(
            r"^https://([a-z]+)\.example\.com/user$",
            vec![step("set-url", &["newhost.com/{{1}}"])],
        );
        let url = Url::parse("https://alice.example.com/user").unwrap();

        let outcome = apply(&entry, Outcome::new(url), false).unwrap();
        assert_eq!(outcome.url.as_str(), "https://newhost.com/alice");
        assert_eq!(outcome.title, None);
    }

    #[test]
    fn test_set_url_mismatch_is_error() {
        let entry = entry(
            r"^https://([a-z]+)\.example\.com/user$",
            vec![step("set-url", &["newhost.com/{{1}}"])],
        );
        let url = Url::parse("https://other.org/user").unwrap();

        let err = apply(&entry, Outcome::new(url), true).unwrap_err();
        assert!(matches!(err, BookmarkerError::PostProcessing(_)));
    }

    #[test]
    fn test_set_title_from_captures() {
        let entry = entry(
            ".*",
            vec![step("set-title", &["^(.*) - (Site)$", "{{2}}: {{1}}"])],
        );
        let url = Url::parse("https://x.com/").unwrap();

        let input = Outcome::new(url).with_title(Some("Video - Site".to_string()));
        let outcome = apply(&entry, input, false).unwrap();
        assert_eq!(outcome.title.as_deref(), Some("Site: Video"));
        assert_eq!(outcome.url.as_str(), "https://x.com/");
    }

    #[test]
    fn test_set_title_without_title_passes_through() {
        let entry = entry(".*", vec![step("set-title", &["^(.*)$", "[{{1}}]"])]);
        let url = Url::parse("https://x.com/").unwrap();

        let outcome = apply(&entry, Outcome::new(url), true).unwrap();
        assert_eq!(outcome.title, None);
    }

    #[test]
    fn test_set_title_mismatch_is_error() {
        let entry = entry(".*", vec![step("set-title", &["^Exact$", "x"])]);
        let url = Url::parse("https://x.com/").unwrap();

        let input = Outcome::new(url).with_title(Some("Other".to_string()));
        let err = apply(&entry, input, false).unwrap_err();
        assert!(matches!(err, BookmarkerError::PostProcessing(_)));
    }

    #[test]
    fn test_steps_chain_in_order() {
        let entry = entry(
            r"^https://([a-z]+)\.example\.com/(.*)$",
            vec![
                step("set-url", &["example.com/{{1}}/{{2}}"]),
                step("set-title", &["^(.*)$", "{{1}} (mirror)"]),
            ],
        );
        let url = Url::parse("https://bob.example.com/notes").unwrap();

        let input = Outcome::new(url).with_title(Some("Notes".to_string()));
        let outcome = apply(&entry, input, false).unwrap();
        assert_eq!(outcome.url.as_str(), "https://example.com/bob/notes");
        assert_eq!(outcome.title.as_deref(), Some("Notes (mirror)"));
    }

    #[test]
    fn test_tab_passes_through_steps() {
        let entry = entry(
            r"^https://([a-z]+)\.example\.com/user$",
            vec![step("set-url", &["newhost.com/{{1}}"])],
        );
        let url = Url::parse("https://carol.example.com/user").unwrap();

        let outcome = apply(&entry, Outcome::new(url).with_tab(Some(7)), false).unwrap();
        assert_eq!(outcome.tab_id, Some(7));
        assert_eq!(outcome.url.as_str(), "https://newhost.com/carol");
    }

    #[test]
    fn test_unmatched_group_fills_empty() {
        let regex = Regex::new("^(a)(b)?$").unwrap();
        let captures = regex.captures("a").unwrap();
        assert_eq!(fill("{{1}}-{{2}}", &captures), "a-");
    }

    #[test]
    fn test_compile_rejects_unknown_and_short_steps() {
        assert!(matches!(
            AndThenStep::compile(&step("open-tab", &[])),
            Err(BookmarkerError::UnknownStep(_))
        ));
        assert!(matches!(
            AndThenStep::compile(&step("set-title", &["(.*)"])),
            Err(BookmarkerError::StepArity { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            AndThenStep::compile(&step("set-title", &["(", "x"])),
            Err(BookmarkerError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_to_config_round_trip() {
        let config = step("set-title", &["^(.*)$", "{{1}}"]);
        let compiled = AndThenStep::compile(&config).unwrap();
        assert_eq!(compiled.to_config(), config);
        assert!(compiled.is_automatic());
    }
}
