use regex::Regex;

use crate::and_then::AndThenStep;
use crate::config::Options;
use crate::error::BookmarkerError;
use crate::parameters::ParameterSpec;
use crate::rules::EntryKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub key: EntryKey,
    pub area: String,
    pub message: String,
}

pub struct ValidationReport {
    areas_checked: usize,
    passed: Vec<(EntryKey, String)>,
    errors: Vec<Finding>,
    warnings: Vec<Finding>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            areas_checked: 0,
            passed: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_passed(&mut self, key: EntryKey, area: &str) {
        self.passed.push((key, area.to_string()));
    }

    pub fn add_error(&mut self, key: EntryKey, area: &str, message: impl Into<String>) {
        self.errors.push(Finding {
            key,
            area: area.to_string(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, key: EntryKey, area: &str, message: impl Into<String>) {
        self.warnings.push(Finding {
            key,
            area: area.to_string(),
            message: message.into(),
        });
    }

    pub fn errors(&self) -> &[Finding] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Finding] {
        &self.warnings
    }

    /// No errors; warnings are allowed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn format(&self, detailed: bool) -> String {
        let mut output = String::new();

        output.push_str("\n🔍 Bookmarker Options Validation Report\n");
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

        if detailed && !self.passed.is_empty() {
            output.push_str("✅ Valid Entries:\n");
            for (key, area) in &self.passed {
                output.push_str(&format!("  • {} [{}]\n", key, area));
            }
            output.push('\n');
        }

        if !self.errors.is_empty() {
            output.push_str("❌ Errors:\n");
            for finding in &self.errors {
                output.push_str(&format!("  • {} [{}]\n", finding.key, finding.area));
                if detailed {
                    output.push_str(&format!("    Reason: {}\n", finding.message));
                }
            }
            output.push('\n');
        }

        if !self.warnings.is_empty() {
            output.push_str("⚠️  Warnings:\n");
            for finding in &self.warnings {
                output.push_str(&format!("  • {} [{}]\n", finding.key, finding.area));
                if detailed {
                    output.push_str(&format!("    Reason: {}\n", finding.message));
                }
            }
            output.push('\n');
        }

        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

        let total = self.passed.len() + self.failed_entries();
        output.push_str(&format!(
            "\n📊 Summary: {}/{} entries valid across {} areas, {} warnings\n\n",
            self.passed.len(),
            total,
            self.areas_checked,
            self.warnings.len()
        ));

        output
    }

    fn failed_entries(&self) -> usize {
        let mut keys: Vec<EntryKey> = self.errors.iter().map(|f| f.key).collect();
        keys.dedup();
        keys.len()
    }
}

/// Patterns compile with the `regex` crate, which has no lookaround and no
/// backreferences.
const REGEX_DIALECT: &str = "lookaround and backreferences are not supported";

/// Check every entry without stopping at the first problem.
pub fn validate(options: &Options) -> ValidationReport {
    let mut report = ValidationReport::new();
    report.areas_checked = options.areas.len();

    for (area_index, area) in options.areas.iter().enumerate() {
        let area_name = area.name.as_deref().unwrap_or("(unnamed)");

        for (entry_index, entry) in area.entries.iter().enumerate() {
            let key = EntryKey {
                area: area_index,
                entry: entry_index,
            };
            let errors_before = report.errors.len();

            if let Err(e) = Regex::new(&entry.regex) {
                report.add_error(
                    key,
                    area_name,
                    format!("invalid regex `{}` ({}): {}", entry.regex, REGEX_DIALECT, e),
                );
            }

            for raw in &entry.parameters {
                if let Err(e) = ParameterSpec::parse(raw) {
                    report.add_error(key, area_name, e.to_string());
                }
            }

            for step in &entry.and_then {
                match AndThenStep::compile(step) {
                    Err(e @ BookmarkerError::InvalidPattern { .. }) => {
                        report.add_error(key, area_name, format!("{} ({})", e, REGEX_DIALECT));
                    }
                    Err(e) => report.add_error(key, area_name, e.to_string()),
                    Ok(_) => {}
                }
            }

            if entry.paths.is_empty() {
                report.add_warning(key, area_name, "entry has no paths");
            }

            let defaults = entry.paths.iter().filter(|p| p.default).count();
            if defaults > 1 {
                report.add_warning(
                    key,
                    area_name,
                    format!("{} default paths, the first one is used", defaults),
                );
            }

            if report.errors.len() == errors_before {
                report.add_passed(key, area_name);
            }
        }
    }

    report
}
