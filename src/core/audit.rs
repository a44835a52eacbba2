//! Audit reporting: structured before/after diffs and promotion summaries.

use crate::core::error::StarmapError;
use crate::core::output;
use crate::core::store::{Store, write_atomic};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category change for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDiff {
    pub path: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RecordDiff {
    pub fn compute(path: &str, before: &[String], after: &[String]) -> RecordDiff {
        RecordDiff {
            path: path.to_string(),
            before: before.to_vec(),
            after: after.to_vec(),
            added: after.iter().filter(|c| !before.contains(c)).cloned().collect(),
            removed: before.iter().filter(|c| !after.contains(c)).cloned().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Per-module error surfaced in the final report (recoverable class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: String,
    pub dry_run: bool,
    pub processed: usize,
    pub written: usize,
    pub unchanged: usize,
    pub promoted_total: usize,
    pub promotions_per_category: BTreeMap<String, usize>,
    pub diffs: Vec<RecordDiff>,
    pub suggestions: usize,
    pub warnings: Vec<ModuleIssue>,
    pub override_log: Vec<String>,
}

impl RunReport {
    pub fn persist(&self, store: &Store) -> Result<(), StarmapError> {
        let path = store.reports_dir().join(format!("{}.report.json", self.run_id));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StarmapError::ConfigError(e.to_string()))?;
        write_atomic(&path, format!("{}\n", json).as_bytes())
    }

    /// Human-facing summary for the terminal.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let headline = if self.dry_run {
            format!("run {} (dry run)", self.run_id)
        } else {
            format!("run {} [{}]", self.run_id, self.state)
        };
        out.push_str(&format!("{}\n", headline.bold()));
        out.push_str(&format!(
            "  modules: {} processed, {} written, {} unchanged\n",
            self.processed, self.written, self.unchanged
        ));
        out.push_str(&format!(
            "  promotions: {} total, {} suggestion(s) held\n",
            self.promoted_total, self.suggestions
        ));
        for (category, count) in &self.promotions_per_category {
            out.push_str(&format!("    {} {}\n", category.cyan(), count));
        }
        for diff in self.diffs.iter().filter(|d| !d.is_noop()).take(20) {
            out.push_str(&format!(
                "  {} {} -> {}\n",
                diff.path.yellow(),
                diff.before.join(","),
                diff.after.join(",")
            ));
        }
        if !self.warnings.is_empty() {
            let messages: Vec<String> = self
                .warnings
                .iter()
                .map(|w| format!("{}: {}", w.path, w.message))
                .collect();
            out.push_str(&format!(
                "  {} {}\n",
                "warnings:".red(),
                output::clip_list(&messages, 5, 100)
            ));
        }
        for line in &self.override_log {
            out.push_str(&format!("  {} {}\n", "override:".magenta(), line));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_added_removed() {
        let diff = RecordDiff::compute(
            "src/m",
            &["general".into()],
            &["general".into(), "storage".into()],
        );
        assert_eq!(diff.added, vec!["storage"]);
        assert!(diff.removed.is_empty());
        assert!(!diff.is_noop());
    }

    #[test]
    fn test_identical_sets_are_noop() {
        let diff = RecordDiff::compute("src/m", &["a".into()], &["a".into()]);
        assert!(diff.is_noop());
    }
}
