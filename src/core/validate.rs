//! Schema validation harness.
//!
//! Validates every persisted record against the versioned schema: required
//! fields, known category ids, confidence ranges, category-count ceiling,
//! rejected legacy prefixes, and record-path mirroring.
//!
//! Two modes:
//! - non-strict: failures are recorded per record; the previous record on
//!   disk is retained unchanged (no partial write ever happens here — the
//!   validator is read-only).
//! - strict: any failure converts the report into a fatal
//!   `SchemaValidationError`, which aborts the surrounding run before any
//!   write commits.

use crate::core::canon::Canon;
use crate::core::error::StarmapError;
use crate::core::record::{ModuleRecord, SCHEMA_VERSION, compare_versions};
use crate::core::rules::RuleConfig;
use crate::core::store::Store;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub passed: usize,
    pub issues: Vec<ValidationIssue>,
    pub strict: bool,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// Strict-mode escalation: any issue becomes a fatal error.
    pub fn into_result(self) -> Result<ValidationReport, StarmapError> {
        if self.strict && !self.ok() {
            let first = &self.issues[0];
            return Err(StarmapError::SchemaValidationError(format!(
                "{} record(s) failed validation; first: {}: {}",
                self.issues.len(),
                first.path,
                first.message
            )));
        }
        Ok(self)
    }
}

/// Validate one record against the schema. Returns issue messages.
pub fn validate_record(record: &ModuleRecord, canon: &Canon, rules: &RuleConfig) -> Vec<String> {
    let mut issues = Vec::new();

    if record.path.is_empty() {
        issues.push("empty path".to_string());
    }
    if record.name.is_empty() {
        issues.push("empty name".to_string());
    }
    if let Some(prefix) = rules.rejected_prefix_of(&record.path) {
        issues.push(format!("path begins with rejected legacy prefix {:?}", prefix));
    }

    if record.categories.is_empty() {
        issues.push("no categories assigned".to_string());
    }
    if record.categories.len() > rules.ceilings.max_categories_per_module {
        issues.push(format!(
            "{} categories exceeds max_categories_per_module {}",
            record.categories.len(),
            rules.ceilings.max_categories_per_module
        ));
    }
    for id in record.categories.iter().chain(record.suggestions.iter()) {
        if canon.get(id).is_none() {
            issues.push(format!("unknown category id {:?}", id));
        }
    }
    for category in &record.categories {
        if !record.confidence.contains_key(category) {
            issues.push(format!("assigned category {:?} has no confidence entry", category));
        }
    }
    for (id, value) in &record.confidence {
        if !(0.0..=1.0).contains(value) {
            issues.push(format!("confidence for {:?} out of range: {}", id, value));
        }
    }

    if record.schema_version.is_empty()
        || !record
            .schema_version
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
    {
        issues.push(format!(
            "malformed schema version {:?}",
            record.schema_version
        ));
    } else if compare_versions(&record.schema_version, "1.0.0") == Ordering::Less {
        // Newer-than-current is allowed (versions never downgrade); older
        // than the first versioned schema is not.
        issues.push(format!(
            "schema version {:?} predates the versioned schema",
            record.schema_version
        ));
    }

    issues
}

/// Validate every record in the store.
pub fn validate_store(
    store: &Store,
    canon: &Canon,
    rules: &RuleConfig,
    strict: bool,
) -> Result<ValidationReport, StarmapError> {
    let mut report = ValidationReport {
        checked: 0,
        passed: 0,
        issues: Vec::new(),
        strict,
    };

    for file in store.list_record_files()? {
        report.checked += 1;
        let module_path = store.module_path_of(&file).unwrap_or_default();
        let record = match ModuleRecord::load(&file) {
            Ok(r) => r,
            Err(e) => {
                report.issues.push(ValidationIssue {
                    path: module_path,
                    message: format!("unparseable record: {}", e),
                });
                continue;
            }
        };

        let mut issues = validate_record(&record, canon, rules);
        if record.path != module_path {
            issues.push(format!(
                "record path {:?} does not mirror its file location {:?}",
                record.path, module_path
            ));
        }

        if issues.is_empty() {
            report.passed += 1;
        } else {
            for message in issues {
                report.issues.push(ValidationIssue {
                    path: module_path.clone(),
                    message,
                });
            }
        }
    }

    report.into_result()
}
