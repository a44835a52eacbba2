//! Contract reference validation.
//!
//! Checks every record's contract references against the registry: the
//! contract must exist, its id must be well-formed, the "implements" chain
//! through owning modules must be acyclic, and top-tier modules must carry at
//! least one reference. Everything is a warning by default; strict mode turns
//! the report into a fatal `ContractReferenceError`.

use crate::core::error::StarmapError;
use crate::core::record::ModuleRecord;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tier 0 is the most critical tier; only it requires contract coverage.
pub const TOP_TIER: u8 = 0;

pub const CONTRACT_ID_PATTERN: &str = r"^[A-Z][A-Z0-9]{1,15}-[0-9]{3,}$";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: String,
    /// Repo-relative path of the owning module.
    pub module: String,
    #[serde(default)]
    pub required_for_top_tier: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractRegistry {
    #[serde(default, rename = "contract")]
    pub contracts: Vec<ContractRecord>,
}

impl ContractRegistry {
    pub fn load(path: &Path) -> Result<ContractRegistry, StarmapError> {
        if !path.exists() {
            return Ok(ContractRegistry::default());
        }
        let content = fs::read_to_string(path).map_err(StarmapError::IoError)?;
        toml::from_str(&content)
            .map_err(|e| StarmapError::ConfigError(format!("contract registry parse: {}", e)))
    }

    pub fn get(&self, id: &str) -> Option<&ContractRecord> {
        self.contracts.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContractIssueKind {
    Missing,
    Malformed,
    Circular,
    TopTierUncovered,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractIssue {
    pub module: String,
    pub contract: Option<String>,
    pub kind: ContractIssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractReport {
    pub checked_refs: usize,
    pub issues: Vec<ContractIssue>,
    pub strict: bool,
}

impl ContractReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_result(self) -> Result<ContractReport, StarmapError> {
        if self.strict && !self.ok() {
            let first = &self.issues[0];
            return Err(StarmapError::ContractReferenceError(format!(
                "{} contract issue(s); first: {}: {}",
                self.issues.len(),
                first.module,
                first.message
            )));
        }
        Ok(self)
    }
}

/// Validate contract references across all records.
pub fn validate_contract_refs(
    records: &[ModuleRecord],
    registry: &ContractRegistry,
    strict: bool,
) -> Result<ContractReport, StarmapError> {
    let id_syntax = Regex::new(CONTRACT_ID_PATTERN)
        .map_err(|e| StarmapError::ConfigError(e.to_string()))?;
    let mut report = ContractReport {
        checked_refs: 0,
        issues: Vec::new(),
        strict,
    };

    for record in records {
        for id in &record.contract_refs {
            report.checked_refs += 1;
            if !id_syntax.is_match(id) {
                report.issues.push(ContractIssue {
                    module: record.path.clone(),
                    contract: Some(id.clone()),
                    kind: ContractIssueKind::Malformed,
                    message: format!("malformed contract id {:?}", id),
                });
                continue;
            }
            if registry.get(id).is_none() {
                report.issues.push(ContractIssue {
                    module: record.path.clone(),
                    contract: Some(id.clone()),
                    kind: ContractIssueKind::Missing,
                    message: format!("contract {:?} not in registry", id),
                });
            }
        }

        if record.tier == TOP_TIER {
            let covered = record.contract_refs.iter().any(|id| {
                registry
                    .get(id)
                    .map(|c| c.required_for_top_tier)
                    .unwrap_or(false)
            });
            if !covered {
                let message = if record.contract_refs.is_empty() {
                    "top-tier module carries no contract reference".to_string()
                } else {
                    "top-tier module references no contract marked required_for_top_tier"
                        .to_string()
                };
                report.issues.push(ContractIssue {
                    module: record.path.clone(),
                    contract: None,
                    kind: ContractIssueKind::TopTierUncovered,
                    message,
                });
            }
        }
    }

    detect_cycles(records, registry, &mut report);
    report.into_result()
}

/// Depth-first walk over the "implements" graph: module -> owning module of
/// each referenced contract. A module repeated on the active path is a cycle.
fn detect_cycles(records: &[ModuleRecord], registry: &ContractRegistry, report: &mut ContractReport) {
    let mut edges: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for record in records {
        let targets = edges.entry(record.path.as_str()).or_default();
        for id in &record.contract_refs {
            if let Some(contract) = registry.get(id) {
                if contract.module != record.path {
                    targets.push(contract.module.as_str());
                }
            }
        }
    }

    let mut settled: FxHashSet<&str> = FxHashSet::default();
    let mut reported: FxHashSet<String> = FxHashSet::default();

    for record in records {
        if settled.contains(record.path.as_str()) {
            continue;
        }
        let mut active: Vec<&str> = Vec::new();
        let mut on_path: FxHashSet<&str> = FxHashSet::default();
        walk(
            record.path.as_str(),
            &edges,
            &mut active,
            &mut on_path,
            &mut settled,
            &mut reported,
            report,
        );
    }
}

fn walk<'a>(
    node: &'a str,
    edges: &FxHashMap<&'a str, Vec<&'a str>>,
    active: &mut Vec<&'a str>,
    on_path: &mut FxHashSet<&'a str>,
    settled: &mut FxHashSet<&'a str>,
    reported: &mut FxHashSet<String>,
    report: &mut ContractReport,
) {
    if settled.contains(node) {
        return;
    }
    if on_path.contains(node) {
        let start = active.iter().position(|n| *n == node).unwrap_or(0);
        let mut cycle: Vec<&str> = active[start..].to_vec();
        cycle.push(node);
        let mut key: Vec<&str> = cycle.clone();
        key.sort();
        let key = key.join(" -> ");
        if reported.insert(key) {
            report.issues.push(ContractIssue {
                module: node.to_string(),
                contract: None,
                kind: ContractIssueKind::Circular,
                message: format!("circular implements chain: {}", cycle.join(" -> ")),
            });
        }
        return;
    }

    active.push(node);
    on_path.insert(node);
    if let Some(targets) = edges.get(node) {
        for &target in targets {
            walk(target, edges, active, on_path, settled, reported, report);
        }
    }
    active.pop();
    on_path.remove(node);
    settled.insert(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(path: &str, tier: u8, refs: &[&str]) -> ModuleRecord {
        ModuleRecord {
            path: path.into(),
            name: path.into(),
            capabilities: vec![],
            dependencies: vec![],
            owner: "team".into(),
            tier,
            categories: vec!["general".into()],
            confidence: BTreeMap::new(),
            suggestions: vec![],
            contract_refs: refs.iter().map(|s| s.to_string()).collect(),
            schema_version: "1.0.0".into(),
            rule_digest: String::new(),
            canon_digest: String::new(),
        }
    }

    fn registry(entries: &[(&str, &str)]) -> ContractRegistry {
        ContractRegistry {
            contracts: entries
                .iter()
                .map(|(id, module)| ContractRecord {
                    id: id.to_string(),
                    module: module.to_string(),
                    required_for_top_tier: true,
                })
                .collect(),
        }
    }

    #[test]
    fn test_clean_fixture_has_zero_issues() {
        let records = vec![
            record("src/a", 1, &["CTR-100"]),
            record("src/b", 1, &["CTR-200"]),
        ];
        let reg = registry(&[("CTR-100", "src/b"), ("CTR-200", "src/c")]);
        let report = validate_contract_refs(&records, &reg, false).unwrap();
        assert!(report.ok());
        assert_eq!(report.checked_refs, 2);
    }

    #[test]
    fn test_malformed_and_cycle_all_flagged() {
        let records = vec![
            record("src/a", 1, &["not-an-id", "CTR-100"]),
            record("src/b", 1, &["CTR-200"]),
        ];
        // a implements CTR-100 owned by b; b implements CTR-200 owned by a.
        let reg = registry(&[("CTR-100", "src/b"), ("CTR-200", "src/a")]);
        let report = validate_contract_refs(&records, &reg, false).unwrap();
        let kinds: Vec<ContractIssueKind> = report.issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&ContractIssueKind::Malformed));
        assert!(kinds.contains(&ContractIssueKind::Circular));
    }

    #[test]
    fn test_top_tier_without_contract_flagged() {
        let records = vec![record("src/a", TOP_TIER, &[])];
        let report = validate_contract_refs(&records, &ContractRegistry::default(), false).unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, ContractIssueKind::TopTierUncovered);
    }

    #[test]
    fn test_strict_mode_is_fatal() {
        let records = vec![record("src/a", TOP_TIER, &[])];
        let err = validate_contract_refs(&records, &ContractRegistry::default(), true).unwrap_err();
        assert!(matches!(err, StarmapError::ContractReferenceError(_)));
    }

    #[test]
    fn test_self_owned_contract_is_not_a_cycle() {
        let records = vec![record("src/a", 1, &["CTR-100"])];
        let reg = registry(&[("CTR-100", "src/a")]);
        let report = validate_contract_refs(&records, &reg, false).unwrap();
        assert!(report.ok());
    }
}
