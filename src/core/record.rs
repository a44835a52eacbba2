//! The canonical module record and the builder that merges fresh
//! classification output with a previous record's preserved fields.
//!
//! Records carry no wall-clock fields: regenerating from unchanged inputs
//! produces byte-identical output. Run timing lives in the ledger.

use crate::core::classify::Classification;
use crate::core::digest::DigestManifest;
use crate::core::discover::DiscoveredModule;
use crate::core::error::StarmapError;
use crate::core::rules::RuleConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub path: String,
    pub name: String,
    pub capabilities: Vec<String>,
    pub dependencies: Vec<String>,
    pub owner: String,
    pub tier: u8,
    pub categories: Vec<String>,
    pub confidence: BTreeMap<String, f64>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub contract_refs: Vec<String>,
    pub schema_version: String,
    pub rule_digest: String,
    pub canon_digest: String,
}

impl ModuleRecord {
    pub fn load(path: &Path) -> Result<ModuleRecord, StarmapError> {
        let content = fs::read_to_string(path).map_err(StarmapError::IoError)?;
        serde_json::from_str(&content)
            .map_err(|e| StarmapError::SchemaValidationError(format!("{}: {}", path.display(), e)))
    }

    /// Canonical serialized form: pretty JSON with a trailing newline.
    /// Field order follows the struct; map keys are sorted (BTreeMap).
    pub fn to_canonical_json(&self) -> Result<String, StarmapError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StarmapError::SchemaValidationError(e.to_string()))?;
        Ok(format!("{}\n", json))
    }
}

/// Compare dotted version strings numerically, segment by segment.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|s| s.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    let len = va.len().max(vb.len());
    for i in 0..len {
        let x = va.get(i).copied().unwrap_or(0);
        let y = vb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Merge classification output with the previous record.
///
/// Preserved fields (owner, tier, contract refs) are copied forward verbatim
/// unless the path is in the forced-override exception list, in which case
/// the freshly derived value wins and the override is logged. The schema
/// version never decreases.
pub fn build_record(
    module: &DiscoveredModule,
    classification: &Classification,
    previous: Option<&ModuleRecord>,
    rules: &RuleConfig,
    digests: &DigestManifest,
) -> (ModuleRecord, Vec<String>) {
    let mut override_log = Vec::new();
    let forced = rules.is_forced_override(&module.path);

    let (fresh_name, fresh_owner, fresh_tier, fresh_caps, fresh_deps, fresh_contracts) =
        match &module.manifest {
            Some(m) => (
                m.name.clone(),
                m.owner.clone(),
                m.tier,
                sorted(&m.capabilities),
                sorted(&m.dependencies),
                m.contracts.clone(),
            ),
            None => (
                module.path.rsplit('/').next().unwrap_or(&module.path).to_string(),
                String::new(),
                u8::MAX,
                vec![],
                vec![],
                vec![],
            ),
        };

    let (owner, tier, contract_refs) = match previous {
        Some(prev) if !forced => (
            prev.owner.clone(),
            prev.tier,
            prev.contract_refs.clone(),
        ),
        Some(prev) => {
            if prev.owner != fresh_owner || prev.tier != fresh_tier || prev.contract_refs != fresh_contracts {
                override_log.push(format!(
                    "{}: forced override replaced preserved fields (owner {:?} -> {:?}, tier {} -> {})",
                    module.path, prev.owner, fresh_owner, prev.tier, fresh_tier
                ));
            }
            (fresh_owner, fresh_tier, fresh_contracts)
        }
        None => (fresh_owner, fresh_tier, fresh_contracts),
    };

    let schema_version = match previous {
        Some(prev) if compare_versions(&prev.schema_version, SCHEMA_VERSION) == Ordering::Greater => {
            prev.schema_version.clone()
        }
        _ => SCHEMA_VERSION.to_string(),
    };

    let record = ModuleRecord {
        path: module.path.clone(),
        name: fresh_name,
        capabilities: fresh_caps,
        dependencies: fresh_deps,
        owner,
        tier,
        categories: classification.categories.clone(),
        confidence: classification.confidence.clone(),
        suggestions: classification.suggestions.clone(),
        contract_refs,
        schema_version,
        rule_digest: digests.rule_digest.clone(),
        canon_digest: digests.canon_digest.clone(),
    };

    (record, override_log)
}

fn sorted(items: &[String]) -> Vec<String> {
    let mut v = items.to_vec();
    v.sort();
    v
}
