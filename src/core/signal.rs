//! Signal extraction: turn a module's readable metadata into a flat set of
//! typed evidence tuples.
//!
//! Extraction fails soft. A missing or unreadable signal source drops that
//! signal and records a warning; the module falls through to whatever
//! confidence the remaining evidence produces.

use crate::core::discover::DiscoveredModule;
use crate::core::rules::RuleConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// A declared capability tag matching a category's capability list.
    CapabilityOverride,
    /// A manifest `[override]` block or repo-level system override.
    SystemOverride,
    /// The module's own path, matched against category path patterns.
    PathPattern,
    /// The accountable owner, matched against category owner priors.
    OwnerPrior,
    /// A declared dependency, matched against category dependency hints.
    DependencyHint,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::CapabilityOverride => "capability_override",
            SignalKind::SystemOverride => "system_override",
            SignalKind::PathPattern => "path_pattern",
            SignalKind::OwnerPrior => "owner_prior",
            SignalKind::DependencyHint => "dependency_hint",
        }
    }
}

/// One piece of evidence: `(kind, value, strength)` with strength in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub value: String,
    pub strength: f64,
}

impl Signal {
    pub fn full(kind: SignalKind, value: impl Into<String>) -> Signal {
        Signal {
            kind,
            value: value.into(),
            strength: 1.0,
        }
    }
}

/// Extract every available signal for one module. Warnings from manifest
/// reading are carried through; they never fail the module.
pub fn extract_signals(module: &DiscoveredModule, rules: &RuleConfig) -> (Vec<Signal>, Vec<String>) {
    let mut signals = Vec::new();
    let mut warnings = module.warnings.clone();

    signals.push(Signal::full(SignalKind::PathPattern, module.path.clone()));

    if let Some(category) = rules.system_overrides.get(&module.path) {
        signals.push(Signal::full(SignalKind::SystemOverride, category.clone()));
    }

    match &module.manifest {
        Some(manifest) => {
            for cap in &manifest.capabilities {
                signals.push(Signal::full(SignalKind::CapabilityOverride, cap.clone()));
            }
            if !manifest.owner.is_empty() {
                signals.push(Signal::full(SignalKind::OwnerPrior, manifest.owner.clone()));
            }
            for dep in &manifest.dependencies {
                signals.push(Signal::full(SignalKind::DependencyHint, dep.clone()));
            }
            if let Some(block) = &manifest.override_block {
                if let Some(category) = &block.category {
                    signals.push(Signal::full(SignalKind::SystemOverride, category.clone()));
                }
            }
        }
        None => {
            warnings.push(format!(
                "{}: no readable manifest, scoring from path evidence only",
                module.path
            ));
        }
    }

    (signals, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::discover::ModuleManifest;

    fn module(path: &str, manifest: Option<ModuleManifest>) -> DiscoveredModule {
        DiscoveredModule {
            path: path.to_string(),
            manifest,
            warnings: vec![],
        }
    }

    #[test]
    fn test_manifest_signals() {
        let m = module(
            "src/store",
            Some(ModuleManifest {
                name: "store".into(),
                owner: "data-team".into(),
                tier: 1,
                capabilities: vec!["persistence".into()],
                dependencies: vec!["core/db".into()],
                contracts: vec![],
                override_block: None,
            }),
        );
        let (signals, warnings) = extract_signals(&m, &RuleConfig::default());
        assert!(warnings.is_empty());
        let kinds: Vec<SignalKind> = signals.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SignalKind::PathPattern));
        assert!(kinds.contains(&SignalKind::CapabilityOverride));
        assert!(kinds.contains(&SignalKind::OwnerPrior));
        assert!(kinds.contains(&SignalKind::DependencyHint));
    }

    #[test]
    fn test_missing_manifest_degrades_to_path_only() {
        let (signals, warnings) = extract_signals(&module("src/x", None), &RuleConfig::default());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::PathPattern);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_system_override_from_rules() {
        let mut rules = RuleConfig::default();
        rules
            .system_overrides
            .insert("src/x".to_string(), "storage".to_string());
        let (signals, _) = extract_signals(&module("src/x", None), &rules);
        assert!(
            signals
                .iter()
                .any(|s| s.kind == SignalKind::SystemOverride && s.value == "storage")
        );
    }
}
