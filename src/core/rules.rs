//! Rule configuration: per-signal weights, confidence thresholds, promotion
//! ceilings, and exception lists (`rules.toml` under the store).

use crate::core::error::StarmapError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weights {
    pub capability_override: f64,
    pub system_override: f64,
    pub path_pattern: f64,
    pub owner_prior: f64,
    pub dependency_hint: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            capability_override: 0.60,
            system_override: 0.75,
            path_pattern: 0.15,
            owner_prior: 0.10,
            dependency_hint: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// At or above: recorded as a suggestion.
    pub min_suggest: f64,
    /// At or above: category is assigned.
    pub min_autopromote: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_suggest: 0.40,
            min_autopromote: 0.70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ceilings {
    pub max_promotions_per_run: usize,
    pub max_promotions_per_category: usize,
    pub max_categories_per_module: usize,
    /// Guard against runaway misclassification: the share of modules left in
    /// the default category after a run may not fall below this.
    pub min_default_category_percentage: f64,
}

impl Default for Ceilings {
    fn default() -> Self {
        Self {
            max_promotions_per_run: 25,
            max_promotions_per_category: 10,
            max_categories_per_module: 2,
            min_default_category_percentage: 0.20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exceptions {
    /// Always part of the canary sample.
    #[serde(default)]
    pub force_include: Vec<String>,
    /// Never sampled or regenerated.
    #[serde(default)]
    pub force_exclude: Vec<String>,
    /// Preserved fields may be overwritten for these paths.
    #[serde(default)]
    pub forced_override: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub ceilings: Ceilings,
    #[serde(default)]
    pub exceptions: Exceptions,
    /// Record paths may never begin with one of these.
    #[serde(default)]
    pub rejected_prefixes: Vec<String>,
    /// Repo-level overrides: module path -> category id.
    #[serde(default)]
    pub system_overrides: BTreeMap<String, String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            thresholds: Thresholds::default(),
            ceilings: Ceilings::default(),
            exceptions: Exceptions::default(),
            rejected_prefixes: vec!["legacy/".to_string(), ".archived/".to_string()],
            system_overrides: BTreeMap::new(),
        }
    }
}

impl RuleConfig {
    pub fn load(path: &Path) -> Result<RuleConfig, StarmapError> {
        let content = fs::read_to_string(path).map_err(StarmapError::IoError)?;
        let rules: RuleConfig = toml::from_str(&content)
            .map_err(|e| StarmapError::ConfigError(format!("rules parse: {}", e)))?;
        rules.check()?;
        Ok(rules)
    }

    pub fn check(&self) -> Result<(), StarmapError> {
        let t = &self.thresholds;
        if !(0.0..=1.0).contains(&t.min_suggest) || !(0.0..=1.0).contains(&t.min_autopromote) {
            return Err(StarmapError::ConfigError(
                "thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if t.min_suggest > t.min_autopromote {
            return Err(StarmapError::ConfigError(
                "min_suggest must not exceed min_autopromote".to_string(),
            ));
        }
        if self.ceilings.max_categories_per_module == 0 {
            return Err(StarmapError::ConfigError(
                "max_categories_per_module must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ceilings.min_default_category_percentage) {
            return Err(StarmapError::ConfigError(
                "min_default_category_percentage must lie in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_forced_override(&self, module_path: &str) -> bool {
        self.exceptions
            .forced_override
            .iter()
            .any(|p| p == module_path)
    }

    pub fn is_force_excluded(&self, module_path: &str) -> bool {
        self.exceptions
            .force_exclude
            .iter()
            .any(|p| p == module_path)
    }

    pub fn rejected_prefix_of(&self, module_path: &str) -> Option<&str> {
        self.rejected_prefixes
            .iter()
            .find(|p| module_path.starts_with(p.as_str()))
            .map(|p| p.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        RuleConfig::default().check().unwrap();
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut rules = RuleConfig::default();
        rules.thresholds.min_suggest = 0.9;
        rules.thresholds.min_autopromote = 0.5;
        assert!(rules.check().is_err());
    }

    #[test]
    fn test_rejected_prefix_lookup() {
        let rules = RuleConfig::default();
        assert_eq!(rules.rejected_prefix_of("legacy/foo"), Some("legacy/"));
        assert_eq!(rules.rejected_prefix_of("src/foo"), None);
    }
}
