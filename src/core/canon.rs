//! The canon: category ("star") definitions and their evidence lists.
//!
//! The canon is a TOML file under the store (`categories.toml`). A default
//! canon is embedded in the binary so `starmap init` works offline.

use crate::core::error::StarmapError;
use regex::Regex;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(RustEmbed)]
#[folder = "canon/"]
#[include = "*.toml"]
pub struct CanonAssets;

/// One category definition plus the evidence that argues for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDef {
    pub id: String,
    pub label: String,
    pub domain: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub path_patterns: Vec<String>,
    #[serde(default)]
    pub owner_priors: Vec<String>,
    #[serde(default)]
    pub dependency_hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canon {
    #[serde(rename = "category")]
    pub categories: Vec<CategoryDef>,
}

/// A category with its path patterns compiled, for the scoring hot path.
#[derive(Debug)]
pub struct CompiledCategory {
    pub def: CategoryDef,
    pub patterns: Vec<Regex>,
}

impl Canon {
    pub fn load(path: &Path) -> Result<Canon, StarmapError> {
        let content = fs::read_to_string(path).map_err(StarmapError::IoError)?;
        let canon: Canon = toml::from_str(&content)
            .map_err(|e| StarmapError::ConfigError(format!("canon parse: {}", e)))?;
        canon.check()?;
        Ok(canon)
    }

    pub fn embedded_default() -> Result<Canon, StarmapError> {
        let file = CanonAssets::get("categories.toml")
            .ok_or_else(|| StarmapError::NotFound("embedded canon missing".to_string()))?;
        let content = String::from_utf8_lossy(&file.data);
        let canon: Canon = toml::from_str(&content)
            .map_err(|e| StarmapError::ConfigError(format!("embedded canon parse: {}", e)))?;
        canon.check()?;
        Ok(canon)
    }

    /// Structural checks: unique ids, exactly one default category.
    fn check(&self) -> Result<(), StarmapError> {
        let mut seen = Vec::new();
        for cat in &self.categories {
            if cat.id.is_empty() {
                return Err(StarmapError::ConfigError("category with empty id".to_string()));
            }
            if seen.contains(&cat.id) {
                return Err(StarmapError::ConfigError(format!(
                    "duplicate category id: {}",
                    cat.id
                )));
            }
            seen.push(cat.id.clone());
        }
        let defaults = self.categories.iter().filter(|c| c.default).count();
        if defaults != 1 {
            return Err(StarmapError::ConfigError(format!(
                "canon must declare exactly one default category, found {}",
                defaults
            )));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&CategoryDef> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn default_category(&self) -> &CategoryDef {
        // check() guarantees exactly one.
        self.categories
            .iter()
            .find(|c| c.default)
            .expect("canon invariant: one default category")
    }

    /// Compile path patterns for scoring. A malformed pattern is a
    /// configuration error, surfaced here rather than silently skipped.
    pub fn compile(&self) -> Result<Vec<CompiledCategory>, StarmapError> {
        let mut out = Vec::with_capacity(self.categories.len());
        for cat in &self.categories {
            let mut patterns = Vec::with_capacity(cat.path_patterns.len());
            for raw in &cat.path_patterns {
                let re = Regex::new(raw).map_err(|e| {
                    StarmapError::ConfigError(format!(
                        "category {}: bad path pattern {:?}: {}",
                        cat.id, raw, e
                    ))
                })?;
                patterns.push(re);
            }
            out.push(CompiledCategory {
                def: cat.clone(),
                patterns,
            });
        }
        Ok(out)
    }
}
