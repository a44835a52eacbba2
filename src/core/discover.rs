//! Module discovery.
//!
//! A module is a directory carrying a `module.toml` manifest. Discovery walks
//! the repository tree, skipping VCS and build directories and the store
//! itself. An unreadable or malformed manifest is not fatal: the module is
//! still discovered, the failure is carried as a warning, and downstream
//! scoring works from whatever signals remain.

use crate::core::error::StarmapError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "module.toml";

const SKIP_DIRS: &[&str] = &[".git", "target", ".starmap", "node_modules"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideBlock {
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub tier: u8,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub contracts: Vec<String>,
    #[serde(default, rename = "override")]
    pub override_block: Option<OverrideBlock>,
}

#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    /// Repo-relative path with forward slashes (primary key).
    pub path: String,
    pub manifest: Option<ModuleManifest>,
    pub warnings: Vec<String>,
}

/// Walk the repository for module manifests. Output is sorted by path.
pub fn discover_modules(repo_root: &Path) -> Result<Vec<DiscoveredModule>, StarmapError> {
    let mut dirs = Vec::new();
    collect_manifest_dirs(repo_root, &mut dirs)?;

    let mut modules = Vec::new();
    for dir in dirs {
        let rel = dir
            .strip_prefix(repo_root)
            .unwrap_or(&dir)
            .to_string_lossy()
            .replace('\\', "/");
        if rel.is_empty() {
            continue;
        }
        let mut warnings = Vec::new();
        let manifest = match fs::read_to_string(dir.join(MANIFEST_NAME)) {
            Ok(content) => match toml::from_str::<ModuleManifest>(&content) {
                Ok(m) => Some(m),
                Err(e) => {
                    warnings.push(format!("{}: manifest parse failed: {}", rel, e));
                    None
                }
            },
            Err(e) => {
                warnings.push(format!("{}: manifest unreadable: {}", rel, e));
                None
            }
        };
        modules.push(DiscoveredModule {
            path: rel,
            manifest,
            warnings,
        });
    }
    modules.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(modules)
}

/// First path component, the canary stratum key.
pub fn top_level_stratum(module_path: &str) -> &str {
    module_path.split('/').next().unwrap_or(module_path)
}

fn collect_manifest_dirs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StarmapError> {
    if !dir.is_dir() {
        return Ok(());
    }
    let name = dir.file_name().and_then(|s| s.to_str()).unwrap_or("");
    if SKIP_DIRS.contains(&name) {
        return Ok(());
    }
    if dir.join(MANIFEST_NAME).is_file() {
        out.push(dir.to_path_buf());
    }
    for entry in fs::read_dir(dir).map_err(StarmapError::IoError)? {
        let entry = entry.map_err(StarmapError::IoError)?;
        let path = entry.path();
        if path.is_dir() {
            collect_manifest_dirs(&path, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_discovery_skips_store_and_sorts() {
        let tmp = tempdir().unwrap();
        for dir in ["src/core", "src/api", ".starmap/records"] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        std::fs::write(
            tmp.path().join("src/core/module.toml"),
            "name = \"core\"\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("src/api/module.toml"), "name = \"api\"\n").unwrap();
        std::fs::write(
            tmp.path().join(".starmap/records/module.toml"),
            "name = \"x\"\n",
        )
        .unwrap();

        let modules = discover_modules(tmp.path()).unwrap();
        let paths: Vec<&str> = modules.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["src/api", "src/core"]);
    }

    #[test]
    fn test_malformed_manifest_is_soft() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src/bad")).unwrap();
        std::fs::write(tmp.path().join("src/bad/module.toml"), "name = [broken").unwrap();

        let modules = discover_modules(tmp.path()).unwrap();
        assert_eq!(modules.len(), 1);
        assert!(modules[0].manifest.is_none());
        assert_eq!(modules[0].warnings.len(), 1);
    }

    #[test]
    fn test_top_level_stratum() {
        assert_eq!(top_level_stratum("src/core/db"), "src");
        assert_eq!(top_level_stratum("tools"), "tools");
    }
}
