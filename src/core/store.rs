//! Store abstraction for Starmap's persisted state.
//!
//! All pipeline state lives under `<repo>/.starmap/`: one record file per
//! module (mirroring the module's own source path), the rule configuration,
//! the canon, the contract registry, the ledger database, backups, and
//! reports.

use crate::core::error::StarmapError;
use std::fs;
use std::path::{Path, PathBuf};

pub const STORE_DIR: &str = ".starmap";
pub const RECORD_SUFFIX: &str = ".record.json";

/// Store handle rooted at `<repo>/.starmap/`.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the repository root.
    pub repo_root: PathBuf,
    /// Absolute path to the store root directory (`<repo>/.starmap`).
    pub root: PathBuf,
}

impl Store {
    pub fn open(repo_root: &Path) -> Result<Store, StarmapError> {
        let root = repo_root.join(STORE_DIR);
        if !root.is_dir() {
            return Err(StarmapError::NotFound(format!(
                "no {} store under {} (run `starmap init`)",
                STORE_DIR,
                repo_root.display()
            )));
        }
        Ok(Store {
            repo_root: repo_root.to_path_buf(),
            root,
        })
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join("rules.toml")
    }

    pub fn canon_path(&self) -> PathBuf {
        self.root.join("categories.toml")
    }

    pub fn contracts_path(&self) -> PathBuf {
        self.root.join("contracts.toml")
    }

    pub fn digests_path(&self) -> PathBuf {
        self.root.join("digests.json")
    }

    pub fn ledger_db_path(&self) -> PathBuf {
        self.root.join(crate::core::db::LEDGER_DB_NAME)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Record file for a module, mirroring the module's source path exactly.
    pub fn record_path(&self, module_path: &str) -> PathBuf {
        self.records_dir()
            .join(format!("{}{}", module_path, RECORD_SUFFIX))
    }

    /// Repo-relative module path for a record file, if it is one.
    pub fn module_path_of(&self, record_file: &Path) -> Option<String> {
        let rel = record_file.strip_prefix(self.records_dir()).ok()?;
        let rel = rel.to_str()?.replace('\\', "/");
        rel.strip_suffix(RECORD_SUFFIX).map(|s| s.to_string())
    }

    /// Enumerate all record files under `records/`, sorted by module path.
    pub fn list_record_files(&self) -> Result<Vec<PathBuf>, StarmapError> {
        let mut out = Vec::new();
        collect_files(&self.records_dir(), &mut out)?;
        out.retain(|p| {
            p.to_str()
                .map(|s| s.ends_with(RECORD_SUFFIX))
                .unwrap_or(false)
        });
        out.sort();
        Ok(out)
    }

    /// Copy the full `records/` tree into `backups/<run_id>/`.
    pub fn snapshot_records(&self, run_id: &str) -> Result<PathBuf, StarmapError> {
        let dest = self.backups_dir().join(run_id);
        fs::create_dir_all(&dest).map_err(StarmapError::IoError)?;
        for file in self.list_record_files()? {
            let rel = file
                .strip_prefix(self.records_dir())
                .map_err(|_| StarmapError::NotFound(format!("{} outside records", file.display())))?;
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(StarmapError::IoError)?;
            }
            fs::copy(&file, &target).map_err(StarmapError::IoError)?;
        }
        Ok(dest)
    }

    /// Restore `records/` from `backups/<run_id>/`. Returns restored paths.
    ///
    /// Files written by the run that have no counterpart in the snapshot are
    /// removed, so the tree matches the pre-run state exactly.
    pub fn restore_records(&self, run_id: &str) -> Result<Vec<String>, StarmapError> {
        let snapshot = self.backups_dir().join(run_id);
        if !snapshot.is_dir() {
            return Err(StarmapError::NotFound(format!(
                "no backup snapshot for run {}",
                run_id
            )));
        }

        let mut snapshot_files = Vec::new();
        collect_files(&snapshot, &mut snapshot_files)?;
        let snapshot_rel: Vec<PathBuf> = snapshot_files
            .iter()
            .filter_map(|f| f.strip_prefix(&snapshot).ok().map(|r| r.to_path_buf()))
            .collect();

        for file in self.list_record_files()? {
            let rel = file.strip_prefix(self.records_dir()).unwrap_or(&file);
            if !snapshot_rel.iter().any(|s| s == rel) {
                fs::remove_file(&file).map_err(StarmapError::IoError)?;
            }
        }

        let mut restored = Vec::new();
        for rel in &snapshot_rel {
            let target = self.records_dir().join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(StarmapError::IoError)?;
            }
            fs::copy(snapshot.join(rel), &target).map_err(StarmapError::IoError)?;
            restored.push(rel.to_string_lossy().replace('\\', "/"));
        }
        restored.sort();
        Ok(restored)
    }
}

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename into place. A crash never leaves a half-written record.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StarmapError> {
    let parent = path
        .parent()
        .ok_or_else(|| StarmapError::NotFound(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).map_err(StarmapError::IoError)?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));
    fs::write(&tmp, bytes).map_err(StarmapError::IoError)?;
    fs::rename(&tmp, path).map_err(StarmapError::IoError)?;
    Ok(())
}

/// Walk upward from `start` looking for a directory containing `.starmap`.
pub fn find_store_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(STORE_DIR).is_dir() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StarmapError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).map_err(StarmapError::IoError)? {
        let entry = entry.map_err(StarmapError::IoError)?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_path_mirrors_module_path() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(STORE_DIR)).unwrap();
        let store = Store::open(tmp.path()).unwrap();

        let record = store.record_path("src/core/db");
        assert!(record.ends_with("records/src/core/db.record.json"));
        assert_eq!(
            store.module_path_of(&record),
            Some("src/core/db".to_string())
        );
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/record.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
