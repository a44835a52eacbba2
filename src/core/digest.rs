//! Determinism digests.
//!
//! Every record pins the SHA-256 of the rule configuration and the canon that
//! produced it. `digests.json` under the store holds the hashes in effect so
//! a later audit can confirm which configuration a run saw.

use crate::core::error::StarmapError;
use crate::core::record::SCHEMA_VERSION;
use crate::core::store::{Store, write_atomic};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a path set: hash of the sorted paths, newline-joined.
pub fn path_set_fingerprint(paths: &[String]) -> String {
    let mut sorted = paths.to_vec();
    sorted.sort();
    sha256_hex(sorted.join("\n").as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestManifest {
    pub schema_version: String,
    pub rule_digest: String,
    pub canon_digest: String,
}

impl DigestManifest {
    /// Hash the rule configuration and canon bytes currently on disk.
    pub fn compute(store: &Store) -> Result<DigestManifest, StarmapError> {
        let rules = fs::read(store.rules_path()).map_err(StarmapError::IoError)?;
        let canon = fs::read(store.canon_path()).map_err(StarmapError::IoError)?;
        Ok(DigestManifest {
            schema_version: SCHEMA_VERSION.to_string(),
            rule_digest: sha256_hex(&rules),
            canon_digest: sha256_hex(&canon),
        })
    }

    pub fn write(&self, store: &Store) -> Result<(), StarmapError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StarmapError::ConfigError(e.to_string()))?;
        write_atomic(&store.digests_path(), format!("{}\n", json).as_bytes())
    }

    pub fn load(store: &Store) -> Result<DigestManifest, StarmapError> {
        let content = fs::read_to_string(store.digests_path()).map_err(StarmapError::IoError)?;
        serde_json::from_str(&content).map_err(|e| StarmapError::ConfigError(e.to_string()))
    }
}
