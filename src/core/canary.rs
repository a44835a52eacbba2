//! Canary sampling and approval.
//!
//! The canary is a stratified sample: a fixed percentage drawn from each
//! top-level directory stratum (at least one per non-empty stratum), with
//! exception-list critical paths force-included. Sampling is deterministic —
//! stratum members are ordered by content hash of their path, so the same
//! module set always yields the same canary.
//!
//! Approval binds to a fingerprint of the sampled path set. Absence of a
//! matching approval is rejection: the gate fails closed.

use crate::core::digest::{path_set_fingerprint, sha256_hex};
use crate::core::discover::top_level_stratum;
use crate::core::error::StarmapError;
use crate::core::ledger::{LedgerBroker, RunState};
use crate::core::rules::RuleConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanarySet {
    pub run_id: String,
    pub sample: Vec<String>,
    pub fingerprint: String,
}

/// Draw the stratified sample from `module_paths` (sorted, repo-relative).
pub fn draw_sample(module_paths: &[String], sample_percent: f64, rules: &RuleConfig) -> Vec<String> {
    let mut strata: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
    for path in module_paths {
        if rules.is_force_excluded(path) {
            continue;
        }
        strata.entry(top_level_stratum(path)).or_default().push(path);
    }

    let mut sample = Vec::new();
    for (_, mut members) in strata {
        // Deterministic shuffle: order by hash of the path.
        members.sort_by_key(|p| sha256_hex(p.as_bytes()));
        let take = ((members.len() as f64) * sample_percent / 100.0).ceil() as usize;
        let take = take.clamp(1, members.len());
        sample.extend(members.into_iter().take(take).cloned());
    }

    for critical in &rules.exceptions.force_include {
        if module_paths.contains(critical) && !sample.contains(critical) {
            sample.push(critical.clone());
        }
    }

    sample.sort();
    sample
}

/// Build a canary: draw the sample, open a run session, move it to
/// `CanaryBuilt`.
pub fn build_canary(
    ledger: &LedgerBroker,
    module_paths: &[String],
    sample_percent: f64,
    rules: &RuleConfig,
) -> Result<CanarySet, StarmapError> {
    if module_paths.is_empty() {
        return Err(StarmapError::NotFound(
            "no modules discovered; nothing to sample".to_string(),
        ));
    }
    let sample = draw_sample(module_paths, sample_percent, rules);
    let fingerprint = path_set_fingerprint(&sample);
    let run_id = Ulid::new().to_string();

    ledger.insert_session(&run_id, &sample, &fingerprint)?;
    ledger.transition(&run_id, RunState::CanaryBuilt)?;

    Ok(CanarySet {
        run_id,
        sample,
        fingerprint,
    })
}

/// Record an explicit approval for a built canary and advance the session.
pub fn approve_canary(
    ledger: &LedgerBroker,
    run_id: &str,
    actor: &str,
) -> Result<String, StarmapError> {
    let session = ledger.load_session(run_id)?;
    if session.state != RunState::CanaryBuilt {
        return Err(StarmapError::SafetyGateError(format!(
            "run {} is in state {}, not awaiting approval",
            run_id,
            session.state.as_str()
        )));
    }
    let approval_id = ledger.record_approval(run_id, &session.fingerprint, actor)?;
    ledger.transition(run_id, RunState::CanaryApproved)?;
    Ok(approval_id)
}

/// Fail-closed approval check used by the full run.
pub fn check_approved(ledger: &LedgerBroker, run_id: &str) -> Result<(), StarmapError> {
    let session = ledger.load_session(run_id)?;
    let approved = matches!(
        session.state,
        RunState::CanaryApproved | RunState::FullRunInProgress
    );
    let marker = ledger.find_approval(run_id, &session.fingerprint)?;
    if !approved || marker.is_none() {
        return Err(StarmapError::SafetyGateError(format!(
            "run {} has no canary approval (state {}); treating as rejected",
            run_id,
            session.state.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Vec<String> {
        vec![
            "src/a".into(),
            "src/b".into(),
            "src/c".into(),
            "src/d".into(),
            "tools/x".into(),
            "docs/y".into(),
        ]
    }

    #[test]
    fn test_sample_is_deterministic() {
        let rules = RuleConfig::default();
        let a = draw_sample(&paths(), 25.0, &rules);
        let b = draw_sample(&paths(), 25.0, &rules);
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_stratum_represented() {
        let rules = RuleConfig::default();
        let sample = draw_sample(&paths(), 10.0, &rules);
        assert!(sample.iter().any(|p| p.starts_with("src/")));
        assert!(sample.iter().any(|p| p.starts_with("tools/")));
        assert!(sample.iter().any(|p| p.starts_with("docs/")));
    }

    #[test]
    fn test_force_include_and_exclude() {
        let mut rules = RuleConfig::default();
        rules.exceptions.force_include.push("src/d".into());
        rules.exceptions.force_exclude.push("docs/y".into());
        let sample = draw_sample(&paths(), 10.0, &rules);
        assert!(sample.contains(&"src/d".to_string()));
        assert!(!sample.contains(&"docs/y".to_string()));
    }

    #[test]
    fn test_full_percentage_takes_everything() {
        let rules = RuleConfig::default();
        let sample = draw_sample(&paths(), 100.0, &rules);
        assert_eq!(sample.len(), paths().len());
    }
}
