//! Scoring engine: weighted evidence to per-category confidence.
//!
//! Combination rule: for each signal kind, the strongest matching signal
//! contributes `weight(kind) * strength`; a category's confidence is the sum
//! of per-kind contributions clamped to [0, 1]. The rule is monotone (more
//! evidence never lowers confidence) and the per-kind breakdown is kept for
//! the audit report. Overrides carry the highest weights and can alone cross
//! the autopromote threshold; path and owner evidence corroborates.

use crate::core::canon::CompiledCategory;
use crate::core::rules::Weights;
use crate::core::signal::{Signal, SignalKind};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Confidence for one candidate category, with its evidence breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub confidence: f64,
    /// Per-kind contribution actually applied (post-weight).
    pub contributions: Vec<(SignalKind, f64)>,
}

impl Weights {
    pub fn weight_of(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::CapabilityOverride => self.capability_override,
            SignalKind::SystemOverride => self.system_override,
            SignalKind::PathPattern => self.path_pattern,
            SignalKind::OwnerPrior => self.owner_prior,
            SignalKind::DependencyHint => self.dependency_hint,
        }
    }
}

/// Does this signal argue for this category?
fn signal_matches(signal: &Signal, category: &CompiledCategory) -> bool {
    match signal.kind {
        SignalKind::CapabilityOverride => category
            .def
            .capabilities
            .iter()
            .any(|c| c == &signal.value),
        SignalKind::SystemOverride => signal.value == category.def.id,
        SignalKind::PathPattern => category.patterns.iter().any(|re| re.is_match(&signal.value)),
        SignalKind::OwnerPrior => category.def.owner_priors.iter().any(|o| o == &signal.value),
        SignalKind::DependencyHint => category
            .def
            .dependency_hints
            .iter()
            .any(|h| signal.value == *h || signal.value.starts_with(&format!("{}/", h))),
    }
}

/// Score one module's signals against every category.
///
/// Output is sorted by confidence descending, category id ascending on exact
/// ties, so downstream selection is stable.
pub fn score_module(signals: &[Signal], categories: &[CompiledCategory], weights: &Weights) -> Vec<CategoryScore> {
    let mut scores = Vec::with_capacity(categories.len());

    for category in categories {
        // Strongest matching signal per kind.
        let mut best: FxHashMap<SignalKind, f64> = FxHashMap::default();
        for signal in signals {
            if signal_matches(signal, category) {
                let entry = best.entry(signal.kind).or_insert(0.0);
                if signal.strength > *entry {
                    *entry = signal.strength;
                }
            }
        }

        let mut contributions: Vec<(SignalKind, f64)> = best
            .into_iter()
            .map(|(kind, strength)| (kind, weights.weight_of(kind) * strength))
            .collect();
        contributions.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let raw: f64 = contributions.iter().map(|(_, c)| c).sum();
        scores.push(CategoryScore {
            category: category.def.id.clone(),
            confidence: raw.clamp(0.0, 1.0),
            contributions,
        });
    }

    scores.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });
    scores
}
