//! Classifier: thresholds and per-module ceilings over scored categories.

use crate::core::rules::{Ceilings, Thresholds};
use crate::core::score::CategoryScore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final category decision for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Assigned categories, sorted by id. Never empty.
    pub categories: Vec<String>,
    /// Confidence per assigned or suggested category.
    pub confidence: BTreeMap<String, f64>,
    /// Categories in [min_suggest, min_autopromote): observability only.
    pub suggestions: Vec<String>,
}

/// Apply thresholds and the per-module category ceiling.
///
/// Categories at or above `min_autopromote` are assigned, bounded by
/// `max_categories_per_module` (highest confidence kept, stable tie-break by
/// id — the input is already sorted that way). Scores in the suggest band are
/// recorded but do not change assignment. A module with nothing at
/// autopromote keeps the default category.
pub fn classify_scores(
    scores: &[CategoryScore],
    thresholds: &Thresholds,
    ceilings: &Ceilings,
    default_category: &str,
) -> Classification {
    let mut confidence = BTreeMap::new();
    let mut assigned = Vec::new();
    let mut suggestions = Vec::new();

    for score in scores {
        if score.confidence >= thresholds.min_autopromote {
            if assigned.len() < ceilings.max_categories_per_module {
                assigned.push(score.category.clone());
                confidence.insert(score.category.clone(), score.confidence);
            } else {
                // Over the per-module ceiling: demote to suggestion.
                suggestions.push(score.category.clone());
                confidence.insert(score.category.clone(), score.confidence);
            }
        } else if score.confidence >= thresholds.min_suggest {
            suggestions.push(score.category.clone());
            confidence.insert(score.category.clone(), score.confidence);
        }
    }

    if assigned.is_empty() {
        let default_score = scores
            .iter()
            .find(|s| s.category == default_category)
            .map(|s| s.confidence)
            .unwrap_or(0.0);
        assigned.push(default_category.to_string());
        confidence.insert(default_category.to_string(), default_score);
    }

    assigned.sort();
    suggestions.sort();

    Classification {
        categories: assigned,
        confidence,
        suggestions,
    }
}
