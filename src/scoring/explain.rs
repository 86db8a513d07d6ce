// Explainability engine.
//
// For each post: the top-k weighted feature contributions as readable
// sentences, one reason category picked by fixed precedence, and a
// confidence score built from how many behavioral signals fired and how
// strongly.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::features::{Feature, PostFeatures};
use super::fusion::FeatureWeights;
use super::round2;

/// Signals counted toward confidence, with the value at which each fires.
/// `sim_mean` is not a signal.
const SIGNAL_THRESHOLDS: [(Feature, f64); 4] = [
    (Feature::CoordinationScore, 0.7),
    (Feature::SimMax, 0.65),
    (Feature::ClusterSizeNorm, 0.5),
    (Feature::AccountAgeNorm, 0.7),
];

/// Confidence when no signal fires.
const CONFIDENCE_FLOOR: f64 = 0.05;

/// Why a post scored the way it did. Variants are in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCategory {
    Coordination,
    CopyPaste,
    NewAccount,
    Baseline,
}

impl ReasonCategory {
    pub const ALL: [ReasonCategory; 4] = [
        ReasonCategory::Coordination,
        ReasonCategory::CopyPaste,
        ReasonCategory::NewAccount,
        ReasonCategory::Baseline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCategory::Coordination => "coordination",
            ReasonCategory::CopyPaste => "copy_paste",
            ReasonCategory::NewAccount => "new_account",
            ReasonCategory::Baseline => "baseline",
        }
    }

    pub fn interpretation(&self) -> &'static str {
        match self {
            ReasonCategory::Coordination => "Coordinated campaign",
            ReasonCategory::CopyPaste => "Copy-paste repetition",
            ReasonCategory::NewAccount => "New account anomaly",
            ReasonCategory::Baseline => "Normal baseline behavior",
        }
    }
}

impl fmt::Display for ReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explanation for one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub top_drivers: Vec<Feature>,
    /// One sentence per driver, same order as `top_drivers`.
    pub explanations: Vec<String>,
    pub reason_category: ReasonCategory,
    pub confidence: f64,
}

/// Pick the reason by fixed precedence: coordination, then copy-paste,
/// then new account, else baseline.
pub fn classify_reason(features: &PostFeatures) -> ReasonCategory {
    if features.coordination_score >= 0.7 {
        ReasonCategory::Coordination
    } else if features.sim_max >= 0.65 && features.cluster_size_norm >= 0.5 {
        ReasonCategory::CopyPaste
    } else if features.account_age_norm >= 0.7 {
        ReasonCategory::NewAccount
    } else {
        ReasonCategory::Baseline
    }
}

/// `0.6 * active/total + 0.4 * strength/active`, floored at 0.05 when
/// nothing fires, capped at 1 and rounded to two decimals.
pub fn compute_confidence(features: &PostFeatures) -> f64 {
    let (active, strength) = SIGNAL_THRESHOLDS
        .iter()
        .filter_map(|(feature, threshold)| {
            let v = features.get(*feature);
            (v >= *threshold).then_some(v)
        })
        .fold((0usize, 0.0_f64), |(n, s), v| (n + 1, s + v));

    if active == 0 {
        return CONFIDENCE_FLOOR;
    }

    let breadth = active as f64 / SIGNAL_THRESHOLDS.len() as f64;
    let intensity = strength / active as f64;
    round2((0.6 * breadth + 0.4 * intensity).min(1.0))
}

/// Weighted contributions ranked by magnitude, largest first. Equal
/// magnitudes keep canonical feature order.
pub fn ranked_contributions(features: &PostFeatures, weights: &FeatureWeights) -> Vec<(Feature, f64)> {
    let mut contribs: Vec<(Feature, f64)> = Feature::ALL
        .iter()
        .map(|f| (*f, features.get(*f) * weights.get(*f)))
        .collect();
    contribs.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    contribs
}

fn driver_sentence(feature: Feature, value: f64, delta: f64) -> String {
    let direction = if delta >= 0.0 { "increases" } else { "decreases" };
    format!(
        "{} ({}={:.3}) {} risk (Δ={:.2})",
        feature.label(),
        feature.name(),
        value,
        direction,
        delta
    )
}

/// Explain one post.
pub fn explain(features: &PostFeatures, weights: &FeatureWeights, top_k: usize) -> Explanation {
    let drivers: Vec<(Feature, f64)> = ranked_contributions(features, weights)
        .into_iter()
        .take(top_k)
        .collect();

    Explanation {
        explanations: drivers
            .iter()
            .map(|(f, delta)| driver_sentence(*f, features.get(*f), *delta))
            .collect(),
        top_drivers: drivers.into_iter().map(|(f, _)| f).collect(),
        reason_category: classify_reason(features),
        confidence: compute_confidence(features),
    }
}
