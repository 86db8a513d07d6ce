// Per-post scoring: feature folding, behavior clustering, risk fusion and
// explanations.

pub mod behavior;
pub mod explain;
pub mod features;
pub mod fusion;

pub use behavior::{cluster_behavior, BehaviorAssignment, BehaviorCluster};
pub use explain::{explain, Explanation, ReasonCategory};
pub use features::{extract_features, Feature, PostFeatures};
pub use fusion::{contributions, risk_score, FeatureWeights};

/// Round to two decimal places, the precision every score is reported at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
