// Feature normalizer.
//
// Folds the detector outputs into the five bounded post-level features that
// clustering, fusion and explanations read. Each feature is computed on its
// own; none depends on another's value. A degenerate denominator (max of
// zero, or no finite max) zeroes that feature for the whole batch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detectors::{CoordinationReport, DuplicateReport};
use crate::posts::Post;

/// The five normalized features, in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    SimMax,
    SimMean,
    ClusterSizeNorm,
    CoordinationScore,
    AccountAgeNorm,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::SimMax,
        Feature::SimMean,
        Feature::ClusterSizeNorm,
        Feature::CoordinationScore,
        Feature::AccountAgeNorm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::SimMax => "sim_max",
            Feature::SimMean => "sim_mean",
            Feature::ClusterSizeNorm => "cluster_size_norm",
            Feature::CoordinationScore => "coordination_score",
            Feature::AccountAgeNorm => "account_age_norm",
        }
    }

    /// Human-readable description used in explanation lines.
    pub fn label(&self) -> &'static str {
        match self {
            Feature::SimMax => "very high similarity to at least one post (near-duplicate)",
            Feature::SimMean => "high average similarity (template-like text)",
            Feature::ClusterSizeNorm => "repetition across similar posts",
            Feature::CoordinationScore => "coordinated timing burst",
            Feature::AccountAgeNorm => "very new account activity",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized features plus the raw sizes they were derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostFeatures {
    pub sim_max: f64,
    pub sim_mean: f64,
    /// Duplicate-group size (1 for a singleton)
    pub cluster_size: usize,
    pub cluster_size_norm: f64,
    /// Member count of the post's coordination event (0 when none)
    pub burst_size: usize,
    pub burst_size_norm: f64,
    pub coordination_score: f64,
    pub account_age_norm: f64,
}

impl PostFeatures {
    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::SimMax => self.sim_max,
            Feature::SimMean => self.sim_mean,
            Feature::ClusterSizeNorm => self.cluster_size_norm,
            Feature::CoordinationScore => self.coordination_score,
            Feature::AccountAgeNorm => self.account_age_norm,
        }
    }

    /// The five features in canonical order, for clustering.
    pub fn vector(&self) -> [f64; 5] {
        Feature::ALL.map(|f| self.get(f))
    }
}

/// Divide by the batch maximum. A max that is not a positive finite number
/// zeroes the whole column.
pub fn safe_norm(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max.is_finite() && max > 0.0) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v / max).clamp(0.0, 1.0)).collect()
}

/// Normalised duplicate-group sizes. A batch whose largest group is a single
/// post has no repetition at all, so the column is zero.
pub fn group_size_norm(sizes: &[usize]) -> Vec<f64> {
    if sizes.iter().copied().max().unwrap_or(0) <= 1 {
        return vec![0.0; sizes.len()];
    }
    safe_norm(&as_f64(sizes))
}

/// Build features for every post. Reports must come from the same batch.
pub fn extract_features(
    posts: &[Post],
    duplicates: &DuplicateReport,
    coordination: &CoordinationReport,
) -> Vec<PostFeatures> {
    let n = posts.len();

    let cluster_sizes: Vec<usize> = (0..n).map(|i| duplicates.group_size_of(i)).collect();
    let cluster_norm = group_size_norm(&cluster_sizes);

    let burst_sizes = coordination.burst_sizes(posts);
    let burst_norm = safe_norm(&as_f64(&burst_sizes));

    let ages: Vec<f64> = posts.iter().map(|p| f64::from(p.account_age_days)).collect();
    let age_ratio = safe_norm(&ages);
    let max_age = ages.iter().copied().fold(0.0, f64::max);

    (0..n)
        .map(|i| {
            let sim = &duplicates.similarity;
            PostFeatures {
                sim_max: sim.row_max(i).clamp(0.0, 1.0),
                sim_mean: sim.row_mean(i).clamp(0.0, 1.0),
                cluster_size: cluster_sizes[i],
                cluster_size_norm: cluster_norm[i],
                burst_size: burst_sizes[i],
                burst_size_norm: burst_norm[i],
                coordination_score: burst_norm[i],
                // Newer accounts score closer to 1. No positive max age
                // means no signal, not "everyone is brand new".
                account_age_norm: if max_age > 0.0 {
                    1.0 - age_ratio[i]
                } else {
                    0.0
                },
            }
        })
        .collect()
}

fn as_f64(values: &[usize]) -> Vec<f64> {
    values.iter().map(|v| *v as f64).collect()
}
