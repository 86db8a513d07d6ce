// Risk fusion: weighted sum of the normalized features.
//
// `risk = 100 * clamp(sum(weight_f * feature_f), 0, 1)`, rounded to two
// decimals. Weights are non-negative, so raising any single feature can
// never lower the score.

use serde::{Deserialize, Serialize};

use super::features::{Feature, PostFeatures};
use super::round2;
use crate::error::{PipelineError, PipelineResult};

/// Slack for weights that sum to 1.0 up to float rounding.
const WEIGHT_SUM_EPS: f64 = 1e-9;

/// One weight per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub sim_max: f64,
    pub sim_mean: f64,
    pub cluster_size_norm: f64,
    pub coordination_score: f64,
    pub account_age_norm: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            sim_max: 0.30,
            sim_mean: 0.10,
            cluster_size_norm: 0.20,
            coordination_score: 0.30,
            account_age_norm: 0.10,
        }
    }
}

impl FeatureWeights {
    pub fn get(&self, feature: Feature) -> f64 {
        match feature {
            Feature::SimMax => self.sim_max,
            Feature::SimMean => self.sim_mean,
            Feature::ClusterSizeNorm => self.cluster_size_norm,
            Feature::CoordinationScore => self.coordination_score,
            Feature::AccountAgeNorm => self.account_age_norm,
        }
    }

    pub fn sum(&self) -> f64 {
        Feature::ALL.iter().map(|f| self.get(*f)).sum()
    }

    /// Weights must be finite, non-negative and sum to at most 1.
    pub fn validate(&self) -> PipelineResult<()> {
        for feature in Feature::ALL {
            let w = self.get(feature);
            if !w.is_finite() || w < 0.0 {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("weight for {feature} must be a non-negative number, got {w}"),
                });
            }
        }
        let sum = self.sum();
        if sum > 1.0 + WEIGHT_SUM_EPS {
            return Err(PipelineError::InvalidConfig {
                reason: format!("feature weights must sum to at most 1, got {sum:.4}"),
            });
        }
        Ok(())
    }
}

/// Risk score in [0, 100], rounded to two decimals.
pub fn risk_score(features: &PostFeatures, weights: &FeatureWeights) -> f64 {
    let raw: f64 = Feature::ALL
        .iter()
        .map(|f| weights.get(*f) * features.get(*f))
        .sum();
    round2(raw.clamp(0.0, 1.0) * 100.0)
}

/// Each feature's share of the risk score, in risk points
/// (`feature * weight * 100`, rounded to two decimals), in canonical order.
pub fn contributions(features: &PostFeatures, weights: &FeatureWeights) -> Vec<(Feature, f64)> {
    Feature::ALL
        .iter()
        .map(|f| (*f, round2(features.get(*f) * weights.get(*f) * 100.0)))
        .collect()
}
