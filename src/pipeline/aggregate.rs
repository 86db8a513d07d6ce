// Rollups and analysis over scored posts.
//
// Everything here is a pure function of `PipelineOutput::posts`: account,
// behavior-cluster and narrative views, per-account EWMA risk trends, and
// the distribution helpers used by the report.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::decision::{decision_policy, Decision};
use super::ScoredPost;
use crate::scoring::{round2, BehaviorCluster, ReasonCategory};
use crate::text::Narrative;

/// Risk at or above which a post counts as high risk in rollups.
pub const HIGH_RISK: f64 = 70.0;
/// Confidence at or above which a post counts as high confidence.
pub const HIGH_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRollup {
    pub account_id: String,
    pub avg_risk: f64,
    pub max_risk: f64,
    pub avg_confidence: f64,
    pub post_count: usize,
    /// Latest EWMA of risk over the account's posts in time order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_trend: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRollup {
    pub behavior_cluster: BehaviorCluster,
    pub post_count: usize,
    pub avg_risk: f64,
    pub avg_confidence: f64,
    pub auto_actions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeRollup {
    pub narrative: Narrative,
    pub post_count: usize,
    pub avg_risk: f64,
    pub max_risk: f64,
    /// Posts with risk >= 70
    pub high_risk_posts: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Exponentially weighted risk per post, computed per account in time
/// order (ties in batch order). The first post of an account seeds the
/// average with its own risk. Returned in batch order.
pub fn apply_ewma(posts: &[ScoredPost], alpha: f64) -> Vec<f64> {
    let mut order: Vec<usize> = (0..posts.len()).collect();
    order.sort_by(|&a, &b| {
        posts[a]
            .post
            .account_id
            .cmp(&posts[b].post.account_id)
            .then(posts[a].post.timestamp.cmp(&posts[b].post.timestamp))
            .then(a.cmp(&b))
    });

    let mut out = vec![0.0; posts.len()];
    let mut last: Option<(&str, f64)> = None;
    for i in order {
        let account = posts[i].post.account_id.as_str();
        let x = posts[i].risk_score;
        let e = match last {
            Some((prev, e)) if prev == account => alpha * x + (1.0 - alpha) * e,
            _ => x,
        };
        out[i] = e;
        last = Some((account, e));
    }
    out
}

/// Per-account view, sorted by max risk (highest first) then account id.
pub fn account_rollups(posts: &[ScoredPost], ewma_alpha: Option<f64>) -> Vec<AccountRollup> {
    let ewma = ewma_alpha.map(|alpha| apply_ewma(posts, alpha));

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, p) in posts.iter().enumerate() {
        groups.entry(p.post.account_id.as_str()).or_default().push(i);
    }

    let mut rows: Vec<AccountRollup> = groups
        .into_iter()
        .map(|(account_id, members)| {
            let latest = members.iter().copied().max_by(|&a, &b| {
                posts[a]
                    .post
                    .timestamp
                    .cmp(&posts[b].post.timestamp)
                    .then(a.cmp(&b))
            });
            AccountRollup {
                account_id: account_id.to_string(),
                avg_risk: round2(mean(members.iter().map(|&i| posts[i].risk_score))),
                max_risk: members
                    .iter()
                    .map(|&i| posts[i].risk_score)
                    .fold(0.0, f64::max),
                avg_confidence: round2(mean(members.iter().map(|&i| posts[i].confidence))),
                post_count: members.len(),
                risk_trend: match (&ewma, latest) {
                    (Some(values), Some(i)) => Some(round2(values[i])),
                    _ => None,
                },
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.max_risk
            .total_cmp(&a.max_risk)
            .then_with(|| a.account_id.cmp(&b.account_id))
    });
    rows
}

/// Per-behavior-cluster view, noise (-1) first then ascending cluster id.
pub fn cluster_rollups(posts: &[ScoredPost]) -> Vec<ClusterRollup> {
    let mut groups: BTreeMap<i64, Vec<&ScoredPost>> = BTreeMap::new();
    for p in posts {
        groups.entry(p.behavior_cluster.label()).or_default().push(p);
    }

    groups
        .into_values()
        .map(|members| ClusterRollup {
            behavior_cluster: members[0].behavior_cluster,
            post_count: members.len(),
            avg_risk: round2(mean(members.iter().map(|p| p.risk_score))),
            avg_confidence: round2(mean(members.iter().map(|p| p.confidence))),
            auto_actions: members
                .iter()
                .filter(|p| decision_policy(p.risk_score, p.confidence) == Decision::AutoAction)
                .count(),
        })
        .collect()
}

/// Per-narrative view in narrative order.
pub fn narrative_rollups(posts: &[ScoredPost]) -> Vec<NarrativeRollup> {
    let mut groups: BTreeMap<Narrative, Vec<f64>> = BTreeMap::new();
    for p in posts {
        groups.entry(p.narrative).or_default().push(p.risk_score);
    }

    groups
        .into_iter()
        .map(|(narrative, risks)| NarrativeRollup {
            narrative,
            post_count: risks.len(),
            avg_risk: round2(mean(risks.iter().copied())),
            max_risk: risks.iter().copied().fold(0.0, f64::max),
            high_risk_posts: risks.iter().filter(|r| **r >= HIGH_RISK).count(),
        })
        .collect()
}

/// Five-number-plus summary of a distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub max: f64,
}

/// Linear-interpolated percentile of sorted values, `q` in [0, 1].
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// `None` for an empty input.
pub fn summarize(values: &[f64]) -> Option<DistributionSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let p = |q| round2(percentile(&sorted, q));

    Some(DistributionSummary {
        count: sorted.len(),
        mean: round2(mean(sorted.iter().copied())),
        min: sorted[0],
        p10: p(0.10),
        p25: p(0.25),
        p50: p(0.50),
        p75: p(0.75),
        p90: p(0.90),
        p95: p(0.95),
        max: sorted[sorted.len() - 1],
    })
}

/// Share of posts per reason category, every category listed.
pub fn reason_shares(posts: &[ScoredPost]) -> Vec<(ReasonCategory, f64)> {
    let mut counts: HashMap<ReasonCategory, usize> = HashMap::new();
    for p in posts {
        *counts.entry(p.reason_category).or_insert(0) += 1;
    }
    ReasonCategory::ALL
        .iter()
        .map(|r| {
            let share = if posts.is_empty() {
                0.0
            } else {
                counts.get(r).copied().unwrap_or(0) as f64 / posts.len() as f64
            };
            (*r, share)
        })
        .collect()
}

/// High-risk x high-confidence cross tabulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfidenceMatrix {
    pub high_risk_high_confidence: usize,
    pub high_risk_low_confidence: usize,
    pub low_risk_high_confidence: usize,
    pub low_risk_low_confidence: usize,
}

pub fn risk_confidence_matrix(
    posts: &[ScoredPost],
    risk_threshold: f64,
    confidence_threshold: f64,
) -> RiskConfidenceMatrix {
    let mut m = RiskConfidenceMatrix::default();
    for p in posts {
        let slot = match (
            p.risk_score >= risk_threshold,
            p.confidence >= confidence_threshold,
        ) {
            (true, true) => &mut m.high_risk_high_confidence,
            (true, false) => &mut m.high_risk_low_confidence,
            (false, true) => &mut m.low_risk_high_confidence,
            (false, false) => &mut m.low_risk_low_confidence,
        };
        *slot += 1;
    }
    m
}
