// JSON report: the serializable shape of one analysis run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detectors::{AccountHeuristic, CoordinationEvent};
use crate::pipeline::aggregate::{
    account_rollups, cluster_rollups, narrative_rollups, reason_shares, risk_confidence_matrix,
    summarize, AccountRollup, ClusterRollup, DistributionSummary, NarrativeRollup,
    RiskConfidenceMatrix, HIGH_CONFIDENCE, HIGH_RISK,
};
use crate::pipeline::decision::{decision_policy, Decision};
use crate::pipeline::{aggregate::apply_ewma, PipelineOutput, ScoredPost};
use crate::scoring::ReasonCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_posts: usize,
    pub auto_actions: usize,
    pub queue_review: usize,
    pub no_action: usize,
    pub duplicate_posts: usize,
    pub coordinated_posts: usize,
    pub coordination_events: usize,
    pub suspicious_accounts: usize,
    pub embedding_failures: usize,
}

/// A scored post with its policy decision attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPost {
    #[serde(flatten)]
    pub scored: ScoredPost,
    pub decision: Decision,
    /// Account-level EWMA of risk up to and including this post.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_ewma: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonShare {
    pub reason_category: ReasonCategory,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub risk: Option<DistributionSummary>,
    pub confidence: Option<DistributionSummary>,
    pub reasons: Vec<ReasonShare>,
    pub risk_confidence: RiskConfidenceMatrix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: ReportSummary,
    pub posts: Vec<ReportPost>,
    pub accounts: Vec<AccountRollup>,
    pub account_heuristics: Vec<AccountHeuristic>,
    pub clusters: Vec<ClusterRollup>,
    pub narratives: Vec<NarrativeRollup>,
    pub coordination_events: Vec<CoordinationEvent>,
    pub analysis: Analysis,
}

impl Report {
    /// Compose decisions, smoothing and rollups over a pipeline output.
    pub fn build(output: &PipelineOutput, ewma_alpha: Option<f64>) -> Self {
        let scored = &output.posts;
        let ewma = ewma_alpha.map(|alpha| apply_ewma(scored, alpha));

        let posts: Vec<ReportPost> = scored
            .iter()
            .enumerate()
            .map(|(i, p)| ReportPost {
                decision: decision_policy(p.risk_score, p.confidence),
                risk_ewma: ewma
                    .as_ref()
                    .map(|values| crate::scoring::round2(values[i])),
                scored: p.clone(),
            })
            .collect();

        let count = |d: Decision| posts.iter().filter(|p| p.decision == d).count();
        let risks: Vec<f64> = scored.iter().map(|p| p.risk_score).collect();
        let confidences: Vec<f64> = scored.iter().map(|p| p.confidence).collect();

        Self {
            summary: ReportSummary {
                total_posts: scored.len(),
                auto_actions: count(Decision::AutoAction),
                queue_review: count(Decision::QueueReview),
                no_action: count(Decision::NoAction),
                duplicate_posts: output.duplicate_ids.len(),
                coordinated_posts: output.coordinated_ids.len(),
                coordination_events: output.coordination_events.len(),
                suspicious_accounts: output.accounts.iter().filter(|a| a.suspicious).count(),
                embedding_failures: output.embedding_failures(),
            },
            accounts: account_rollups(scored, ewma_alpha),
            account_heuristics: output.accounts.clone(),
            clusters: cluster_rollups(scored),
            narratives: narrative_rollups(scored),
            coordination_events: output.coordination_events.clone(),
            analysis: Analysis {
                risk: summarize(&risks),
                confidence: summarize(&confidences),
                reasons: reason_shares(scored)
                    .into_iter()
                    .map(|(reason_category, share)| ReasonShare {
                        reason_category,
                        share,
                    })
                    .collect(),
                risk_confidence: risk_confidence_matrix(scored, HIGH_RISK, HIGH_CONFIDENCE),
            },
            posts,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report")
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}
