// The canonical risk pipeline.
//
// One entry point, `RiskPipeline::run(batch)`, executes every stage in a
// single pass:
//
//   clean text + narratives
//     -> duplicates (embeddings, similarity) || coordination bursts
//     -> account heuristics
//     -> features -> behavior clusters -> risk -> explanations
//
// Rollups, smoothing and decisions are composed afterwards from the output
// (see `aggregate` and `decision`); they never fork the core.

pub mod aggregate;
pub mod decision;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::detectors::{
    detect_coordination, detect_duplicates, score_accounts, AccountHeuristic, CoordinationEvent,
};
use crate::embeddings::traits::Embedder;
use crate::error::{PipelineError, PipelineResult};
use crate::posts::{Post, PostBatch, PostId};
use crate::scoring::{
    cluster_behavior, contributions, explain, extract_features, risk_score, BehaviorCluster,
    Feature, PostFeatures, ReasonCategory,
};
use crate::text::{assign_narrative, clean_text, Narrative};

/// A post with every field the pipeline derives for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    #[serde(flatten)]
    pub post: Post,
    pub clean_text: String,
    pub narrative: Narrative,
    /// Duplicate-group id (not the behavior cluster)
    pub cluster_id: usize,
    #[serde(flatten)]
    pub features: PostFeatures,
    pub behavior_cluster: BehaviorCluster,
    pub cluster_confidence: f64,
    /// 0-100
    pub risk_score: f64,
    /// Risk points per feature
    pub contributions: BTreeMap<Feature, f64>,
    /// 0-1
    pub confidence: f64,
    pub reason_category: ReasonCategory,
    pub top_drivers: Vec<Feature>,
    pub explanations: Vec<String>,
    /// No usable embedding; similarity features are neutral (zero).
    pub embedding_failed: bool,
}

/// Enriched posts plus the side tables produced along the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// Batch order.
    pub posts: Vec<ScoredPost>,
    /// Sorted by account id.
    pub accounts: Vec<AccountHeuristic>,
    pub coordination_events: Vec<CoordinationEvent>,
    pub duplicate_ids: BTreeSet<PostId>,
    pub coordinated_ids: BTreeSet<PostId>,
}

impl PipelineOutput {
    pub fn embedding_failures(&self) -> usize {
        self.posts.iter().filter(|p| p.embedding_failed).count()
    }
}

/// Stateless between runs: everything a run needs is the batch, the
/// embedder and the config.
pub struct RiskPipeline {
    embedder: Arc<dyn Embedder>,
    config: PipelineConfig,
}

impl RiskPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, config: PipelineConfig) -> Self {
        Self { embedder, config }
    }

    /// Run every stage over a validated batch.
    ///
    /// Fails only on invalid configuration, a batch above
    /// `max_batch_size`, a similarity worker crash, or an elapsed deadline.
    /// Nothing partial is returned on failure.
    pub async fn run(&self, batch: &PostBatch) -> PipelineResult<PipelineOutput> {
        self.config.validate()?;

        if batch.len() > self.config.max_batch_size {
            return Err(PipelineError::BatchTooLarge {
                size: batch.len(),
                limit: self.config.max_batch_size,
            });
        }

        match self.config.deadline_secs {
            Some(limit_secs) => {
                tokio::time::timeout(Duration::from_secs(limit_secs), self.run_stages(batch))
                    .await
                    .map_err(|_| {
                        warn!(limit_secs, posts = batch.len(), "Pipeline run timed out");
                        PipelineError::DeadlineExceeded { limit_secs }
                    })?
            }
            None => self.run_stages(batch).await,
        }
    }

    async fn run_stages(&self, batch: &PostBatch) -> PipelineResult<PipelineOutput> {
        let config = &self.config;
        let posts = batch.posts();

        let clean: Vec<String> = posts.iter().map(|p| clean_text(&p.text)).collect();
        let narratives: Vec<Narrative> = posts.iter().map(|p| assign_narrative(&p.text)).collect();

        // Duplicates and coordination share no data; run them side by side.
        let (duplicates, coordination) = tokio::join!(
            detect_duplicates(
                posts,
                &clean,
                self.embedder.as_ref(),
                config.similarity_threshold,
                config.similarity_chunk_rows,
            ),
            async {
                detect_coordination(posts, &narratives, config.window(), config.min_burst_posts)
            }
        );
        let duplicates = duplicates?;

        let accounts = score_accounts(
            posts,
            &duplicates.duplicate_ids,
            &coordination.coordinated_ids,
        );

        let features = extract_features(posts, &duplicates, &coordination);
        let vectors: Vec<[f64; 5]> = features.iter().map(PostFeatures::vector).collect();
        let behavior = cluster_behavior(&vectors, config.min_cluster_size);

        let scored: Vec<ScoredPost> = posts
            .iter()
            .zip(clean)
            .zip(narratives)
            .zip(features)
            .zip(behavior)
            .enumerate()
            .map(|(i, ((((post, clean_text), narrative), features), behavior))| {
                let risk = risk_score(&features, &config.weights);
                let explanation = explain(&features, &config.weights, config.top_k);
                ScoredPost {
                    post: post.clone(),
                    clean_text,
                    narrative,
                    cluster_id: duplicates.group_ids[i],
                    contributions: contributions(&features, &config.weights)
                        .into_iter()
                        .collect(),
                    features,
                    behavior_cluster: behavior.cluster,
                    cluster_confidence: behavior.confidence,
                    risk_score: risk,
                    confidence: explanation.confidence,
                    reason_category: explanation.reason_category,
                    top_drivers: explanation.top_drivers,
                    explanations: explanation.explanations,
                    embedding_failed: duplicates.embedding_failed[i],
                }
            })
            .collect();

        info!(
            posts = scored.len(),
            duplicates = duplicates.duplicate_ids.len(),
            events = coordination.events.len(),
            high_risk = scored.iter().filter(|p| p.risk_score >= 70.0).count(),
            "Pipeline run complete"
        );

        Ok(PipelineOutput {
            posts: scored,
            accounts,
            coordination_events: coordination.events,
            duplicate_ids: duplicates.duplicate_ids,
            coordinated_ids: coordination.coordinated_ids,
        })
    }
}
