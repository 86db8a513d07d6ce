// End-to-end pipeline scenarios.
//
// Runs RiskPipeline over small hand-built batches with the hashing
// embedder (no model files, no network) and checks the observable
// contract: feature bounds, reason categories, degenerate batches,
// per-post embedding failure, error cases, and the JSON report built on
// top of the output.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use flare::config::PipelineConfig;
use flare::detectors::AccountFlag;
use flare::embeddings::hashing::HashingEmbedder;
use flare::embeddings::traits::Embedder;
use flare::error::PipelineError;
use flare::output::json::Report;
use flare::pipeline::decision::{decision_policy, Decision};
use flare::pipeline::{PipelineOutput, RiskPipeline, ScoredPost};
use flare::posts::{Post, PostBatch, PostId, RawKey, RawPost, RawTimestamp};
use flare::scoring::{Feature, ReasonCategory};
use flare::text::Narrative;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
}

fn post(id: &str, text: &str, ts: DateTime<Utc>, account: &str, age: u32) -> Post {
    Post::new(id, text, ts, account, age)
}

fn pipeline(config: PipelineConfig) -> RiskPipeline {
    RiskPipeline::new(Arc::new(HashingEmbedder::new()), config)
}

async fn run(posts: Vec<Post>, config: PipelineConfig) -> PipelineOutput {
    let batch = PostBatch::new(posts).unwrap();
    pipeline(config).run(&batch).await.unwrap()
}

fn scored<'a>(output: &'a PipelineOutput, id: &str) -> &'a ScoredPost {
    output
        .posts
        .iter()
        .find(|p| p.post.post_id.as_str() == id)
        .unwrap()
}

fn mixed_batch() -> Vec<Post> {
    vec![
        post("1", "Dogecoin might be the next big move", at(12, 0, 0), "a", 3),
        post("2", "dogecoin might be the next BIG move!!", at(12, 2, 0), "b", 8),
        post("3", "$DOGE to the moon", at(12, 4, 0), "c", 12),
        post("4", "Bitcoin ETF flows look strong this week", at(9, 15, 0), "d", 700),
        post("5", "Lovely weather for a walk in the park", at(14, 40, 0), "e", 400),
        post("6", "ethereum gas fees are brutal", at(16, 5, 0), "d", 700),
    ]
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn identical_doge_posts_from_young_accounts_are_coordination() {
    let posts = vec![
        post("1", "Dogecoin might be the next big move", at(12, 0, 0), "a", 5),
        post("2", "Dogecoin might be the next big move", at(12, 6, 0), "b", 10),
        post("3", "Lovely weather for a walk in the park", at(15, 0, 0), "c", 400),
    ];
    let config = PipelineConfig {
        min_burst_posts: 2,
        ..PipelineConfig::default()
    };
    let output = run(posts, config).await;

    let pair: BTreeSet<PostId> = [PostId::from("1"), PostId::from("2")].into_iter().collect();
    assert_eq!(output.duplicate_ids, pair);
    assert_eq!(output.coordinated_ids, pair);
    assert_eq!(output.coordination_events.len(), 1);
    assert_eq!(output.coordination_events[0].narrative, Narrative::Doge);

    for id in ["1", "2"] {
        let p = scored(&output, id);
        assert!(p.features.sim_max > 0.99, "sim_max {}", p.features.sim_max);
        assert_eq!(p.features.coordination_score, 1.0);
        assert_eq!(p.reason_category, ReasonCategory::Coordination);
        assert!(p.risk_score > 70.0, "risk {}", p.risk_score);
        assert_eq!(p.cluster_id, scored(&output, "1").cluster_id);
    }
}

#[tokio::test]
async fn unique_post_from_old_account_is_baseline() {
    let mut posts: Vec<Post> = (0..10)
        .map(|i| {
            post(
                &format!("gm{i}"),
                "gm everyone have a great day",
                at(8, 0, 0) + Duration::minutes(30 * i),
                &format!("greeter{i}"),
                200,
            )
        })
        .collect();
    posts.push(post(
        "walk",
        "Lovely weather for a walk in the park",
        at(18, 0, 0),
        "veteran",
        400,
    ));
    let output = run(posts, PipelineConfig::default()).await;

    let p = scored(&output, "walk");
    assert_eq!(p.features.coordination_score, 0.0);
    assert_eq!(p.features.account_age_norm, 0.0);
    assert!(p.features.cluster_size_norm <= 0.1 + 1e-12);
    assert!(p.features.sim_max < 0.35, "sim_max {}", p.features.sim_max);
    assert!(p.risk_score < 15.0, "risk {}", p.risk_score);
    assert_eq!(p.confidence, 0.05);
    assert_eq!(p.reason_category, ReasonCategory::Baseline);
    assert!(!output.duplicate_ids.contains(&PostId::from("walk")));
}

#[tokio::test]
async fn empty_batch_completes() {
    let output = run(Vec::new(), PipelineConfig::default()).await;
    assert!(output.posts.is_empty());
    assert!(output.accounts.is_empty());
    assert!(output.duplicate_ids.is_empty());
    assert!(output.coordinated_ids.is_empty());
    assert!(output.coordination_events.is_empty());

    let report = Report::build(&output, Some(0.3));
    assert_eq!(report.summary.total_posts, 0);
    assert!(report.analysis.risk.is_none());
}

#[tokio::test]
async fn single_post_batch_is_baseline() {
    let posts = vec![post(
        "only",
        "Lovely weather for a walk in the park",
        at(12, 0, 0),
        "veteran",
        400,
    )];
    let output = run(posts, PipelineConfig::default()).await;

    assert_eq!(output.posts.len(), 1);
    let p = &output.posts[0];
    for feature in Feature::ALL {
        assert_eq!(p.features.get(feature), 0.0, "{feature}");
    }
    assert_eq!(p.features.cluster_size, 1);
    assert!(output.duplicate_ids.is_empty());
    assert!(output.coordinated_ids.is_empty());
    assert_eq!(p.risk_score, 0.0);
    assert_eq!(p.confidence, 0.05);
    assert_eq!(p.reason_category, ReasonCategory::Baseline);
    assert!(p.behavior_cluster.is_noise());
}

#[tokio::test]
async fn all_unique_batch_is_baseline() {
    let posts = vec![
        post("1", "Lovely weather for a walk in the park", at(8, 0, 0), "a", 400),
        post("2", "Finished reading a mystery novel", at(11, 30, 0), "b", 400),
        post("3", "Baking sourdough this afternoon", at(16, 45, 0), "c", 400),
    ];
    let output = run(posts, PipelineConfig::default()).await;

    assert!(output.duplicate_ids.is_empty());
    for p in &output.posts {
        assert_eq!(p.features.cluster_size_norm, 0.0);
        assert_eq!(p.features.coordination_score, 0.0);
        assert_eq!(p.features.account_age_norm, 0.0);
        assert!(p.risk_score < 15.0, "risk {}", p.risk_score);
        assert_eq!(p.confidence, 0.05);
        assert_eq!(p.reason_category, ReasonCategory::Baseline);
    }
}

#[tokio::test]
async fn rapid_poster_is_flagged_without_text_signals() {
    let texts = [
        "Morning run along the river",
        "Coffee shop downtown was packed",
        "Finished reading a mystery novel",
        "Garden tomatoes finally ripened",
        "Watched the basketball highlights",
        "Fixed the squeaky kitchen door",
        "Planning a camping trip soon",
        "New keyboard arrived yesterday",
        "Baking sourdough this afternoon",
        "Museum exhibit about volcanoes",
    ];
    let posts: Vec<Post> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| {
            post(
                &format!("r{i}"),
                t,
                at(10, 0, 0) + Duration::seconds(30 * i as i64),
                "rapid",
                365,
            )
        })
        .collect();
    let output = run(posts, PipelineConfig::default()).await;

    let account = &output.accounts[0];
    assert_eq!(account.account_id, "rapid");
    assert!(account.posting_rate > 5.0);
    assert!(account.flags.contains(&AccountFlag::HighPostingRate));
    assert!(!account.flags.contains(&AccountFlag::DuplicateContent));

    assert!(output.duplicate_ids.is_empty());
    for p in &output.posts {
        assert_eq!(p.features.coordination_score, 0.0);
        assert!(p.features.sim_max < 0.85);
    }
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn features_and_scores_are_bounded() {
    let output = run(mixed_batch(), PipelineConfig::default()).await;
    for p in &output.posts {
        for f in Feature::ALL {
            let v = p.features.get(f);
            assert!((0.0..=1.0).contains(&v), "{f} = {v} for {}", p.post.post_id);
        }
        assert!((0.0..=100.0).contains(&p.risk_score));
        assert!((0.05..=1.0).contains(&p.confidence));
        assert!((0.0..=1.0).contains(&p.cluster_confidence));
        assert_eq!(p.top_drivers.len(), p.explanations.len());
        assert_eq!(p.contributions.len(), 5);
    }
}

#[tokio::test]
async fn runs_are_deterministic() {
    let first = run(mixed_batch(), PipelineConfig::default()).await;
    let second = run(mixed_batch(), PipelineConfig::default()).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn chunk_size_does_not_change_results() {
    let one = run(
        mixed_batch(),
        PipelineConfig {
            similarity_chunk_rows: 1,
            ..PipelineConfig::default()
        },
    )
    .await;
    let many = run(mixed_batch(), PipelineConfig::default()).await;
    assert_eq!(one, many);
}

#[tokio::test]
async fn posts_keep_batch_order() {
    let output = run(mixed_batch(), PipelineConfig::default()).await;
    let ids: Vec<&str> = output.posts.iter().map(|p| p.post.post_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);
}

#[tokio::test]
async fn other_narrative_posts_never_coordinate() {
    let posts: Vec<Post> = (0..5)
        .map(|i| post(&i.to_string(), "gm gm", at(12, 0, i), &format!("u{i}"), 2))
        .collect();
    let output = run(posts, PipelineConfig::default()).await;
    assert!(output.coordinated_ids.is_empty());
    assert!(output.posts.iter().all(|p| p.narrative == Narrative::Other));
    // Still near-duplicates of each other.
    assert_eq!(output.duplicate_ids.len(), 5);
    assert!(output
        .posts
        .iter()
        .all(|p| p.reason_category == ReasonCategory::CopyPaste));
}

// ============================================================
// Errors
// ============================================================

#[tokio::test]
async fn oversized_batch_is_rejected() {
    let batch = PostBatch::new(mixed_batch()).unwrap();
    let config = PipelineConfig {
        max_batch_size: 3,
        ..PipelineConfig::default()
    };
    let err = pipeline(config).run(&batch).await.unwrap_err();
    assert_eq!(err, PipelineError::BatchTooLarge { size: 6, limit: 3 });
}

#[tokio::test]
async fn invalid_config_is_rejected_before_work() {
    let batch = PostBatch::new(mixed_batch()).unwrap();
    let config = PipelineConfig {
        similarity_threshold: 1.5,
        ..PipelineConfig::default()
    };
    let err = pipeline(config).run(&batch).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig { .. }));
}

#[test]
fn missing_fields_are_named() {
    let records = vec![
        RawPost {
            post_id: Some(RawKey::Int(1)),
            text: Some("hi".to_string()),
            timestamp: None,
            account_id: Some(RawKey::Text("a".to_string())),
            account_age_days: Some(3),
        },
        RawPost {
            post_id: Some(RawKey::Int(2)),
            text: Some("hi".to_string()),
            timestamp: Some(RawTimestamp::Epoch(1_714_564_800)),
            account_id: Some(RawKey::Text("a".to_string())),
            account_age_days: Some(3),
        },
    ];
    let err = PostBatch::from_raw(records).unwrap_err();
    assert_eq!(
        err,
        PipelineError::MissingFields {
            fields: vec!["timestamp"],
            records: 1,
        }
    );
}

#[test]
fn records_load_from_json() {
    let raw = r#"[
        {"post_id": 1, "text": "Dogecoin might be the next big move",
         "timestamp": "2024-05-01 12:00:00", "account_id": "a", "account_age_days": 3},
        {"post_id": "2", "text": "gm", "timestamp": 1714564800,
         "account_id": 9, "account_age_days": 400}
    ]"#;
    let records: Vec<RawPost> = serde_json::from_str(raw).unwrap();
    let batch = PostBatch::from_raw(records).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.posts()[1].account_id, "9");
    assert_eq!(batch.posts()[1].timestamp, at(12, 0, 0));
}

// ============================================================
// Embedding failures and deadlines
// ============================================================

/// Hashing embedder that refuses any text containing "poison".
struct PoisonedEmbedder(HashingEmbedder);

#[async_trait]
impl Embedder for PoisonedEmbedder {
    fn name(&self) -> &'static str {
        "poisoned"
    }

    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f64>> {
        if text.contains("poison") {
            anyhow::bail!("refusing to embed");
        }
        Ok(self.0.embed_sync(text))
    }
}

#[tokio::test]
async fn embedding_failure_degrades_one_post() {
    let posts = vec![
        post("1", "same old words", at(12, 0, 0), "a", 50),
        post("2", "same old words", at(12, 1, 0), "b", 50),
        post("3", "poison words", at(12, 2, 0), "c", 50),
    ];
    let batch = PostBatch::new(posts).unwrap();
    let pipeline = RiskPipeline::new(
        Arc::new(PoisonedEmbedder(HashingEmbedder::new())),
        PipelineConfig::default(),
    );
    let output = pipeline.run(&batch).await.unwrap();

    assert_eq!(output.embedding_failures(), 1);
    let bad = scored(&output, "3");
    assert!(bad.embedding_failed);
    assert_eq!(bad.features.sim_max, 0.0);
    assert_eq!(bad.features.sim_mean, 0.0);
    assert!(!output.duplicate_ids.contains(&PostId::from("3")));
    assert!(output.duplicate_ids.contains(&PostId::from("1")));

    let report = Report::build(&output, None);
    assert_eq!(report.summary.embedding_failures, 1);
}

#[tokio::test]
async fn text_with_nothing_left_after_cleaning_is_an_embedding_failure() {
    let posts = vec![
        post("1", "🚀🚀🚀", at(12, 0, 0), "a", 50),
        post("2", "🚀🚀🚀", at(12, 1, 0), "b", 50),
        post("3", "https://scam.example/x", at(12, 2, 0), "c", 50),
        post("4", "Lovely weather for a walk in the park", at(12, 3, 0), "d", 50),
    ];
    let output = run(posts, PipelineConfig::default()).await;

    assert_eq!(output.embedding_failures(), 3);
    for id in ["1", "2", "3"] {
        let p = scored(&output, id);
        assert!(p.embedding_failed, "{id}");
        assert_eq!(p.features.sim_max, 0.0);
    }
    assert!(!scored(&output, "4").embedding_failed);
    assert!(output.duplicate_ids.is_empty());
}

/// Never answers within a test's patience.
struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn dimension(&self) -> usize {
        4
    }

    async fn embed_text(&self, _text: &str) -> Result<Vec<f64>> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(vec![0.0; 4])
    }
}

#[tokio::test]
async fn deadline_aborts_the_run() {
    let batch = PostBatch::new(mixed_batch()).unwrap();
    let config = PipelineConfig {
        deadline_secs: Some(1),
        ..PipelineConfig::default()
    };
    let err = RiskPipeline::new(Arc::new(StalledEmbedder), config)
        .run(&batch)
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::DeadlineExceeded { limit_secs: 1 });
}

// ============================================================
// Report
// ============================================================

#[tokio::test]
async fn report_attaches_decisions_and_rollups() {
    let config = PipelineConfig {
        min_burst_posts: 2,
        ..PipelineConfig::default()
    };
    let output = run(mixed_batch(), config).await;
    let report = Report::build(&output, Some(0.3));

    assert_eq!(report.summary.total_posts, 6);
    assert_eq!(
        report.summary.auto_actions + report.summary.queue_review + report.summary.no_action,
        6
    );
    assert_eq!(report.posts.len(), 6);
    assert!(report.posts.iter().all(|p| p.risk_ewma.is_some()));
    for p in &report.posts {
        let expected = decision_policy(p.scored.risk_score, p.scored.confidence);
        assert_eq!(p.decision, expected);
    }

    // Account "d" has two posts; the rest one each.
    assert_eq!(report.accounts.len(), 5);
    let d = report.accounts.iter().find(|a| a.account_id == "d").unwrap();
    assert_eq!(d.post_count, 2);

    let shares: f64 = report.analysis.reasons.iter().map(|r| r.share).sum();
    assert!((shares - 1.0).abs() < 1e-9);

    let json = report.to_json_pretty().unwrap();
    assert!(json.contains("\"decision\""));
    assert!(json.contains("\"reason_category\""));
    assert!(report.posts.iter().any(|p| p.decision != Decision::AutoAction));
}
