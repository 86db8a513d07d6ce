use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::scoring::fusion::FeatureWeights;

/// Which embedding backend the duplicate detector uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    /// Local ONNX all-MiniLM-L6-v2 (default). Falls back to hashing when
    /// the model files have not been downloaded.
    Onnx,
    /// Deterministic feature-hashing embedder. No model, no network.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint.
    Remote,
}

/// Algorithm settings for one pipeline run.
///
/// Every knob the detectors, clusterer, fusion and explainer read lives
/// here so a run is fully described by `(batch, PipelineConfig)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cosine similarity at or above which two posts are near-duplicates.
    pub similarity_threshold: f64,
    /// Width of the fixed coordination buckets, in minutes.
    pub window_minutes: u32,
    /// Minimum same-narrative posts in one bucket to count as a burst.
    pub min_burst_posts: usize,
    /// HDBSCAN minimum cluster size (also used as `min_samples`).
    pub min_cluster_size: usize,
    pub weights: FeatureWeights,
    /// Number of feature contributions kept as explanation drivers.
    pub top_k: usize,
    /// Per-account EWMA smoothing factor. `None` skips the risk trend.
    pub ewma_alpha: Option<f64>,
    /// Largest batch the O(n^2) similarity matrix is allowed to cover.
    pub max_batch_size: usize,
    /// Rows per similarity worker task.
    pub similarity_chunk_rows: usize,
    /// Optional wall-clock limit for a whole run.
    pub deadline_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            window_minutes: 10,
            min_burst_posts: 3,
            min_cluster_size: 5,
            weights: FeatureWeights::default(),
            top_k: 4,
            ewma_alpha: Some(0.3),
            max_batch_size: 2_000,
            similarity_chunk_rows: 64,
            deadline_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Coordination bucket width.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_minutes))
    }

    /// Reject settings that would break the [0,1] feature contract or the
    /// detectors' preconditions.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |reason: String| Err(PipelineError::InvalidConfig { reason });

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return invalid(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.window_minutes == 0 {
            return invalid("window_minutes must be at least 1".to_string());
        }
        if self.min_burst_posts == 0 {
            return invalid("min_burst_posts must be at least 1".to_string());
        }
        if self.min_cluster_size < 2 {
            return invalid(format!(
                "min_cluster_size must be at least 2, got {}",
                self.min_cluster_size
            ));
        }
        if self.top_k == 0 {
            return invalid("top_k must be at least 1".to_string());
        }
        if let Some(alpha) = self.ewma_alpha {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return invalid(format!("ewma_alpha must be within (0, 1], got {alpha}"));
            }
        }
        if self.max_batch_size == 0 {
            return invalid("max_batch_size must be at least 1".to_string());
        }
        if self.similarity_chunk_rows == 0 {
            return invalid("similarity_chunk_rows must be at least 1".to_string());
        }
        self.weights.validate()
    }
}

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Anything
/// not set falls back to the `PipelineConfig` defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub embedder_backend: EmbedderBackend,
    /// Directory containing the ONNX embedding model files
    pub model_dir: PathBuf,
    /// Remote embeddings endpoint (only read for the remote backend)
    pub embedding_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    /// Vector width the remote model returns
    pub embedding_dim: usize,
    /// Requests per second allowed against the remote endpoint
    pub embedding_rps: f64,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// Unset variables take defaults; set-but-unparseable numbers are an
    /// error naming the variable.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let embedder_backend = match lookup("FLARE_EMBEDDER").as_deref() {
            Some("hashing") => EmbedderBackend::Hashing,
            Some("remote") => EmbedderBackend::Remote,
            // "onnx" or unset both default to ONNX
            _ => EmbedderBackend::Onnx,
        };

        let model_dir = lookup("FLARE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(crate::embeddings::download::default_model_dir);

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            similarity_threshold: parse_var(
                &lookup,
                "FLARE_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            window_minutes: parse_var(&lookup, "FLARE_WINDOW_MINUTES", defaults.window_minutes)?,
            min_burst_posts: parse_var(&lookup, "FLARE_MIN_BURST_POSTS", defaults.min_burst_posts)?,
            min_cluster_size: parse_var(
                &lookup,
                "FLARE_MIN_CLUSTER_SIZE",
                defaults.min_cluster_size,
            )?,
            top_k: parse_var(&lookup, "FLARE_TOP_K", defaults.top_k)?,
            ewma_alpha: match lookup("FLARE_EWMA_ALPHA").as_deref() {
                Some("off") | Some("none") => None,
                Some(_) => Some(parse_var(&lookup, "FLARE_EWMA_ALPHA", 0.3)?),
                None => defaults.ewma_alpha,
            },
            max_batch_size: parse_var(&lookup, "FLARE_MAX_BATCH_SIZE", defaults.max_batch_size)?,
            deadline_secs: match lookup("FLARE_DEADLINE_SECS") {
                Some(_) => Some(parse_var(&lookup, "FLARE_DEADLINE_SECS", 0u64)?),
                None => None,
            },
            ..defaults
        };

        Ok(Self {
            embedder_backend,
            model_dir,
            embedding_url: lookup("FLARE_EMBEDDING_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            embedding_api_key: lookup("FLARE_EMBEDDING_API_KEY").unwrap_or_default(),
            embedding_model: lookup("FLARE_EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dim: parse_var(&lookup, "FLARE_EMBEDDING_DIM", 1536)?,
            embedding_rps: parse_var(&lookup, "FLARE_EMBEDDING_RPS", 5.0)?,
            pipeline,
        })
    }

    /// Check that the remote embedder has what it needs.
    /// Call this before constructing a `RemoteEmbedder`.
    pub fn require_remote(&self) -> Result<()> {
        if self.embedding_api_key.is_empty() {
            anyhow::bail!(
                "FLARE_EMBEDDING_API_KEY not set. Add it to your .env file,\n\
                 or set FLARE_EMBEDDER=onnx to embed locally."
            );
        }
        if !(self.embedding_rps.is_finite() && self.embedding_rps > 0.0) {
            anyhow::bail!("FLARE_EMBEDDING_RPS must be a positive number");
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}
