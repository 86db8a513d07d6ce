use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use flare::config::{Config, EmbedderBackend};
use flare::embeddings::download;
use flare::embeddings::hashing::HashingEmbedder;
use flare::embeddings::onnx::SentenceEmbedder;
use flare::embeddings::remote::RemoteEmbedder;
use flare::embeddings::traits::Embedder;
use flare::output::json::Report;
use flare::output::terminal;
use flare::pipeline::RiskPipeline;
use flare::posts::{PostBatch, RawPost};

/// Flare: batch risk scoring for coordinated and copy-paste posting.
///
/// Scores every post in a batch for near-duplicate text, same-narrative
/// timing bursts and new-account activity, and explains each score.
#[derive(Parser)]
#[command(name = "flare", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a JSON array of posts
    Analyze {
        /// Path to the posts file
        input: PathBuf,

        /// Minimum behavior-cluster size (default from config: 5)
        #[arg(long)]
        min_cluster_size: Option<usize>,

        /// Coordination window width in minutes (default from config: 10)
        #[arg(long)]
        window_minutes: Option<u32>,

        /// Minimum same-narrative posts in a window (default from config: 3)
        #[arg(long)]
        min_burst_posts: Option<usize>,

        /// Number of posts and accounts to show (default: 10)
        #[arg(long, default_value = "10")]
        top: usize,

        /// Also write the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Download the sentence embedding model (~90 MB)
    DownloadModel,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flare=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            min_cluster_size,
            window_minutes,
            min_burst_posts,
            top,
            json,
        } => {
            let mut config = Config::load()?;
            if let Some(v) = min_cluster_size {
                config.pipeline.min_cluster_size = v;
            }
            if let Some(v) = window_minutes {
                config.pipeline.window_minutes = v;
            }
            if let Some(v) = min_burst_posts {
                config.pipeline.min_burst_posts = v;
            }

            let batch = load_batch(&input)?;
            info!(posts = batch.len(), file = %input.display(), "Loaded batch");

            let embedder = create_embedder(&config)?;
            let ewma_alpha = config.pipeline.ewma_alpha;
            let pipeline = RiskPipeline::new(embedder, config.pipeline);
            let output = pipeline.run(&batch).await?;

            let report = Report::build(&output, ewma_alpha);
            terminal::display_report(&report, top);

            if let Some(path) = json {
                report.write_to(&path)?;
                println!("\nJSON report written to {}", path.display());
            }
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            println!("Downloading embedding model to {}", config.model_dir.display());
            download::download_model(&config.model_dir).await?;
            println!("\nModel ready. Run `flare analyze <posts.json>` to score a batch.");
        }

        Commands::Config => {
            let config = Config::load()?;
            config.pipeline.validate()?;
            terminal::display_config(&config);
        }
    }

    Ok(())
}

/// Read a JSON array of post objects and validate it into a batch.
fn load_batch(path: &Path) -> Result<PostBatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<RawPost> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of post objects", path.display()))?;
    Ok(PostBatch::from_raw(records)?)
}

/// Build the configured embedder. The ONNX backend falls back to feature
/// hashing when the model hasn't been downloaded or fails to load.
fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedder_backend {
        EmbedderBackend::Onnx => {
            if !download::embedding_files_present(&config.model_dir) {
                warn!("Embedding model not downloaded, using hashing embedder. Run `flare download-model` for better duplicate detection.");
                return Ok(Arc::new(HashingEmbedder::new()));
            }
            let embed_dir = download::embedding_model_dir(&config.model_dir);
            match SentenceEmbedder::load(&embed_dir) {
                Ok(e) => {
                    info!("Using local ONNX sentence embedder");
                    Ok(Arc::new(e))
                }
                Err(e) => {
                    warn!("Failed to load embedding model, using hashing embedder: {e}");
                    Ok(Arc::new(HashingEmbedder::new()))
                }
            }
        }
        EmbedderBackend::Hashing => {
            info!("Using hashing embedder");
            Ok(Arc::new(HashingEmbedder::new()))
        }
        EmbedderBackend::Remote => {
            config.require_remote()?;
            info!(url = %config.embedding_url, model = %config.embedding_model, "Using remote embedder");
            Ok(Arc::new(RemoteEmbedder::new(
                config.embedding_url.clone(),
                config.embedding_api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dim,
                config.embedding_rps,
            )))
        }
    }
}
