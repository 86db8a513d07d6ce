// Embedder trait: the abstraction over embedding providers.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

/// Trait for turning text into dense vectors. Async because remote
/// providers need HTTP and local models offload to blocking threads.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Width of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f64>>;

    /// Embed multiple texts, returning vectors in the same order.
    /// Default implementation calls embed_text sequentially; providers
    /// can override for batching if they support it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_text(text).await?);
        }
        Ok(vectors)
    }
}

/// Embed every text without letting a provider failure abort the batch.
///
/// Tries one batched call first. If that fails (or returns the wrong number
/// of vectors), falls back to embedding texts one at a time so a single bad
/// input only costs its own vector. A slot is `None` when the provider
/// failed for that text or returned a malformed vector (wrong width,
/// non-finite values, or all zeros).
pub async fn embed_or_neutral(embedder: &dyn Embedder, texts: &[String]) -> Vec<Option<Vec<f64>>> {
    if texts.is_empty() {
        return Vec::new();
    }

    let dim = embedder.dimension();

    match embedder.embed_batch(texts).await {
        Ok(vectors) if vectors.len() == texts.len() => {
            return vectors
                .into_iter()
                .map(|v| well_formed(v, dim))
                .collect();
        }
        Ok(vectors) => {
            warn!(
                provider = embedder.name(),
                expected = texts.len(),
                got = vectors.len(),
                "Embedding batch returned the wrong number of vectors, retrying per text"
            );
        }
        Err(e) => {
            warn!(
                provider = embedder.name(),
                error = %e,
                "Embedding batch failed, retrying per text"
            );
        }
    }

    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
        match embedder.embed_text(text).await {
            Ok(v) => out.push(well_formed(v, dim)),
            Err(e) => {
                warn!(provider = embedder.name(), error = %e, "Embedding failed for one text");
                out.push(None);
            }
        }
    }
    out
}

fn well_formed(vector: Vec<f64>, dim: usize) -> Option<Vec<f64>> {
    // An all-zero vector has no direction, so cosine similarity is undefined.
    if vector.len() == dim
        && vector.iter().all(|v| v.is_finite())
        && vector.iter().any(|v| *v != 0.0)
    {
        Some(vector)
    } else {
        None
    }
}
