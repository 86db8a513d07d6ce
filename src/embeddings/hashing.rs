// Feature-hashing embedder.
//
// A deterministic, model-free stand-in for the sentence embedder: unigrams
// and bigrams of the cleaned text are hashed into a fixed-width signed
// bag-of-features vector and L2-normalized. Texts that share most of their
// words land near each other, which is enough to catch copy-paste
// campaigns when the ONNX model isn't available (tests, CI, air-gapped
// hosts).

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use stop_words::{get, LANGUAGE};
use xxhash_rust::xxh3::xxh3_64;

use super::traits::Embedder;

/// Default width, matching the sentence embedder so configs can swap.
pub const DEFAULT_DIM: usize = 384;

pub struct HashingEmbedder {
    dim: usize,
    stop_words: HashSet<String>,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_DIM)
    }

    pub fn with_dimension(dim: usize) -> Self {
        let stop_words: Vec<String> = get(LANGUAGE::English);
        Self {
            dim: dim.max(1),
            stop_words: stop_words.into_iter().collect(),
        }
    }

    /// Content tokens of a text. Stop words are dropped unless that would
    /// leave nothing ("to the moon" still needs a vector).
    fn tokens<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let all: Vec<&str> = text.split_whitespace().collect();
        let content: Vec<&str> = all
            .iter()
            .copied()
            .filter(|t| !self.stop_words.contains(*t))
            .collect();
        if content.is_empty() {
            all
        } else {
            content
        }
    }

    /// Synchronous embedding; hashing is cheap enough to run inline.
    pub fn embed_sync(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0_f64; self.dim];
        let tokens = self.tokens(text);

        let mut add = |feature: &str| {
            let hash = xxh3_64(feature.as_bytes());
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        };

        for token in &tokens {
            add(token);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]));
        }

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f64>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}
