// Remote embeddings over an OpenAI-compatible HTTP API.
//
// Works with any endpoint that accepts `{"model", "input": [...]}` and
// answers `{"data": [{"index", "embedding"}]}`, e.g. OpenAI, Azure, vLLM or
// Ollama's compat layer. Requests are paced by the shared rate limiter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::traits::Embedder;

/// Inputs per request. Hosted APIs cap this, 2048 for OpenAI.
const REQUEST_BATCH: usize = 256;

pub struct RemoteEmbedder {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dim: usize,
    rate_limiter: RateLimiter,
}

impl RemoteEmbedder {
    pub fn new(
        url: String,
        api_key: String,
        model: String,
        dim: usize,
        requests_per_second: f64,
    ) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key,
            model,
            dim,
            rate_limiter: RateLimiter::new(requests_per_second),
        }
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f64>>> {
        self.rate_limiter.acquire().await;

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to call embeddings API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embeddings API returned {}: {}", status, body);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embeddings API response")?;

        debug!(
            inputs = inputs.len(),
            returned = result.data.len(),
            model = %self.model,
            "Embedded batch remotely"
        );

        order_by_index(result.data, inputs.len())
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f64>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors.pop().context("Embeddings API returned no vector")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(REQUEST_BATCH) {
            out.extend(self.request(chunk).await?);
        }
        Ok(out)
    }
}

/// Put returned vectors back in input order. The API may reorder `data`.
fn order_by_index(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f64>>> {
    if data.len() != expected {
        anyhow::bail!(
            "Embeddings API returned {} vectors for {} inputs",
            data.len(),
            expected
        );
    }

    let mut slots: Vec<Option<Vec<f64>>> = vec![None; expected];
    for item in data {
        let slot = slots
            .get_mut(item.index)
            .with_context(|| format!("Embeddings API returned out-of-range index {}", item.index))?;
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.with_context(|| format!("Embeddings API returned no vector for input {i}")))
        .collect()
}

// --- Embeddings API request/response types ---

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, value: f64) -> EmbeddingData {
        EmbeddingData {
            index,
            embedding: vec![value],
        }
    }

    #[test]
    fn test_order_by_index_restores_input_order() {
        let out = order_by_index(vec![item(1, 1.0), item(0, 0.0)], 2).unwrap();
        assert_eq!(out, vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn test_order_by_index_rejects_count_mismatch() {
        assert!(order_by_index(vec![item(0, 0.0)], 2).is_err());
    }

    #[test]
    fn test_order_by_index_rejects_repeated_index() {
        assert!(order_by_index(vec![item(0, 0.0), item(0, 1.0)], 2).is_err());
    }

    #[test]
    fn test_response_parses_openai_shape() {
        let json = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }
}
