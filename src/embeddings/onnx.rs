// Local sentence embedder using all-MiniLM-L6-v2 via ONNX Runtime.
//
// Each text is tokenized, run through the BERT encoder, and mean-pooled over
// the attention mask into one 384-dimensional vector. Near-duplicate posts
// ("Dogecoin might be the next big move" vs "dogecoin might be the next BIG
// move!!") land close together even when the surface text differs.
//
// The model runs locally with no API calls.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::debug;

use super::traits::Embedder;

/// Embedding dimension for all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Texts per forward pass. Keeps padded tensors small when one post in a
/// large batch is much longer than the rest.
const INFERENCE_BATCH: usize = 32;

/// The model was trained on sequences of up to 256 word pieces.
const MAX_SEQ_LEN: usize = 256;

/// Sentence embedder backed by a local ONNX session.
///
/// `ort::Session::run` takes `&mut self` and `spawn_blocking` needs
/// `'static` captures, hence `Arc<Mutex<Session>>` and `Arc<Tokenizer>`.
pub struct SentenceEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl SentenceEmbedder {
    /// Load the model and tokenizer from the given directory.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in the directory.
    /// Run `flare download-model` first if they don't exist.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        for (path, what) in [(&model_path, "model"), (&tokenizer_path, "tokenizer")] {
            if !path.exists() {
                anyhow::bail!(
                    "Embedding {what} not found: {}\nRun `flare download-model` to download it.",
                    path.display()
                );
            }
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| {
                format!(
                    "Failed to load embedding model from {}",
                    model_path.display()
                )
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load embedding tokenizer: {}", e))?;

        debug!(dir = %model_dir.display(), "Loaded sentence embedding model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

#[async_trait]
impl Embedder for SentenceEmbedder {
    fn name(&self) -> &'static str {
        "onnx-minilm"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f64>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .context("Embedding model returned no vector")
    }

    /// CPU-bound tokenization and inference run on a blocking thread so the
    /// async runtime stays responsive.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut out = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(INFERENCE_BATCH) {
                out.extend(embed_sync(&session, &tokenizer, chunk)?);
            }
            Ok(out)
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

/// Synchronous embedding: tokenize, pad, run inference, mean-pool.
fn embed_sync(
    session: &Mutex<Session>,
    tokenizer: &Tokenizer,
    texts: &[String],
) -> Result<Vec<Vec<f64>>> {
    let encodings = texts
        .iter()
        .map(|t| {
            tokenizer
                .encode(t.as_str(), true)
                .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch_size = encodings.len();
    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len().min(MAX_SEQ_LEN))
        .max()
        .unwrap_or(0);

    if max_len == 0 {
        return Ok(vec![vec![0.0; EMBEDDING_DIM]; batch_size]);
    }

    // BERT inputs: token ids and attention mask padded with 0, token types
    // all 0 for single-sentence input.
    let mut input_ids = Vec::with_capacity(batch_size * max_len);
    let mut attention_mask = Vec::with_capacity(batch_size * max_len);

    for enc in &encodings {
        let seq_len = enc.get_ids().len().min(MAX_SEQ_LEN);
        input_ids.extend(enc.get_ids()[..seq_len].iter().map(|&id| id as i64));
        attention_mask.extend(enc.get_attention_mask()[..seq_len].iter().map(|&m| m as i64));

        let pad_len = max_len - seq_len;
        input_ids.extend(std::iter::repeat_n(0i64, pad_len));
        attention_mask.extend(std::iter::repeat_n(0i64, pad_len));
    }
    let token_type_ids = vec![0i64; batch_size * max_len];

    let shape = [batch_size as i64, max_len as i64];
    let input_ids_tensor =
        Tensor::from_array((shape, input_ids)).context("Failed to create input_ids tensor")?;
    let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
        .context("Failed to create attention_mask tensor")?;
    let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
        .context("Failed to create token_type_ids tensor")?;

    // last_hidden_state: [batch, seq_len, 384]
    let hidden = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            })
            .context("Embedding ONNX inference failed")?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract embedding output tensor")?;

        data.to_vec()
    };

    Ok(mean_pool(&hidden, &attention_mask, batch_size, max_len))
}

/// Average token embeddings over real (unmasked) tokens.
fn mean_pool(hidden: &[f32], mask: &[i64], batch_size: usize, max_len: usize) -> Vec<Vec<f64>> {
    (0..batch_size)
        .map(|i| {
            let mut sum = vec![0.0_f64; EMBEDDING_DIM];
            let mut count = 0.0_f64;

            for j in 0..max_len {
                if mask[i * max_len + j] == 0 {
                    continue;
                }
                count += 1.0;
                let offset = (i * max_len + j) * EMBEDDING_DIM;
                for (k, slot) in sum.iter_mut().enumerate() {
                    *slot += f64::from(hidden[offset + k]);
                }
            }

            if count > 0.0 {
                for slot in &mut sum {
                    *slot /= count;
                }
            }
            sum
        })
        .collect()
}
