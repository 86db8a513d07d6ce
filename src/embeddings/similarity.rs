// Cosine similarity and the batch similarity matrix.
//
// The matrix is the O(n^2) heart of duplicate detection. Rows are computed
// in chunks on blocking threads; each task owns a disjoint row range so no
// synchronisation is needed beyond joining the results.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Cosine similarity between two vectors, clamped to [0.0, 1.0].
///
/// Mismatched lengths, empty vectors and zero vectors all yield 0.0, which
/// is what a post with no usable embedding should look like to every
/// downstream feature.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    let denom = mag_a * mag_b;
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

/// Dense symmetric n x n similarity matrix with a zero diagonal.
///
/// Self-similarity is never stored, so row reductions (max, mean) exclude
/// the post itself without special-casing.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SimilarityMatrix {
    /// Build from row-major data. Forces the diagonal to zero.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for (i, row) in rows.into_iter().enumerate() {
            debug_assert_eq!(row.len(), n);
            data.extend(row);
            data[i * n + i] = 0.0;
        }
        Self { n, data }
    }

    /// Synchronous build, used for small batches and tests.
    pub fn compute(embeddings: &[Option<Vec<f64>>]) -> Self {
        let rows = similarity_rows(embeddings, 0..embeddings.len());
        Self::from_rows(rows)
    }

    /// Build the matrix on blocking worker threads, `chunk_rows` rows per
    /// task.
    pub async fn compute_chunked(
        embeddings: Vec<Option<Vec<f64>>>,
        chunk_rows: usize,
    ) -> PipelineResult<Self> {
        let n = embeddings.len();
        let chunk_rows = chunk_rows.max(1);
        let shared = Arc::new(embeddings);

        let tasks = (0..n).step_by(chunk_rows).map(|start| {
            let end = (start + chunk_rows).min(n);
            let shared = Arc::clone(&shared);
            async move {
                tokio::task::spawn_blocking(move || similarity_rows(&shared, start..end))
                    .await
                    .map_err(|e| PipelineError::Worker(e.to_string()))
            }
        });

        let chunks = try_join_all(tasks).await?;
        debug!(posts = n, chunks = chunks.len(), "Computed similarity matrix");

        Ok(Self::from_rows(chunks.into_iter().flatten().collect()))
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// Highest similarity to any other post.
    pub fn row_max(&self, i: usize) -> f64 {
        self.row(i).iter().copied().fold(0.0, f64::max)
    }

    /// Row sum divided by n. The zero self slot is part of the denominator.
    pub fn row_mean(&self, i: usize) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.row(i).iter().sum::<f64>() / self.n as f64
    }
}

fn similarity_rows(
    embeddings: &[Option<Vec<f64>>],
    rows: std::ops::Range<usize>,
) -> Vec<Vec<f64>> {
    rows.map(|i| {
        embeddings
            .iter()
            .map(|other| match (&embeddings[i], other) {
                (Some(a), Some(b)) => cosine_similarity(a, b),
                _ => 0.0,
            })
            .collect()
    })
    .collect()
}
