// Near-duplicate detection over sentence embeddings.
//
// Every cleaned text is embedded once, the full cosine similarity matrix is
// built, and posts are grouped by complete-linkage agglomerative clustering
// cut at `1 - threshold`. Complete linkage means every pair inside a group
// clears the threshold, so groups never chain unrelated posts together
// through a middleman the way single linkage would.

use std::collections::{BTreeSet, HashMap};

use tracing::{info, warn};

use crate::embeddings::similarity::SimilarityMatrix;
use crate::embeddings::traits::{embed_or_neutral, Embedder};
use crate::error::PipelineResult;
use crate::posts::{Post, PostId};

/// Slack for float noise at the threshold boundary. Applied identically to
/// the pairwise test and the linkage cut so both agree.
const THRESHOLD_EPS: f64 = 1e-9;

/// Everything the duplicate detector hands downstream.
#[derive(Debug, Clone)]
pub struct DuplicateReport {
    /// Posts that are part of at least one pair at or above the threshold.
    pub duplicate_ids: BTreeSet<PostId>,
    /// Zero-diagonal similarity matrix in batch order.
    pub similarity: SimilarityMatrix,
    /// Duplicate-group id per post, in batch order. Singletons get their
    /// own group.
    pub group_ids: Vec<usize>,
    /// Size of each group, indexed by group id.
    pub group_sizes: Vec<usize>,
    /// Per post: true when no usable embedding was produced.
    pub embedding_failed: Vec<bool>,
}

impl DuplicateReport {
    /// Number of posts whose embedding failed.
    pub fn embedding_failures(&self) -> usize {
        self.embedding_failed.iter().filter(|f| **f).count()
    }

    /// Group size for the post at `index`.
    pub fn group_size_of(&self, index: usize) -> usize {
        self.group_ids
            .get(index)
            .and_then(|g| self.group_sizes.get(*g))
            .copied()
            .unwrap_or(1)
    }
}

/// Embed, compare and group a batch.
///
/// `clean_texts` must be aligned with `posts`. Identical cleaned texts are
/// embedded once. A text the embedder cannot handle gets a zero row in the
/// similarity matrix and is flagged in `embedding_failed`.
pub async fn detect_duplicates(
    posts: &[Post],
    clean_texts: &[String],
    embedder: &dyn Embedder,
    threshold: f64,
    chunk_rows: usize,
) -> PipelineResult<DuplicateReport> {
    let (unique_texts, slot_of) = dedupe_texts(clean_texts);
    let unique_vectors = embed_or_neutral(embedder, &unique_texts).await;

    let embeddings: Vec<Option<Vec<f64>>> = slot_of
        .iter()
        .map(|&slot| unique_vectors.get(slot).cloned().flatten())
        .collect();
    let embedding_failed: Vec<bool> = embeddings.iter().map(Option::is_none).collect();

    let failures = embedding_failed.iter().filter(|f| **f).count();
    if failures > 0 {
        warn!(
            failures,
            provider = embedder.name(),
            "Some posts could not be embedded; they get zero similarity"
        );
    }

    let similarity = SimilarityMatrix::compute_chunked(embeddings, chunk_rows).await?;

    let duplicate_ids = near_duplicate_indices(&similarity, threshold)
        .into_iter()
        .map(|i| posts[i].post_id.clone())
        .collect::<BTreeSet<_>>();

    let group_ids = complete_linkage_groups(&similarity, threshold);
    let group_sizes = group_sizes(&group_ids);

    info!(
        posts = posts.len(),
        unique_texts = unique_texts.len(),
        duplicates = duplicate_ids.len(),
        groups = group_sizes.len(),
        "Duplicate detection complete"
    );

    Ok(DuplicateReport {
        duplicate_ids,
        similarity,
        group_ids,
        group_sizes,
        embedding_failed,
    })
}

/// Collapse repeated texts. Returns the distinct texts in first-seen order
/// and, per input, the index of its distinct text.
fn dedupe_texts(texts: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut unique = Vec::new();
    let mut slot_of = Vec::with_capacity(texts.len());

    for text in texts {
        let slot = *seen.entry(text.as_str()).or_insert_with(|| {
            unique.push(text.clone());
            unique.len() - 1
        });
        slot_of.push(slot);
    }
    (unique, slot_of)
}

/// Indices of posts in any pair with similarity at or above the threshold.
pub fn near_duplicate_indices(similarity: &SimilarityMatrix, threshold: f64) -> BTreeSet<usize> {
    let n = similarity.len();
    let mut out = BTreeSet::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if similarity.get(i, j) + THRESHOLD_EPS >= threshold {
                out.insert(i);
                out.insert(j);
            }
        }
    }
    out
}

/// Complete-linkage agglomerative clustering on `1 - similarity`, cut at
/// `1 - threshold`.
///
/// Uses the nearest-neighbour chain algorithm: O(n^2) time with an n x n
/// working distance table. Complete linkage is reducible, so every merge
/// above the cut only ever produces parents above the cut, and applying the
/// merges at or below it yields exactly the flat clustering at that height.
///
/// Returns one group id per post, numbered in order of each group's first
/// post.
pub fn complete_linkage_groups(similarity: &SimilarityMatrix, threshold: f64) -> Vec<usize> {
    let n = similarity.len();
    if n == 0 {
        return Vec::new();
    }

    let cutoff = (1.0 - threshold) + THRESHOLD_EPS;
    let mut dist: Vec<f64> = (0..n * n)
        .map(|k| 1.0 - similarity.get(k / n, k % n))
        .collect();
    let mut active = vec![true; n];
    let mut remaining = n;
    let mut sets = UnionFind::new(n);
    let mut chain: Vec<usize> = Vec::with_capacity(n);

    while remaining > 1 {
        if chain.is_empty() {
            let Some(start) = active.iter().position(|a| *a) else {
                break;
            };
            chain.push(start);
        }

        let a = chain[chain.len() - 1];
        let prev = (chain.len() >= 2).then(|| chain[chain.len() - 2]);

        // Nearest active neighbour of `a`. Ties go to the previous chain
        // element so the chain always terminates in a reciprocal pair.
        let mut best = prev;
        let mut best_d = prev.map_or(f64::INFINITY, |p| dist[a * n + p]);
        for b in 0..n {
            if b == a || !active[b] {
                continue;
            }
            let d = dist[a * n + b];
            if d < best_d {
                best = Some(b);
                best_d = d;
            }
        }
        let Some(b) = best else {
            break;
        };

        if Some(b) != prev {
            chain.push(b);
            continue;
        }

        chain.truncate(chain.len() - 2);
        let (keep, gone) = (a.min(b), a.max(b));
        if best_d <= cutoff {
            sets.union(keep, gone);
        }
        for k in 0..n {
            if !active[k] || k == keep || k == gone {
                continue;
            }
            let d = dist[keep * n + k].max(dist[gone * n + k]);
            dist[keep * n + k] = d;
            dist[k * n + keep] = d;
        }
        active[gone] = false;
        remaining -= 1;
    }

    let mut label_of_root: HashMap<usize, usize> = HashMap::new();
    (0..n)
        .map(|i| {
            let root = sets.find(i);
            let next = label_of_root.len();
            *label_of_root.entry(root).or_insert(next)
        })
        .collect()
}

fn group_sizes(group_ids: &[usize]) -> Vec<usize> {
    let count = group_ids.iter().max().map_or(0, |m| m + 1);
    let mut sizes = vec![0; count];
    for g in group_ids {
        sizes[*g] += 1;
    }
    sizes
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f64]]) -> SimilarityMatrix {
        SimilarityMatrix::from_rows(rows.iter().map(|r| r.to_vec()).collect())
    }

    #[test]
    fn test_dedupe_texts_keeps_first_seen_order() {
        let texts = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let (unique, slots) = dedupe_texts(&texts);
        assert_eq!(unique, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(slots, vec![0, 1, 0]);
    }

    #[test]
    fn test_pairs_at_threshold_are_duplicates() {
        let m = matrix(&[&[0.0, 0.85, 0.1], &[0.85, 0.0, 0.1], &[0.1, 0.1, 0.0]]);
        let dupes = near_duplicate_indices(&m, 0.85);
        assert_eq!(dupes.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_complete_linkage_does_not_chain() {
        // 0~1 and 1~2 clear the threshold but 0~2 does not. Complete
        // linkage must not put all three together.
        let m = matrix(&[
            &[0.0, 0.95, 0.5],
            &[0.95, 0.0, 0.9],
            &[0.5, 0.9, 0.0],
        ]);
        let groups = complete_linkage_groups(&m, 0.85);
        assert_eq!(groups, vec![0, 0, 1]);
    }

    #[test]
    fn test_two_separate_groups_and_a_singleton() {
        let m = matrix(&[
            &[0.0, 0.99, 0.0, 0.0, 0.0],
            &[0.99, 0.0, 0.0, 0.0, 0.0],
            &[0.0, 0.0, 0.0, 0.0, 0.0],
            &[0.0, 0.0, 0.0, 0.0, 0.9],
            &[0.0, 0.0, 0.0, 0.9, 0.0],
        ]);
        let groups = complete_linkage_groups(&m, 0.85);
        assert_eq!(groups, vec![0, 0, 1, 2, 2]);
        assert_eq!(group_sizes(&groups), vec![2, 1, 2]);
    }

    #[test]
    fn test_everything_identical_is_one_group() {
        let n = 6;
        let rows: Vec<Vec<f64>> = (0..n).map(|_| vec![1.0; n]).collect();
        let groups = complete_linkage_groups(&SimilarityMatrix::from_rows(rows), 0.85);
        assert!(groups.iter().all(|g| *g == 0));
    }

    #[test]
    fn test_empty_and_single() {
        assert!(complete_linkage_groups(&matrix(&[]), 0.85).is_empty());
        assert_eq!(complete_linkage_groups(&matrix(&[&[0.0]]), 0.85), vec![0]);
        assert!(near_duplicate_indices(&matrix(&[&[0.0]]), 0.85).is_empty());
    }
}
