// Behavior clusterer: HDBSCAN over standardized post features.
//
// Groups posts whose five-feature profiles sit in dense regions, without a
// preset cluster count, and labels sparse points as noise. Steps:
//
//   1. z-score each feature across the batch
//   2. core distance: distance to the min_samples-th nearest point (self included)
//   3. minimum spanning tree over mutual reachability distance (Prim, dense)
//   4. single-linkage hierarchy from the sorted MST edges
//   5. condensed tree: splits smaller than min_cluster_size become "points
//      falling out" rather than new clusters
//   6. excess-of-mass selection; the root is never selected on its own
//
// Everything is deterministic in input order, so identical inputs give
// identical labels.

use std::collections::HashMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use tracing::info;

/// Distance floor when turning distances into lambdas (1 / distance), so
/// identical points produce a large finite density instead of infinity.
const MIN_DISTANCE: f64 = 1e-12;

/// A post's behavior cluster, or noise.
///
/// Serialized as the cluster id, with noise as -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BehaviorCluster {
    Cluster(usize),
    Noise,
}

impl BehaviorCluster {
    pub fn is_noise(&self) -> bool {
        matches!(self, BehaviorCluster::Noise)
    }

    /// Integer label: the cluster id, or -1 for noise.
    pub fn label(&self) -> i64 {
        match self {
            BehaviorCluster::Cluster(id) => *id as i64,
            BehaviorCluster::Noise => -1,
        }
    }
}

impl std::fmt::Display for BehaviorCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BehaviorCluster::Cluster(id) => write!(f, "{id}"),
            BehaviorCluster::Noise => f.write_str("noise"),
        }
    }
}

impl Serialize for BehaviorCluster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.label())
    }
}

impl<'de> Deserialize<'de> for BehaviorCluster {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = i64::deserialize(deserializer)?;
        match label {
            -1 => Ok(BehaviorCluster::Noise),
            id if id >= 0 => Ok(BehaviorCluster::Cluster(id as usize)),
            other => Err(de::Error::custom(format!(
                "behavior cluster must be -1 or a non-negative id, got {other}"
            ))),
        }
    }
}

/// Cluster label and membership strength for one post.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorAssignment {
    pub cluster: BehaviorCluster,
    /// In [0, 1]; exactly 0 for noise.
    pub confidence: f64,
}

impl BehaviorAssignment {
    const NOISE: BehaviorAssignment = BehaviorAssignment {
        cluster: BehaviorCluster::Noise,
        confidence: 0.0,
    };
}

/// Standardize then cluster. Rows are feature vectors in batch order.
pub fn cluster_behavior<const D: usize>(
    rows: &[[f64; D]],
    min_cluster_size: usize,
) -> Vec<BehaviorAssignment> {
    let scaled = standardize(rows);
    let assignments = hdbscan(&scaled, min_cluster_size);

    let clusters = assignments
        .iter()
        .filter_map(|a| match a.cluster {
            BehaviorCluster::Cluster(id) => Some(id),
            BehaviorCluster::Noise => None,
        })
        .max()
        .map_or(0, |m| m + 1);
    info!(
        posts = rows.len(),
        clusters,
        noise = assignments.iter().filter(|a| a.cluster.is_noise()).count(),
        "Behavior clustering complete"
    );
    assignments
}

/// Z-score each column with the population standard deviation. A column
/// with no variance becomes all zeros.
pub fn standardize<const D: usize>(rows: &[[f64; D]]) -> Vec<[f64; D]> {
    if rows.is_empty() {
        return Vec::new();
    }
    let n = rows.len() as f64;
    let mut out = rows.to_vec();

    for col in 0..D {
        let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for row in &mut out {
            row[col] = if std > 1e-12 {
                (row[col] - mean) / std
            } else {
                0.0
            };
        }
    }
    out
}

fn euclidean<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// HDBSCAN with `min_samples = min_cluster_size` on already-scaled points.
pub fn hdbscan<const D: usize>(points: &[[f64; D]], min_cluster_size: usize) -> Vec<BehaviorAssignment> {
    let n = points.len();
    let m = min_cluster_size.max(2);
    if n < m {
        return vec![BehaviorAssignment::NOISE; n];
    }

    let dist: Vec<f64> = (0..n * n)
        .map(|k| euclidean(&points[k / n], &points[k % n]))
        .collect();
    let core = core_distances(&dist, n, m.min(n));
    let mst = prim_mst(&dist, &core, n);
    let links = single_linkage(mst, n);
    let tree = condense(&links, n, m);
    let selected = select_clusters(&tree, n);
    label_points(&tree, &selected, n)
}

/// Distance to the k-th nearest point, counting the point itself as the
/// first.
fn core_distances(dist: &[f64], n: usize, k: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let mut row = dist[i * n..(i + 1) * n].to_vec();
            row.sort_by(f64::total_cmp);
            row[k - 1]
        })
        .collect()
}

/// Prim's algorithm on the dense mutual reachability graph.
/// Returns n - 1 edges (a, b, weight).
fn prim_mst(dist: &[f64], core: &[f64], n: usize) -> Vec<(usize, usize, f64)> {
    let reach = |a: usize, b: usize| dist[a * n + b].max(core[a]).max(core[b]);

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut best_from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next = None;
        let mut next_d = f64::INFINITY;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = reach(current, j);
            if d < best[j] {
                best[j] = d;
                best_from[j] = current;
            }
            if next.is_none() || best[j] < next_d {
                next = Some(j);
                next_d = best[j];
            }
        }
        let Some(j) = next else {
            break;
        };
        in_tree[j] = true;
        edges.push((best_from[j], j, next_d));
        current = j;
    }
    edges
}

/// Internal node of the single-linkage hierarchy. Node ids below n are
/// points; node `n + t` is `links[t]`.
#[derive(Debug, Clone, Copy)]
struct Link {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

fn single_linkage(mut mst: Vec<(usize, usize, f64)>, n: usize) -> Vec<Link> {
    mst.sort_by(|a, b| a.2.total_cmp(&b.2));

    // Union-find whose roots remember the hierarchy node they represent.
    let mut parent: Vec<usize> = (0..n).collect();
    let mut node_of: Vec<usize> = (0..n).collect();
    let mut size = vec![1usize; n];
    let mut links = Vec::with_capacity(n.saturating_sub(1));

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (a, b, w) in mst {
        let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
        if ra == rb {
            continue;
        }
        let merged = size[ra] + size[rb];
        links.push(Link {
            left: node_of[ra],
            right: node_of[rb],
            distance: w,
            size: merged,
        });
        parent[rb] = ra;
        size[ra] = merged;
        node_of[ra] = n + links.len() - 1;
    }
    links
}

/// Edge of the condensed tree. `child` below n is a point falling out of
/// `parent`; otherwise it is a child cluster label. Cluster labels start at
/// n (the root).
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

fn condense(links: &[Link], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    if links.is_empty() {
        return Vec::new();
    }
    let root = n + links.len() - 1;
    let node_size = |node: usize| if node < n { 1 } else { links[node - n].size };
    let children = |node: usize| {
        let l = links[node - n];
        [l.left, l.right]
    };

    let leaves_under = |node: usize| -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(x) = stack.pop() {
            if x < n {
                out.push(x);
            } else {
                stack.extend(children(x));
            }
        }
        out
    };

    let mut relabel = vec![0usize; root + 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut edges = Vec::new();

    // Breadth-first so a parent is always relabelled before its children.
    let mut queue = std::collections::VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if node < n {
            continue;
        }
        let link = links[node - n];
        let lambda = 1.0 / link.distance.max(MIN_DISTANCE);
        let parent_label = relabel[node];
        let (left, right) = (link.left, link.right);
        let (ls, rs) = (node_size(left), node_size(right));

        match (ls >= min_cluster_size, rs >= min_cluster_size) {
            (true, true) => {
                for (child, size) in [(left, ls), (right, rs)] {
                    relabel[child] = next_label;
                    edges.push(CondensedEdge {
                        parent: parent_label,
                        child: next_label,
                        lambda,
                        size,
                    });
                    next_label += 1;
                    queue.push_back(child);
                }
            }
            (false, false) => {
                for child in [left, right] {
                    for point in leaves_under(child) {
                        edges.push(CondensedEdge {
                            parent: parent_label,
                            child: point,
                            lambda,
                            size: 1,
                        });
                    }
                }
            }
            (big_left, _) => {
                let (keep, shed) = if big_left { (left, right) } else { (right, left) };
                relabel[keep] = parent_label;
                queue.push_back(keep);
                for point in leaves_under(shed) {
                    edges.push(CondensedEdge {
                        parent: parent_label,
                        child: point,
                        lambda,
                        size: 1,
                    });
                }
            }
        }
    }
    edges
}

/// Excess-of-mass selection. Returns the selected cluster labels.
fn select_clusters(tree: &[CondensedEdge], n: usize) -> Vec<usize> {
    let Some(max_label) = tree.iter().map(|e| e.parent.max(e.child)).max() else {
        return Vec::new();
    };
    if max_label <= n {
        return Vec::new();
    }
    let count = max_label - n + 1;
    let idx = |label: usize| label - n;

    let mut birth = vec![0.0_f64; count];
    let mut child_clusters: Vec<Vec<usize>> = vec![Vec::new(); count];
    for e in tree.iter().filter(|e| e.child >= n) {
        birth[idx(e.child)] = e.lambda;
        child_clusters[idx(e.parent)].push(e.child);
    }

    let mut stability = vec![0.0_f64; count];
    for e in tree {
        let p = idx(e.parent);
        stability[p] += (e.lambda - birth[p]) * e.size as f64;
    }

    let mut selected = vec![false; count];
    // Children always carry larger labels than their parents.
    for label in ((n + 1)..=max_label).rev() {
        let i = idx(label);
        let subtree: f64 = child_clusters[i].iter().map(|c| stability[idx(*c)]).sum();
        if subtree > stability[i] {
            stability[i] = subtree;
        } else {
            selected[i] = true;
            let mut stack = child_clusters[i].clone();
            while let Some(c) = stack.pop() {
                selected[idx(c)] = false;
                stack.extend(child_clusters[idx(c)].iter().copied());
            }
        }
    }

    (0..count)
        .filter(|i| selected[*i])
        .map(|i| i + n)
        .collect()
}

fn label_points(tree: &[CondensedEdge], selected: &[usize], n: usize) -> Vec<BehaviorAssignment> {
    let mut out = vec![BehaviorAssignment::NOISE; n];
    if selected.is_empty() {
        return out;
    }

    let cluster_parent: HashMap<usize, usize> = tree
        .iter()
        .filter(|e| e.child >= n)
        .map(|e| (e.child, e.parent))
        .collect();

    // Nearest selected ancestor of a cluster label, if any.
    let owner = |mut label: usize| -> Option<usize> {
        loop {
            if selected.contains(&label) {
                return Some(label);
            }
            label = *cluster_parent.get(&label)?;
        }
    };

    // Largest lambda anywhere in each selected cluster's subtree.
    let mut max_lambda: HashMap<usize, f64> = HashMap::new();
    for e in tree {
        if let Some(cluster) = owner(e.parent) {
            let slot = max_lambda.entry(cluster).or_insert(0.0);
            *slot = slot.max(e.lambda);
        }
    }

    let mut raw: Vec<Option<(usize, f64)>> = vec![None; n];
    for e in tree.iter().filter(|e| e.child < n) {
        if let Some(cluster) = owner(e.parent) {
            let max = max_lambda.get(&cluster).copied().unwrap_or(0.0);
            let prob = if max > 0.0 {
                (e.lambda.min(max) / max).clamp(0.0, 1.0)
            } else {
                1.0
            };
            raw[e.child] = Some((cluster, prob));
        }
    }

    // Renumber selected clusters 0.. by first member in batch order.
    let mut ids: HashMap<usize, usize> = HashMap::new();
    for (point, slot) in raw.into_iter().enumerate() {
        if let Some((cluster, prob)) = slot {
            let next = ids.len();
            let id = *ids.entry(cluster).or_insert(next);
            out[point] = BehaviorAssignment {
                cluster: BehaviorCluster::Cluster(id),
                confidence: prob,
            };
        }
    }
    out
}
