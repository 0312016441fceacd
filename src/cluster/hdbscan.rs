//! Hierarchical density-based clustering (HDBSCAN*).
//!
//! The pipeline is the classic one:
//! 1. core distance of each point to its `min_samples`-th nearest neighbour
//!    (the point itself counts as the first),
//! 2. minimum spanning tree over mutual reachability distances,
//! 3. single-linkage dendrogram from the sorted tree edges,
//! 4. condensed tree that drops splits smaller than `min_cluster_size`,
//! 5. excess-of-mass selection of the most stable clusters.
//!
//! Distances are Euclidean. The spanning tree is built with a dense Prim
//! pass, so memory stays linear in the number of points while time is
//! quadratic. Rows are first put in lexicographic order and ties are broken
//! by the lowest index in that order, so the partition does not depend on
//! the order the rows arrive in.

use std::ops::AddAssign;

use rayon::prelude::*;
use tracing::debug;

use super::{CancellationToken, ClusterError, DensityClusterer};

/// Label given to points that belong to no cluster.
pub const NOISE: i64 = -1;

/// HDBSCAN* clusterer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hdbscan {
    min_samples: Option<usize>,
    allow_single_cluster: bool,
}

impl Default for Hdbscan {
    fn default() -> Self {
        Self {
            min_samples: None,
            allow_single_cluster: true,
        }
    }
}

impl Hdbscan {
    /// Clusterer with `min_samples = min_cluster_size` that may return a
    /// single cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Neighbourhood size for core distances; `None` uses the minimum
    /// cluster size.
    pub fn with_min_samples(mut self, min_samples: Option<usize>) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Whether the root of the condensed tree may be selected as the only
    /// cluster.
    pub fn with_allow_single_cluster(mut self, allow: bool) -> Self {
        self.allow_single_cluster = allow;
        self
    }

    /// Cluster `rows`, returning one label per row (`NOISE` or `0..`).
    pub fn fit(
        &self,
        rows: &[Vec<f64>],
        min_cluster_size: usize,
        token: &CancellationToken,
    ) -> Result<Vec<i64>, ClusterError> {
        if min_cluster_size < 2 {
            return Err(ClusterError::InvalidParameter(format!(
                "min_cluster_size must be at least 2, got {min_cluster_size}"
            )));
        }
        let min_samples = self.min_samples.unwrap_or(min_cluster_size);
        if min_samples == 0 {
            return Err(ClusterError::InvalidParameter(
                "min_samples must be at least 1".to_string(),
            ));
        }
        let n = rows.len();
        if n < min_cluster_size {
            return Err(ClusterError::InsufficientData {
                available: n,
                required: min_cluster_size,
            });
        }
        let width = rows[0].len();
        if let Some((row, found)) = rows
            .iter()
            .enumerate()
            .map(|(idx, r)| (idx, r.len()))
            .find(|&(_, len)| len != width)
        {
            return Err(ClusterError::DimensionMismatch {
                row,
                expected: width,
                found,
            });
        }

        let order = canonical_order(rows);
        let sorted: Vec<Vec<f64>> = order.iter().map(|&idx| rows[idx].clone()).collect();

        let core = core_distances(&sorted, min_samples, token)?;
        let spanning_tree = minimum_spanning_tree(&sorted, &core, token)?;
        let merges = single_linkage(spanning_tree, n);
        let tree = CondensedTree::build(&merges, n, min_cluster_size);
        let selected = tree.select_clusters(self.allow_single_cluster);
        let sorted_labels = tree.label_points(&selected, self.allow_single_cluster);

        let mut labels = vec![NOISE; n];
        for (slot, &row) in order.iter().enumerate() {
            labels[row] = sorted_labels[slot];
        }

        debug!(
            points = n,
            condensed_clusters = tree.cluster_count,
            selected = selected.iter().filter(|&&s| s).count(),
            "hdbscan fit complete"
        );
        Ok(labels)
    }
}

impl DensityClusterer for Hdbscan {
    fn fit(
        &self,
        rows: &[Vec<f64>],
        min_cluster_size: usize,
        token: &CancellationToken,
    ) -> Result<Vec<i64>, ClusterError> {
        Hdbscan::fit(self, rows, min_cluster_size, token)
    }
}

/// Row indices sorted by row content; equal rows keep their input order.
fn canonical_order(rows: &[Vec<f64>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        rows[a]
            .iter()
            .zip(&rows[b])
            .map(|(x, y)| x.total_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn core_distances(
    rows: &[Vec<f64>],
    min_samples: usize,
    token: &CancellationToken,
) -> Result<Vec<f64>, ClusterError> {
    let rank = (min_samples - 1).min(rows.len() - 1);
    rows.par_iter()
        .map(|row| {
            token.check()?;
            let mut distances: Vec<f64> = rows.iter().map(|other| euclidean(row, other)).collect();
            let (_, kth, _) = distances.select_nth_unstable_by(rank, |a, b| a.total_cmp(b));
            Ok(*kth)
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: usize,
    to: usize,
    weight: f64,
}

/// Dense Prim over mutual reachability; edges come out in insertion order.
fn minimum_spanning_tree(
    rows: &[Vec<f64>],
    core: &[f64],
    token: &CancellationToken,
) -> Result<Vec<Edge>, ClusterError> {
    let n = rows.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut nearest = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[current] = true;
    for _ in 1..n {
        token.check()?;
        let mut next: Option<usize> = None;
        for candidate in 0..n {
            if in_tree[candidate] {
                continue;
            }
            let reach = euclidean(&rows[current], &rows[candidate])
                .max(core[current])
                .max(core[candidate]);
            if reach < best[candidate] {
                best[candidate] = reach;
                nearest[candidate] = current;
            }
            if next.map_or(true, |chosen| best[candidate] < best[chosen]) {
                next = Some(candidate);
            }
        }
        let Some(next) = next else { break };
        edges.push(Edge {
            from: nearest[next],
            to: next,
            weight: best[next],
        });
        in_tree[next] = true;
        current = next;
    }
    Ok(edges)
}

/// Dendrogram node `n + i` is the result of `merges[i]`; nodes below `n` are
/// points.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

fn single_linkage(mut edges: Vec<Edge>, n: usize) -> Vec<Merge> {
    edges.sort_by(|a, b| a.weight.total_cmp(&b.weight));

    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut size = vec![1usize; 2 * n - 1];
    let mut merges = Vec::with_capacity(n - 1);

    for (offset, edge) in edges.into_iter().enumerate() {
        let node = n + offset;
        let left = find_root(&mut parent, edge.from);
        let right = find_root(&mut parent, edge.to);
        let merged = size[left] + size[right];
        parent[left] = node;
        parent[right] = node;
        size[node] = merged;
        merges.push(Merge {
            left,
            right,
            distance: edge.weight,
            size: merged,
        });
    }
    merges
}

fn find_root(parent: &mut [usize], mut node: usize) -> usize {
    let mut root = node;
    while parent[root] != root {
        root = parent[root];
    }
    while parent[node] != root {
        let up = parent[node];
        parent[node] = root;
        node = up;
    }
    root
}

/// Dendrogram node followed by all of its descendants, breadth first.
fn descendants(merges: &[Merge], n: usize, node: usize) -> Vec<usize> {
    let mut order = vec![node];
    let mut cursor = 0;
    while cursor < order.len() {
        let current = order[cursor];
        if current >= n {
            let merge = merges[current - n];
            order.push(merge.left);
            order.push(merge.right);
        }
        cursor += 1;
    }
    order
}

fn node_size(merges: &[Merge], n: usize, node: usize) -> usize {
    if node < n {
        1
    } else {
        merges[node - n].size
    }
}

/// Excess of mass, with points that leave at infinite density counted apart
/// from the finite part so duplicate points still compare sensibly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Stability {
    infinite: usize,
    finite: f64,
}

impl Stability {
    fn accumulate(&mut self, lambda: f64, birth: f64, size: usize) {
        if lambda.is_infinite() {
            if birth.is_finite() {
                self.infinite += size;
            }
        } else {
            self.finite += (lambda - birth) * size as f64;
        }
    }

    fn exceeds(&self, other: &Self) -> bool {
        self.infinite > other.infinite
            || (self.infinite == other.infinite && self.finite > other.finite)
    }
}

impl AddAssign for Stability {
    fn add_assign(&mut self, rhs: Self) {
        self.infinite += rhs.infinite;
        self.finite += rhs.finite;
    }
}

/// Condensed-tree edge. `parent` is a cluster index (0 is the root); `child`
/// is a point when `child_cluster` is `None`.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    child_cluster: Option<usize>,
    lambda: f64,
    child_size: usize,
}

#[derive(Debug)]
struct CondensedTree {
    points: usize,
    cluster_count: usize,
    edges: Vec<CondensedEdge>,
}

impl CondensedTree {
    fn build(merges: &[Merge], n: usize, min_cluster_size: usize) -> Self {
        let root = 2 * n - 2;
        let mut cluster_of = vec![0usize; 2 * n - 1];
        let mut ignore = vec![false; 2 * n - 1];
        let mut cluster_count = 1;
        let mut edges = Vec::new();

        for node in descendants(merges, n, root) {
            if node < n || ignore[node] {
                continue;
            }
            let merge = merges[node - n];
            let lambda = if merge.distance > 0.0 {
                1.0 / merge.distance
            } else {
                f64::INFINITY
            };
            let parent = cluster_of[node];
            let left_big = node_size(merges, n, merge.left) >= min_cluster_size;
            let right_big = node_size(merges, n, merge.right) >= min_cluster_size;

            match (left_big, right_big) {
                (true, true) => {
                    for child in [merge.left, merge.right] {
                        cluster_of[child] = cluster_count;
                        edges.push(CondensedEdge {
                            parent,
                            child,
                            child_cluster: Some(cluster_count),
                            lambda,
                            child_size: node_size(merges, n, child),
                        });
                        cluster_count += 1;
                    }
                }
                (false, false) => {
                    for child in [merge.left, merge.right] {
                        shed(merges, n, child, parent, lambda, &mut edges, &mut ignore);
                    }
                }
                (true, false) => {
                    cluster_of[merge.left] = parent;
                    shed(merges, n, merge.right, parent, lambda, &mut edges, &mut ignore);
                }
                (false, true) => {
                    cluster_of[merge.right] = parent;
                    shed(merges, n, merge.left, parent, lambda, &mut edges, &mut ignore);
                }
            }
        }

        Self {
            points: n,
            cluster_count,
            edges,
        }
    }

    fn child_clusters(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.cluster_count];
        for edge in &self.edges {
            if let Some(child) = edge.child_cluster {
                children[edge.parent].push(child);
            }
        }
        children
    }

    fn stabilities(&self) -> Vec<Stability> {
        let mut birth = vec![0.0; self.cluster_count];
        for edge in &self.edges {
            if let Some(child) = edge.child_cluster {
                birth[child] = edge.lambda;
            }
        }
        let mut stability = vec![Stability::default(); self.cluster_count];
        for edge in &self.edges {
            stability[edge.parent].accumulate(edge.lambda, birth[edge.parent], edge.child_size);
        }
        stability
    }

    /// Excess-of-mass selection, leaves first.
    fn select_clusters(&self, allow_single_cluster: bool) -> Vec<bool> {
        let children = self.child_clusters();
        let mut stability = self.stabilities();
        let mut selected = vec![true; self.cluster_count];
        if !allow_single_cluster {
            selected[0] = false;
        }

        for cluster in (0..self.cluster_count).rev() {
            if cluster == 0 && !allow_single_cluster {
                continue;
            }
            let mut subtree = Stability::default();
            for &child in &children[cluster] {
                subtree += stability[child];
            }
            if subtree.exceeds(&stability[cluster]) {
                selected[cluster] = false;
                stability[cluster] = subtree;
            } else {
                let mut stack = children[cluster].clone();
                while let Some(below) = stack.pop() {
                    selected[below] = false;
                    stack.extend_from_slice(&children[below]);
                }
            }
        }
        selected
    }

    fn label_points(&self, selected: &[bool], allow_single_cluster: bool) -> Vec<i64> {
        let mut cluster_parent = vec![None; self.cluster_count];
        let mut point_cluster = vec![0usize; self.points];
        let mut point_lambda = vec![0.0; self.points];
        let mut root_lambda = f64::NEG_INFINITY;

        for edge in &self.edges {
            match edge.child_cluster {
                Some(child) => cluster_parent[child] = Some(edge.parent),
                None => {
                    point_cluster[edge.child] = edge.parent;
                    point_lambda[edge.child] = edge.lambda;
                }
            }
            if edge.parent == 0 {
                root_lambda = root_lambda.max(edge.lambda);
            }
        }

        let mut label_of = vec![NOISE; self.cluster_count];
        let mut next_label = 0;
        for (cluster, &chosen) in selected.iter().enumerate() {
            if chosen {
                label_of[cluster] = next_label;
                next_label += 1;
            }
        }

        (0..self.points)
            .map(|point| {
                let mut cluster = point_cluster[point];
                while !selected[cluster] {
                    match cluster_parent[cluster] {
                        Some(up) => cluster = up,
                        None => return NOISE,
                    }
                }
                if cluster == 0 && !(allow_single_cluster && point_lambda[point] >= root_lambda) {
                    NOISE
                } else {
                    label_of[cluster]
                }
            })
            .collect()
    }
}

/// Every point under `node` leaves `parent` at `lambda`.
fn shed(
    merges: &[Merge],
    n: usize,
    node: usize,
    parent: usize,
    lambda: f64,
    edges: &mut Vec<CondensedEdge>,
    ignore: &mut [bool],
) {
    for below in descendants(merges, n, node) {
        if below < n {
            edges.push(CondensedEdge {
                parent,
                child: below,
                child_cluster: None,
                lambda,
                child_size: 1,
            });
        }
        ignore[below] = true;
    }
}
