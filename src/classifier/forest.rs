//! CART decision trees and bootstrap-aggregated forests
//!
//! Trees split on Gini impurity with midpoint thresholds. Nodes are stored in
//! a flat vector in preorder, so every child index is greater than its
//! parent's; `validate` relies on that to rule out cycles in loaded models.

use crate::features::NUM_FEATURES;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) type FeatureVector = [f64; NUM_FEATURES];

/// Minimum number of rows a node needs before it may split
const MIN_SAMPLES_SPLIT: usize = 2;

/// Tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Node {
    Leaf {
        class: u8,
    },
    /// Rows with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Growth limits shared by every tree of a forest
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: Option<usize>,
    pub max_features: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Grow a tree on the rows selected by `indices`
    pub fn fit(
        data: &[FeatureVector],
        labels: &[u8],
        indices: Vec<usize>,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut builder = TreeBuilder {
            data,
            labels,
            params,
            nodes: Vec::new(),
        };
        builder.grow(indices, 0, rng);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Class code for a feature vector, or `None` if the tree is malformed
    pub fn predict(&self, x: &FeatureVector) -> Option<u8> {
        let mut idx = 0;
        // Preorder layout bounds any root-to-leaf walk by the node count
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx)? {
                Node::Leaf { class } => return Some(*class),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if *x.get(*feature)? <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
        None
    }

    /// Structural check for trees read back from an artifact
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= NUM_FEATURES {
                    return Err(format!("node {idx} splits on unknown feature {feature}"));
                }
                if !threshold.is_finite() {
                    return Err(format!("node {idx} has non-finite threshold"));
                }
                let len = self.nodes.len();
                if *left <= idx || *right <= idx || *left >= len || *right >= len {
                    return Err(format!("node {idx} has invalid child indices"));
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

struct TreeBuilder<'a> {
    data: &'a [FeatureVector],
    labels: &'a [u8],
    params: &'a TreeParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl TreeBuilder<'_> {
    /// Append the subtree for `indices` and return its root index
    fn grow(&mut self, indices: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> usize {
        let node_idx = self.nodes.len();
        let counts = class_counts(self.labels, &indices);
        let leaf = Node::Leaf {
            class: majority(&counts),
        };
        self.nodes.push(leaf);

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if counts.len() < 2 || indices.len() < MIN_SAMPLES_SPLIT || depth_reached {
            return node_idx;
        }

        let Some(split) = self.best_split(&indices, &counts, rng) else {
            return node_idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.data[i][split.feature] <= split.threshold);

        let left = self.grow(left_rows, depth + 1, rng);
        let right = self.grow(right_rows, depth + 1, rng);
        self.nodes[node_idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };

        node_idx
    }

    /// Best split over a random feature subset, widening to the remaining
    /// features only if the subset has no usable split
    fn best_split(
        &self,
        indices: &[usize],
        counts: &BTreeMap<u8, usize>,
        rng: &mut ChaCha8Rng,
    ) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..NUM_FEATURES).collect();
        features.shuffle(rng);
        let k = self.params.max_features.clamp(1, NUM_FEATURES);

        let parent_impurity = gini(counts, indices.len());
        let search = |candidates: &[usize]| {
            candidates
                .iter()
                .filter_map(|&f| self.best_split_on(indices, counts, f))
                .filter(|s| s.impurity < parent_impurity - 1e-12)
                .min_by(|a, b| a.impurity.total_cmp(&b.impurity))
        };

        search(&features[..k]).or_else(|| search(&features[k..]))
    }

    fn best_split_on(
        &self,
        indices: &[usize],
        counts: &BTreeMap<u8, usize>,
        feature: usize,
    ) -> Option<BestSplit> {
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| self.data[a][feature].total_cmp(&self.data[b][feature]));

        let total = order.len();
        let mut left: BTreeMap<u8, usize> = BTreeMap::new();
        let mut right = counts.clone();
        let mut best: Option<BestSplit> = None;

        for pos in 0..total - 1 {
            let row = order[pos];
            let class = self.labels[row];
            *left.entry(class).or_insert(0) += 1;
            if let Some(count) = right.get_mut(&class) {
                *count -= 1;
            }

            let lo = self.data[row][feature];
            let hi = self.data[order[pos + 1]][feature];
            if lo >= hi {
                continue;
            }

            let n_left = pos + 1;
            let n_right = total - n_left;
            let impurity = (n_left as f64 * gini(&left, n_left)
                + n_right as f64 * gini(&right, n_right))
                / total as f64;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                best = Some(BestSplit {
                    feature,
                    threshold: midpoint(lo, hi),
                    impurity,
                });
            }
        }

        best
    }
}

/// Bagged ensemble of decision trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Forest {
    trees: Vec<DecisionTree>,
}

impl Forest {
    /// Fit `num_trees` trees, each on a bootstrap resample of the rows
    pub fn fit(
        data: &[FeatureVector],
        labels: &[u8],
        num_trees: usize,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let n = data.len();
        if n == 0 {
            return Self { trees: Vec::new() };
        }
        let trees = (0..num_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(data, labels, bootstrap, params, rng)
            })
            .collect();
        Self { trees }
    }

    pub fn from_trees(trees: Vec<DecisionTree>) -> Self {
        Self { trees }
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Majority vote; ties go to the lowest class code.
    ///
    /// Returns `None` if no tree produced a vote.
    pub fn predict(&self, x: &FeatureVector) -> Option<u8> {
        let mut votes: BTreeMap<u8, usize> = BTreeMap::new();
        for class in self.trees.iter().filter_map(|tree| tree.predict(x)) {
            *votes.entry(class).or_insert(0) += 1;
        }
        if votes.is_empty() {
            return None;
        }
        Some(majority(&votes))
    }
}

fn class_counts(labels: &[u8], indices: &[usize]) -> BTreeMap<u8, usize> {
    let mut counts = BTreeMap::new();
    for &i in indices {
        *counts.entry(labels[i]).or_insert(0) += 1;
    }
    counts
}

/// Most frequent class, lowest code on ties
fn majority(counts: &BTreeMap<u8, usize>) -> u8 {
    let mut best = (0u8, 0usize);
    for (&class, &count) in counts {
        if count > best.1 {
            best = (class, count);
        }
    }
    best.0
}

fn gini(counts: &BTreeMap<u8, usize>, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Threshold strictly below `hi` so that `hi` always goes right
fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid < hi {
        mid
    } else {
        lo
    }
}
