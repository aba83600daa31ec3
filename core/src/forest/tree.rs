//! CART decision tree classifier with decision-path extraction
//!
//! Trees are stored as flat node arrays: node `0` is the root and every
//! internal node records the feature, threshold and child ids of its split.
//! Samples with `x[feature] <= threshold` go left.
//!
//! # Growth Strategies
//! - **Depth-first** when `max_leaf_nodes` is unset: every splittable node is
//!   split until a stopping rule fires.
//! - **Best-first** when `max_leaf_nodes` is set: the frontier node with the
//!   largest weighted impurity decrease is split next, until the leaf budget
//!   is exhausted.
//!
//! # Impurity
//! ```text
//! gini(t)    = 1 - Σ_k p_k²
//! entropy(t) = -Σ_k p_k log₂ p_k
//! ```
//! Split quality is the weighted impurity decrease
//! `N_t / N * (impurity - N_l / N_t * impurity_l - N_r / N_t * impurity_r)`.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};

/// Values closer than this are treated as equal when placing thresholds
const FEATURE_THRESHOLD: f64 = 1e-7;

/// Impurity at or below this is considered pure
const IMPURITY_EPSILON: f64 = 1e-7;

/// Upper bound on the preallocated length of a decision path
const PATH_CAPACITY: usize = 32;

/// Split quality criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    #[default]
    Gini,
    Entropy,
}

impl Criterion {
    /// Impurity of a weighted class histogram
    pub fn impurity(&self, class_weights: &[f64]) -> f64 {
        let total: f64 = class_weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => {
                1.0 - class_weights
                    .iter()
                    .map(|&w| (w / total).powi(2))
                    .sum::<f64>()
            }
            Criterion::Entropy => class_weights
                .iter()
                .filter(|&&w| w > 0.0)
                .map(|&w| {
                    let p = w / total;
                    -p * p.log2()
                })
                .sum(),
        }
    }
}

/// Number of features drawn as split candidates at every node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    /// `sqrt(n_features)`, the classification default
    #[default]
    Auto,
    Sqrt,
    Log2,
    All,
    Count(usize),
    Fraction(f64),
}

impl MaxFeatures {
    /// Resolve to a concrete count in `1..=n_features`
    pub fn resolve(&self, n_features: usize) -> Result<usize> {
        let n = n_features as f64;
        let count = match *self {
            MaxFeatures::Auto | MaxFeatures::Sqrt => n.sqrt() as usize,
            MaxFeatures::Log2 => n.log2() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(count) => {
                if count == 0 || count > n_features {
                    return Err(EmbeddingError::invalid_argument(
                        "max_features",
                        format!("count must be in 1..={}, got {}", n_features, count),
                    ));
                }
                count
            }
            MaxFeatures::Fraction(fraction) => {
                if !(fraction > 0.0 && fraction <= 1.0) {
                    return Err(EmbeddingError::invalid_argument(
                        "max_features",
                        format!("fraction must be in (0, 1], got {}", fraction),
                    ));
                }
                (fraction * n) as usize
            }
        };
        Ok(count.clamp(1, n_features.max(1)))
    }
}

/// Growth limits for a single tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub min_weight_fraction_leaf: f64,
    pub max_features: MaxFeatures,
    pub max_leaf_nodes: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: Some(5),
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_weight_fraction_leaf: 0.0,
            max_features: MaxFeatures::Auto,
            max_leaf_nodes: None,
        }
    }
}

impl TreeParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == Some(0) {
            return Err(EmbeddingError::invalid_argument("max_depth", "must be positive"));
        }
        if self.min_samples_split < 2 {
            return Err(EmbeddingError::invalid_argument(
                "min_samples_split",
                format!("must be at least 2, got {}", self.min_samples_split),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(EmbeddingError::invalid_argument("min_samples_leaf", "must be positive"));
        }
        if !(0.0..=0.5).contains(&self.min_weight_fraction_leaf) {
            return Err(EmbeddingError::invalid_argument(
                "min_weight_fraction_leaf",
                format!("must be in [0, 0.5], got {}", self.min_weight_fraction_leaf),
            ));
        }
        if let Some(max_leaf_nodes) = self.max_leaf_nodes {
            if max_leaf_nodes < 2 {
                return Err(EmbeddingError::invalid_argument(
                    "max_leaf_nodes",
                    format!("must be at least 2, got {}", max_leaf_nodes),
                ));
            }
        }
        if let MaxFeatures::Fraction(fraction) = self.max_features {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(EmbeddingError::invalid_argument(
                    "max_features",
                    format!("fraction must be in (0, 1], got {}", fraction),
                ));
            }
        }
        if let MaxFeatures::Count(0) = self.max_features {
            return Err(EmbeddingError::invalid_argument("max_features", "count must be positive"));
        }
        Ok(())
    }
}

/// One node of a fitted tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Split feature; `None` marks a leaf
    pub feature: Option<usize>,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub depth: usize,
    pub impurity: f64,
    pub n_node_samples: usize,
    pub weighted_n_node_samples: f64,
    /// Weighted class histogram of the training samples reaching the node
    pub value: Vec<f64>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }
}

/// Best split found for a node
#[derive(Debug, Clone)]
struct Split {
    feature: usize,
    threshold: f64,
    improvement: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Frontier entry awaiting its split
#[derive(Debug)]
struct Candidate {
    node: usize,
    split: Split,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Max-heap on improvement; ties go to the older node
    fn cmp(&self, other: &Self) -> Ordering {
        self.split
            .improvement
            .total_cmp(&other.split.improvement)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Pending nodes, LIFO for depth-first growth or a priority queue for best-first
enum Frontier {
    DepthFirst(Vec<Candidate>),
    BestFirst(BinaryHeap<Candidate>),
}

impl Frontier {
    fn push(&mut self, candidate: Candidate) {
        match self {
            Frontier::DepthFirst(stack) => stack.push(candidate),
            Frontier::BestFirst(heap) => heap.push(candidate),
        }
    }

    fn pop(&mut self) -> Option<Candidate> {
        match self {
            Frontier::DepthFirst(stack) => stack.pop(),
            Frontier::BestFirst(heap) => heap.pop(),
        }
    }
}

/// Read-only state shared by every node of one fit
struct GrowthContext<'a> {
    x: &'a DMatrix<f64>,
    y: &'a [usize],
    weights: &'a [f64],
    n_classes: usize,
    max_features: usize,
    min_weight_leaf: f64,
    total_weight: f64,
}

/// CART classification tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    params: TreeParams,
    nodes: Vec<TreeNode>,
    n_features: usize,
    n_classes: usize,
}

impl DecisionTreeClassifier {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            n_features: 0,
            n_classes: 0,
        }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|node| node.depth).max().unwrap_or(0)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Grow the tree on `(x, y)`; `sample_weight` defaults to ones and
    /// zero-weight samples are left out entirely
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        x: &DMatrix<f64>,
        y: &[usize],
        sample_weight: Option<&[f64]>,
        rng: &mut R,
    ) -> Result<()> {
        self.params.validate()?;
        let (n_samples, n_features) = x.shape();
        if n_samples == 0 || n_features == 0 {
            return Err(EmbeddingError::InvalidInput(format!(
                "cannot fit a tree on a ({}, {}) matrix",
                n_samples, n_features
            )));
        }
        if y.len() != n_samples {
            return Err(EmbeddingError::DimensionMismatch {
                expected: n_samples,
                actual: y.len(),
            });
        }
        let ones;
        let weights: &[f64] = match sample_weight {
            Some(weights) if weights.len() != n_samples => {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: n_samples,
                    actual: weights.len(),
                })
            }
            Some(weights) => weights,
            None => {
                ones = vec![1.0; n_samples];
                ones.as_slice()
            }
        };
        if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
            return Err(EmbeddingError::InvalidInput(
                "sample weights must be finite and non-negative".to_string(),
            ));
        }

        let samples: Vec<usize> = (0..n_samples).filter(|&i| weights[i] > 0.0).collect();
        if samples.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "all sample weights are zero".to_string(),
            ));
        }
        let total_weight: f64 = samples.iter().map(|&i| weights[i]).sum();
        let ctx = GrowthContext {
            x,
            y,
            weights,
            n_classes: y.iter().max().map_or(1, |&label| label + 1),
            max_features: self.params.max_features.resolve(n_features)?,
            min_weight_leaf: self.params.min_weight_fraction_leaf * total_weight,
            total_weight,
        };

        self.nodes.clear();
        self.n_features = n_features;
        self.n_classes = ctx.n_classes;

        let mut frontier = match self.params.max_leaf_nodes {
            Some(_) => Frontier::BestFirst(BinaryHeap::new()),
            None => Frontier::DepthFirst(Vec::new()),
        };
        let max_leaves = self.params.max_leaf_nodes.unwrap_or(usize::MAX);
        let mut n_leaves = 1;

        if let Some(candidate) = self.add_node(&ctx, samples, 0, rng) {
            frontier.push(candidate);
        }
        while let Some(Candidate { node, split }) = frontier.pop() {
            if n_leaves >= max_leaves {
                break;
            }
            let depth = self.nodes[node].depth + 1;
            let Split {
                feature,
                threshold,
                left,
                right,
                ..
            } = split;

            let left_candidate = self.add_node(&ctx, left, depth, rng);
            let left_id = self.nodes.len() - 1;
            let right_candidate = self.add_node(&ctx, right, depth, rng);
            let right_id = self.nodes.len() - 1;

            let parent = &mut self.nodes[node];
            parent.feature = Some(feature);
            parent.threshold = threshold;
            parent.left = left_id;
            parent.right = right_id;
            n_leaves += 1;

            // Right first so that depth-first growth expands the left child next
            if let Some(candidate) = right_candidate {
                frontier.push(candidate);
            }
            if let Some(candidate) = left_candidate {
                frontier.push(candidate);
            }
        }

        Ok(())
    }

    /// Append a leaf for `samples` and return its best split, if any
    fn add_node<R: Rng + ?Sized>(
        &mut self,
        ctx: &GrowthContext<'_>,
        samples: Vec<usize>,
        depth: usize,
        rng: &mut R,
    ) -> Option<Candidate> {
        let mut value = vec![0.0; ctx.n_classes];
        for &i in &samples {
            value[ctx.y[i]] += ctx.weights[i];
        }
        let weighted: f64 = value.iter().sum();
        let impurity = self.params.criterion.impurity(&value);
        let id = self.nodes.len();

        self.nodes.push(TreeNode {
            feature: None,
            threshold: 0.0,
            left: id,
            right: id,
            depth,
            impurity,
            n_node_samples: samples.len(),
            weighted_n_node_samples: weighted,
            value,
        });

        let is_leaf = self.params.max_depth.map_or(false, |max| depth >= max)
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
            || weighted < 2.0 * ctx.min_weight_leaf
            || impurity <= IMPURITY_EPSILON;
        if is_leaf {
            return None;
        }

        self.best_split(ctx, &samples, impurity, weighted, rng)
            .map(|split| Candidate { node: id, split })
    }

    /// Exhaustive threshold search over a random subset of features
    fn best_split<R: Rng + ?Sized>(
        &self,
        ctx: &GrowthContext<'_>,
        samples: &[usize],
        impurity: f64,
        weighted: f64,
        rng: &mut R,
    ) -> Option<Split> {
        let criterion = self.params.criterion;
        let min_leaf = self.params.min_samples_leaf;
        let n = samples.len();

        let mut features: Vec<usize> = (0..ctx.x.ncols()).collect();
        features.shuffle(rng);

        let mut best: Option<(usize, usize, f64, f64)> = None; // (feature, position, threshold, child impurity)
        let mut best_order: Vec<usize> = Vec::new();
        let mut visited = 0;

        for feature in features {
            if visited >= ctx.max_features {
                break;
            }
            let mut order = samples.to_vec();
            order.sort_by(|&a, &b| ctx.x[(a, feature)].total_cmp(&ctx.x[(b, feature)]));
            let lo = ctx.x[(order[0], feature)];
            let hi = ctx.x[(order[n - 1], feature)];
            if hi <= lo + FEATURE_THRESHOLD {
                // Constant features do not count against the budget
                continue;
            }
            visited += 1;

            let mut left_value = vec![0.0; ctx.n_classes];
            let mut right_value = vec![0.0; ctx.n_classes];
            for &i in &order {
                right_value[ctx.y[i]] += ctx.weights[i];
            }
            let mut left_weight = 0.0;

            for position in 1..n {
                let moved = order[position - 1];
                left_value[ctx.y[moved]] += ctx.weights[moved];
                right_value[ctx.y[moved]] -= ctx.weights[moved];
                left_weight += ctx.weights[moved];

                let previous = ctx.x[(moved, feature)];
                let current = ctx.x[(order[position], feature)];
                if current <= previous + FEATURE_THRESHOLD {
                    continue;
                }
                if position < min_leaf || n - position < min_leaf {
                    continue;
                }
                let right_weight = weighted - left_weight;
                if left_weight < ctx.min_weight_leaf || right_weight < ctx.min_weight_leaf {
                    continue;
                }

                let child_impurity = left_weight * criterion.impurity(&left_value)
                    + right_weight * criterion.impurity(&right_value);
                if best.map_or(true, |(_, _, _, score)| child_impurity < score) {
                    let mut threshold = 0.5 * (previous + current);
                    if threshold >= current || !threshold.is_finite() {
                        threshold = previous;
                    }
                    best = Some((feature, position, threshold, child_impurity));
                    best_order.clone_from(&order);
                }
            }
        }

        best.map(|(feature, position, threshold, child_impurity)| {
            let improvement =
                weighted / ctx.total_weight * (impurity - child_impurity / weighted);
            Split {
                feature,
                threshold,
                improvement,
                left: best_order[..position].to_vec(),
                right: best_order[position..].to_vec(),
            }
        })
    }

    /// Node ids from the root to the leaf reached by the sample
    pub fn decision_path<F: Fn(usize) -> f64>(&self, feature_value: F) -> Vec<usize> {
        let capacity = self
            .params
            .max_depth
            .map_or(PATH_CAPACITY, |depth| depth.saturating_add(1).min(PATH_CAPACITY));
        let mut path = Vec::with_capacity(capacity);
        let mut id = 0;
        while let Some(node) = self.nodes.get(id) {
            path.push(id);
            match node.feature {
                Some(feature) if feature_value(feature) <= node.threshold => id = node.left,
                Some(_) => id = node.right,
                None => break,
            }
        }
        path
    }

    /// Leaf id reached by the sample
    pub fn apply<F: Fn(usize) -> f64>(&self, feature_value: F) -> usize {
        self.decision_path(feature_value).last().copied().unwrap_or(0)
    }

    /// Class probabilities at the leaf reached by the sample
    pub fn predict_proba<F: Fn(usize) -> f64>(&self, feature_value: F) -> Vec<f64> {
        let Some(leaf) = self.nodes.get(self.apply(feature_value)) else {
            return Vec::new();
        };
        let total = leaf.weighted_n_node_samples;
        leaf.value
            .iter()
            .map(|&w| if total > 0.0 { w / total } else { 0.0 })
            .collect()
    }
}
