//! Bagged random forest built on a dedicated rayon worker pool
//!
//! Each tree receives its own `ChaCha20Rng` seed drawn up front from the
//! forest generator, so the fitted ensemble depends only on `random_state`
//! and never on how trees are scheduled across workers. Bootstrap resampling
//! is expressed as integer sample weights (the draw count of every row).
//!
//! Warm starting keeps the trees already grown and adds the missing ones.
//! Because the per-tree seeds are a prefix-stable sequence, growing 10 trees
//! and then warm starting to 15 yields the same forest as growing 15 at once.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, log, warn, Level};
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::path::{DecisionPath, MembershipMatrix};
use super::tree::{DecisionTreeClassifier, TreeParams};
use super::DecisionPathClassifier;
use crate::error::{EmbeddingError, Result};
use crate::matrix::FeatureMatrix;

/// Ensemble-level training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    /// Resample rows with replacement for every tree
    pub bootstrap: bool,
    /// Out-of-bag scoring; always rejected at training time
    pub oob_score: bool,
    /// Worker threads; `None` uses every available core
    pub n_jobs: Option<usize>,
    pub random_state: Option<u64>,
    pub verbose: u8,
    pub warm_start: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 10,
            tree: TreeParams::default(),
            bootstrap: true,
            oob_score: false,
            n_jobs: None,
            random_state: None,
            verbose: 0,
            warm_start: false,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EmbeddingError::invalid_argument("n_estimators", "must be positive"));
        }
        if self.n_jobs == Some(0) {
            return Err(EmbeddingError::invalid_argument("n_jobs", "must be positive"));
        }
        self.tree.validate()
    }
}

/// Random forest classifier exposing decision paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: ForestParams,
    trees: Vec<DecisionTreeClassifier>,
    n_features: usize,
    n_classes: usize,
}

impl RandomForestClassifier {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: 0,
            n_classes: 0,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Mutable access, e.g. to raise `n_estimators` before a warm-started refit
    pub fn params_mut(&mut self) -> &mut ForestParams {
        &mut self.params
    }

    pub fn trees(&self) -> &[DecisionTreeClassifier] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Total node count over all trees
    pub fn n_nodes(&self) -> usize {
        self.trees.iter().map(DecisionTreeClassifier::n_nodes).sum()
    }

    /// Grow the forest on `(x, y)`, blocking until every tree is fit
    pub fn fit(&mut self, x: &DMatrix<f64>, y: &[usize]) -> Result<()> {
        if self.params.oob_score {
            return Err(EmbeddingError::NotSupported(
                "out-of-bag scoring is undefined for discriminatively relabeled data".to_string(),
            ));
        }
        self.params.validate()?;
        let (n_samples, n_features) = x.shape();
        if n_samples == 0 || n_features == 0 {
            return Err(EmbeddingError::InvalidInput(format!(
                "cannot fit a forest on a ({}, {}) matrix",
                n_samples, n_features
            )));
        }
        if y.len() != n_samples {
            return Err(EmbeddingError::DimensionMismatch {
                expected: n_samples,
                actual: y.len(),
            });
        }

        if !self.params.warm_start {
            self.trees.clear();
        } else if !self.trees.is_empty() && self.n_features != n_features {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.n_features,
                actual: n_features,
            });
        }

        let n_estimators = self.params.n_estimators;
        let existing = self.trees.len();
        if n_estimators < existing {
            return Err(EmbeddingError::invalid_argument(
                "n_estimators",
                format!(
                    "must be at least the {} trees already fit when warm starting, got {}",
                    existing, n_estimators
                ),
            ));
        }
        if n_estimators == existing {
            warn!("Warm-start fitting without increasing n_estimators does not fit new trees");
            return Ok(());
        }

        let mut master = match self.params.random_state {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        let seeds: Vec<u64> = (0..n_estimators).map(|_| master.gen()).collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.n_jobs.unwrap_or(0))
            .build()?;
        let level = if self.params.verbose > 0 { Level::Info } else { Level::Debug };
        let params = &self.params;

        let grown = pool.install(|| {
            seeds[existing..]
                .par_iter()
                .enumerate()
                .map(|(offset, &seed)| -> Result<DecisionTreeClassifier> {
                    let index = existing + offset;
                    log!(level, "Building estimator {} of {}", index + 1, n_estimators);
                    let mut rng = ChaCha20Rng::seed_from_u64(seed);
                    let weights = if params.bootstrap {
                        let mut counts = vec![0.0; n_samples];
                        for _ in 0..n_samples {
                            counts[rng.gen_range(0..n_samples)] += 1.0;
                        }
                        Some(counts)
                    } else {
                        None
                    };
                    let mut tree = DecisionTreeClassifier::new(params.tree.clone());
                    tree.fit(x, y, weights.as_deref(), &mut rng)?;
                    Ok(tree)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        self.trees.extend(grown);
        self.n_features = n_features;
        self.n_classes = y.iter().max().map_or(1, |&label| label + 1);
        log!(
            level,
            "Forest holds {} trees with {} nodes in total",
            self.trees.len(),
            self.n_nodes()
        );
        Ok(())
    }

    fn check_input(&self, x: &FeatureMatrix) -> Result<()> {
        if self.trees.is_empty() {
            return Err(EmbeddingError::UndefinedState(
                "forest has not been fitted".to_string(),
            ));
        }
        if x.ncols() != self.n_features {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.n_features,
                actual: x.ncols(),
            });
        }
        Ok(())
    }

    /// Node offsets per tree; tree `t` owns `offsets[t]..offsets[t + 1]`
    fn node_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.trees.len() + 1);
        offsets.push(0);
        for tree in &self.trees {
            offsets.push(offsets[offsets.len() - 1] + tree.n_nodes());
        }
        offsets
    }

    /// Membership of every row of `x` in every node of every tree
    pub fn decision_path(&self, x: &FeatureMatrix) -> Result<DecisionPath> {
        self.check_input(x)?;
        let node_offsets = self.node_offsets();

        let rows: Vec<Vec<usize>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                self.trees
                    .iter()
                    .zip(&node_offsets)
                    .flat_map(|(tree, &offset)| {
                        tree.decision_path(|feature| x.get(i, feature))
                            .into_iter()
                            .map(move |node| offset + node)
                    })
                    .collect()
            })
            .collect();
        debug!("Extracted decision paths for {} rows", rows.len());

        let indicator = MembershipMatrix::from_rows(node_offsets[self.trees.len()], rows)?;
        Ok(DecisionPath {
            indicator,
            node_offsets,
        })
    }

    /// Leaf reached in every tree, shape `(n_samples, n_estimators)`
    pub fn apply(&self, x: &FeatureMatrix) -> Result<Vec<Vec<usize>>> {
        self.check_input(x)?;
        Ok((0..x.nrows())
            .into_par_iter()
            .map(|i| {
                self.trees
                    .iter()
                    .map(|tree| tree.apply(|feature| x.get(i, feature)))
                    .collect()
            })
            .collect())
    }

    /// Mean leaf class probabilities, shape `(n_samples, n_classes)`
    pub fn predict_proba(&self, x: &FeatureMatrix) -> Result<DMatrix<f64>> {
        self.check_input(x)?;
        let n_trees = self.trees.len() as f64;
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let mut mean = vec![0.0; self.n_classes];
                for tree in &self.trees {
                    let proba = tree.predict_proba(|feature| x.get(i, feature));
                    for (acc, p) in mean.iter_mut().zip(proba) {
                        *acc += p / n_trees;
                    }
                }
                mean
            })
            .collect();
        Ok(DMatrix::from_fn(rows.len(), self.n_classes, |i, k| rows[i][k]))
    }

    /// Most probable class per row
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .row_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &p)| if p > best.1 { (k, p) } else { best })
                    .0
            })
            .collect())
    }

    /// Persist the fitted forest as JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a forest persisted with [`RandomForestClassifier::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl DecisionPathClassifier for RandomForestClassifier {
    fn train(&mut self, x: &DMatrix<f64>, y: &[usize]) -> Result<()> {
        self.fit(x, y)
    }

    fn decision_path(&self, x: &FeatureMatrix) -> Result<DecisionPath> {
        RandomForestClassifier::decision_path(self, x)
    }

    fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}
