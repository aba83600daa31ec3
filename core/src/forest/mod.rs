//! Tree-ensemble classifier capability
//!
//! The embedding pipeline consumes a classifier through one narrow seam,
//! [`DecisionPathClassifier`]: train on `(X, y)`, then report for arbitrary rows
//! which internal and leaf nodes of the ensemble each row visits. Any
//! implementation honouring that contract can be substituted without touching
//! the pipeline.
//!
//! [`RandomForestClassifier`] is the bundled implementation: bagged CART trees
//! grown in parallel on a dedicated rayon pool.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod ensemble;
pub mod path;
pub mod tree;

pub use ensemble::{ForestParams, RandomForestClassifier};
pub use path::{DecisionPath, MembershipMatrix};
pub use tree::{Criterion, DecisionTreeClassifier, MaxFeatures, TreeNode, TreeParams};

use nalgebra::DMatrix;

use crate::error::Result;
use crate::matrix::FeatureMatrix;

/// Classifier exposing per-sample decision paths
pub trait DecisionPathClassifier: Send + Sync {
    /// Fit on a dense design matrix with one class label per row, blocking
    /// until every member of the ensemble is trained
    fn train(&mut self, x: &DMatrix<f64>, y: &[usize]) -> Result<()>;

    /// Node membership of every row of `x` across the whole ensemble
    fn decision_path(&self, x: &FeatureMatrix) -> Result<DecisionPath>;

    /// Whether a successful `train` has happened
    fn is_trained(&self) -> bool;

    /// Column count seen during training, zero before
    fn n_features(&self) -> usize;
}
