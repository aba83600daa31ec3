//! Discriminative dataset construction: real samples against synthetic decoys
//!
//! The unsupervised embedding problem is turned into a binary classification
//! problem. The real rows are stacked above an equal number of synthetic rows,
//! labelled `1` (real) and `0` (synthetic), and both the rows and the labels
//! are shuffled by one shared permutation.
//!
//! # Label Convention
//! ```text
//! REAL_LABEL      = 1
//! SYNTHETIC_LABEL = 0
//! ```
//! The classifier only needs two separable classes, so the literal values carry
//! no meaning beyond being used consistently.
//!
//! The permutation scrambles the original row order irrecoverably. Callers
//! that need the original order keep their own copy of the input.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::debug;
use nalgebra::DMatrix;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::Result;
use crate::matrix::{select_rows, vstack, FeatureMatrix};
use crate::sampling::{generate_synthetic_features, SamplingMethod};

/// Class label of rows drawn from the real dataset
pub const REAL_LABEL: usize = 1;

/// Class label of rows drawn from the synthetic generator
pub const SYNTHETIC_LABEL: usize = 0;

/// Balanced, shuffled real-versus-synthetic training set
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminativeDataset {
    /// Combined feature rows, shape `(2 * n_samples, n_features)`
    pub features: DMatrix<f64>,

    /// One label per combined row
    pub labels: Vec<usize>,
}

impl DiscriminativeDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_real(&self) -> usize {
        self.labels.iter().filter(|&&label| label == REAL_LABEL).count()
    }

    pub fn n_synthetic(&self) -> usize {
        self.labels.iter().filter(|&&label| label == SYNTHETIC_LABEL).count()
    }
}

/// Build the discriminative dataset for `x`
///
/// The same generator drives the synthetic columns and, afterwards, the row
/// permutation, so a fixed seed reproduces the whole dataset.
pub fn generate_discriminative_dataset<R: Rng + ?Sized>(
    x: &FeatureMatrix,
    method: SamplingMethod,
    rng: &mut R,
) -> Result<DiscriminativeDataset> {
    let n_samples = x.nrows();

    let synthetic = generate_synthetic_features(x, method, rng)?;
    let combined = vstack(x.to_dense().as_ref(), &synthetic)?;

    let mut labels = vec![REAL_LABEL; n_samples];
    labels.extend(std::iter::repeat(SYNTHETIC_LABEL).take(n_samples));

    let mut permutation: Vec<usize> = (0..combined.nrows()).collect();
    permutation.shuffle(rng);

    let features = select_rows(&combined, &permutation);
    let labels = permutation.iter().map(|&i| labels[i]).collect();
    debug!(
        "Built discriminative dataset: {} real + {} synthetic rows, {} features",
        n_samples,
        n_samples,
        x.ncols()
    );

    Ok(DiscriminativeDataset { features, labels })
}
