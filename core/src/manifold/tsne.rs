//! Exact t-distributed stochastic neighbour embedding
//!
//! # Algorithm
//! 1. Pairwise distances under the requested metric (squared for Euclidean)
//! 2. Per-row Gaussian bandwidths by binary search on the precision until the
//!    conditional distribution reaches the target perplexity
//! 3. Symmetrised joint probabilities `P = (P + Pᵀ) / sum`
//! 4. Gradient descent on `KL(P || Q)` with a Student-t kernel in the output
//!    space, early exaggeration, momentum and per-coordinate gains
//!
//! The initial layout is drawn from `N(0, 1e-4²)` using a `ChaCha20Rng` seeded
//! from `random_state`, so a reducer with a fixed seed maps identical inputs to
//! identical embeddings. Gradient rows are computed in parallel but every
//! reduction is summed in row order, keeping the result independent of the
//! worker count.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, trace};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{pairwise_distances, DistanceMetric, ManifoldReducer};
use crate::error::{EmbeddingError, Result};

const MACHINE_EPSILON: f64 = f64::EPSILON;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;
const MIN_GAIN: f64 = 0.01;
const INIT_SCALE: f64 = 1e-4;
const CHECK_EVERY: usize = 50;

/// Exact t-SNE reducer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tsne {
    /// Effective number of neighbours; clamped below the sample count
    pub perplexity: f64,
    pub early_exaggeration: f64,
    pub learning_rate: f64,
    /// Total optimisation iterations, exaggerated phase included
    pub n_iter: usize,
    /// Iterations run with exaggerated affinities and low momentum
    pub exploration_iter: usize,
    /// Abort after this many iterations without the error improving
    pub n_iter_without_progress: usize,
    /// Abort once the gradient norm falls below this value
    pub min_grad_norm: f64,
    pub random_state: u64,
}

impl Default for Tsne {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            early_exaggeration: 12.0,
            learning_rate: 200.0,
            n_iter: 1000,
            exploration_iter: 250,
            n_iter_without_progress: 300,
            min_grad_norm: 1e-7,
            random_state: 12345,
        }
    }
}

/// Optimiser state carried across the two descent phases
struct Descent {
    embedding: Vec<f64>,
    update: Vec<f64>,
    gains: Vec<f64>,
    best_error: f64,
    best_iter: usize,
}

impl Tsne {
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.perplexity > 0.0) {
            return Err(EmbeddingError::invalid_argument(
                "perplexity",
                format!("must be positive, got {}", self.perplexity),
            ));
        }
        if !(self.early_exaggeration >= 1.0) {
            return Err(EmbeddingError::invalid_argument(
                "early_exaggeration",
                format!("must be at least 1, got {}", self.early_exaggeration),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(EmbeddingError::invalid_argument(
                "learning_rate",
                format!("must be positive, got {}", self.learning_rate),
            ));
        }
        if self.n_iter == 0 {
            return Err(EmbeddingError::invalid_argument("n_iter", "must be positive"));
        }
        Ok(())
    }

    /// Embed a precomputed distance matrix
    pub fn embed_distances(&self, distances: &DMatrix<f64>, n_components: usize) -> Result<DMatrix<f64>> {
        self.validate()?;
        let n = distances.nrows();
        if distances.ncols() != n {
            return Err(EmbeddingError::DimensionMismatch {
                expected: n,
                actual: distances.ncols(),
            });
        }
        if n < 2 {
            return Err(EmbeddingError::InvalidInput(format!(
                "t-SNE needs at least 2 samples, got {}",
                n
            )));
        }
        if n_components == 0 {
            return Err(EmbeddingError::invalid_argument(
                "n_components",
                "must be positive",
            ));
        }

        let perplexity = self.perplexity.min((n - 1) as f64);
        if perplexity < self.perplexity {
            debug!(
                "Perplexity {} exceeds the {} available neighbours; using {}",
                self.perplexity,
                n - 1,
                perplexity
            );
        }

        let mut p = joint_probabilities(distances, perplexity);
        let degrees_of_freedom = (n_components as f64 - 1.0).max(1.0);

        let mut rng = ChaCha20Rng::seed_from_u64(self.random_state);
        let embedding: Vec<f64> = (0..n * n_components)
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut rng);
                INIT_SCALE * z
            })
            .collect();
        let mut state = Descent {
            embedding,
            update: vec![0.0; n * n_components],
            gains: vec![1.0; n * n_components],
            best_error: f64::INFINITY,
            best_iter: 0,
        };

        let exploration = self.exploration_iter.min(self.n_iter);
        p.iter_mut().for_each(|v| *v *= self.early_exaggeration);
        let done = self.descend(&p, &mut state, 0, exploration, 0.5, n_components, degrees_of_freedom);
        p.iter_mut().for_each(|v| *v /= self.early_exaggeration);

        if exploration < self.n_iter {
            state.best_error = f64::INFINITY;
            state.best_iter = done;
            self.descend(&p, &mut state, done, self.n_iter, 0.8, n_components, degrees_of_freedom);
        }

        let result = DMatrix::from_row_slice(n, n_components, &state.embedding);
        if result.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::Manifold(
                "t-SNE optimisation diverged to non-finite coordinates".to_string(),
            ));
        }
        Ok(result)
    }

    /// Run gradient descent for iterations `start..end`, returning the first
    /// iteration not executed
    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        p: &DMatrix<f64>,
        state: &mut Descent,
        start: usize,
        end: usize,
        momentum: f64,
        n_components: usize,
        degrees_of_freedom: f64,
    ) -> usize {
        for iteration in start..end {
            let check = (iteration + 1) % CHECK_EVERY == 0 || iteration + 1 == end;
            let (error, mut grad) =
                kl_divergence(p, &state.embedding, n_components, degrees_of_freedom, check);

            for k in 0..grad.len() {
                let sign_flipped = state.update[k] * grad[k] < 0.0;
                state.gains[k] = if sign_flipped {
                    state.gains[k] + 0.2
                } else {
                    state.gains[k] * 0.8
                };
                state.gains[k] = state.gains[k].max(MIN_GAIN);
                grad[k] *= state.gains[k];
                state.update[k] = momentum * state.update[k] - self.learning_rate * grad[k];
                state.embedding[k] += state.update[k];
            }

            if check {
                let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                trace!(
                    "Iteration {}: error = {:.7}, gradient norm = {:.7}",
                    iteration + 1,
                    error,
                    grad_norm
                );
                if error < state.best_error {
                    state.best_error = error;
                    state.best_iter = iteration;
                } else if iteration - state.best_iter > self.n_iter_without_progress {
                    debug!("No progress for {} iterations; stopping at {}", self.n_iter_without_progress, iteration + 1);
                    return iteration + 1;
                }
                if grad_norm <= self.min_grad_norm {
                    debug!("Gradient norm {} below threshold; stopping at {}", grad_norm, iteration + 1);
                    return iteration + 1;
                }
            }
        }
        end
    }
}

impl ManifoldReducer for Tsne {
    fn reduce(
        &self,
        fingerprints: &DMatrix<u8>,
        metric: DistanceMetric,
        n_components: usize,
    ) -> Result<DMatrix<f64>> {
        let mut distances = pairwise_distances(fingerprints, metric);
        if metric == DistanceMetric::Euclidean {
            distances.iter_mut().for_each(|d| *d *= *d);
        }
        debug!(
            "Reducing {} fingerprints of {} nodes with {} distance",
            fingerprints.nrows(),
            fingerprints.ncols(),
            metric
        );
        self.embed_distances(&distances, n_components)
    }
}

/// Conditional Gaussian affinities of every row at the requested perplexity
///
/// Distances are shifted by the row's nearest-neighbour distance before
/// exponentiating, so the nearest neighbours always weigh `exp(0) = 1` and the
/// row sum never underflows. When more neighbours tie at the nearest distance
/// than the perplexity allows, the target entropy is unreachable and the row
/// settles on the uniform distribution over the tied neighbours.
fn conditional_probabilities(distances: &DMatrix<f64>, perplexity: f64) -> DMatrix<f64> {
    let n = distances.nrows();
    let desired_entropy = perplexity.ln();

    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let nearest = (0..n)
                .filter(|&j| j != i)
                .map(|j| distances[(i, j)])
                .fold(f64::INFINITY, f64::min);
            let shifted: Vec<f64> = (0..n)
                .map(|j| if j == i { 0.0 } else { distances[(i, j)] - nearest })
                .collect();

            let mut beta = 1.0;
            let mut beta_min = f64::NEG_INFINITY;
            let mut beta_max = f64::INFINITY;
            let mut row = vec![0.0; n];

            for _ in 0..PERPLEXITY_STEPS {
                for j in 0..n {
                    row[j] = if j == i { 0.0 } else { (-shifted[j] * beta).exp() };
                }
                // At least one term is exp(0), so the sum is >= 1
                let sum_p: f64 = row.iter().sum();
                let mut weighted_distance = 0.0;
                for j in 0..n {
                    row[j] /= sum_p;
                    weighted_distance += shifted[j] * row[j];
                }

                let entropy = sum_p.ln() + beta * weighted_distance;
                let diff = entropy - desired_entropy;
                if diff.abs() <= PERPLEXITY_TOLERANCE {
                    break;
                }
                if diff > 0.0 {
                    beta_min = beta;
                    beta = if beta_max == f64::INFINITY { beta * 2.0 } else { (beta + beta_max) / 2.0 };
                } else {
                    beta_max = beta;
                    beta = if beta_min == f64::NEG_INFINITY { beta / 2.0 } else { (beta + beta_min) / 2.0 };
                }
            }
            row
        })
        .collect();

    DMatrix::from_fn(n, n, |i, j| rows[i][j])
}

/// Symmetrised joint probabilities, floored at machine epsilon off the diagonal
fn joint_probabilities(distances: &DMatrix<f64>, perplexity: f64) -> DMatrix<f64> {
    let conditional = conditional_probabilities(distances, perplexity);
    let mut joint = &conditional + conditional.transpose();
    let total = joint.sum().max(MACHINE_EPSILON);
    let n = joint.nrows();
    for i in 0..n {
        for j in 0..n {
            joint[(i, j)] = if i == j {
                0.0
            } else {
                (joint[(i, j)] / total).max(MACHINE_EPSILON)
            };
        }
    }
    joint
}

/// KL divergence (when `with_error`) and its gradient with respect to the
/// row-major embedding
fn kl_divergence(
    p: &DMatrix<f64>,
    embedding: &[f64],
    n_components: usize,
    degrees_of_freedom: f64,
    with_error: bool,
) -> (f64, Vec<f64>) {
    let n = p.nrows();
    let exponent = (degrees_of_freedom + 1.0) / -2.0;
    let point = |i: usize| &embedding[i * n_components..(i + 1) * n_components];

    // Unnormalised Student-t kernel, zero on the diagonal
    let kernel: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let yi = point(i);
            (0..n)
                .map(|j| {
                    if i == j {
                        return 0.0;
                    }
                    let sq: f64 = yi.iter().zip(point(j)).map(|(a, b)| (a - b) * (a - b)).sum();
                    (1.0 + sq / degrees_of_freedom).powf(exponent)
                })
                .collect()
        })
        .collect();
    let total: f64 = kernel.iter().map(|row| row.iter().sum::<f64>()).sum();
    let total = total.max(MACHINE_EPSILON);

    let error = if with_error {
        (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| j != i)
                    .map(|j| {
                        let p_ij = p[(i, j)];
                        let q_ij = (kernel[i][j] / total).max(MACHINE_EPSILON);
                        p_ij * (p_ij.max(MACHINE_EPSILON) / q_ij).ln()
                    })
                    .sum::<f64>()
            })
            .sum()
    } else {
        f64::NAN
    };

    let scale = 2.0 * (degrees_of_freedom + 1.0) / degrees_of_freedom;
    let grad: Vec<f64> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let yi = point(i);
            let mut g = vec![0.0; n_components];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q_ij = (kernel[i][j] / total).max(MACHINE_EPSILON);
                let coefficient = (p[(i, j)] - q_ij) * kernel[i][j];
                for (d, (a, b)) in yi.iter().zip(point(j)).enumerate() {
                    g[d] += coefficient * (a - b);
                }
            }
            g.into_iter().map(move |v| v * scale)
        })
        .collect();

    (error, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters() -> DMatrix<u8> {
        // Rows 0..6 set the low half of the columns, rows 6..12 the high half
        DMatrix::from_fn(12, 16, |i, j| {
            let base = (i < 6 && j < 8) || (i >= 6 && j >= 8);
            (base ^ (j == i % 8)) as u8
        })
    }

    fn quick() -> Tsne {
        Tsne::default().with_n_iter(300).with_perplexity(3.0)
    }

    fn dist(e: &DMatrix<f64>, a: usize, b: usize) -> f64 {
        (e.row(a) - e.row(b)).norm()
    }

    #[test]
    fn test_shape_and_finiteness() {
        let embedding = quick().reduce(&two_clusters(), DistanceMetric::Hamming, 2).unwrap();
        assert_eq!(embedding.shape(), (12, 2));
        assert!(embedding.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let f = two_clusters();
        let a = quick().reduce(&f, DistanceMetric::Hamming, 2).unwrap();
        let b = quick().reduce(&f, DistanceMetric::Hamming, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_clusters_stay_apart() {
        let embedding = quick().reduce(&two_clusters(), DistanceMetric::Hamming, 2).unwrap();
        let mut within = 0.0;
        let mut across = 0.0;
        for a in 0..12 {
            for b in 0..12 {
                if a == b {
                    continue;
                }
                if (a < 6) == (b < 6) {
                    within += dist(&embedding, a, b) / 60.0;
                } else {
                    across += dist(&embedding, a, b) / 72.0;
                }
            }
        }
        assert!(across > within, "across {} within {}", across, within);
    }

    #[test]
    fn test_conditional_rows_are_distributions() {
        let d = pairwise_distances(&two_clusters(), DistanceMetric::Hamming);
        let p = conditional_probabilities(&d, 3.0);
        for i in 0..12 {
            assert_eq!(p[(i, i)], 0.0);
            assert!((p.row(i).sum() - 1.0).abs() < 1e-9);
        }
        let joint = joint_probabilities(&d, 3.0);
        assert!((joint.sum() - 1.0).abs() < 1e-6);
        assert_eq!(joint, joint.transpose());
    }

    #[test]
    fn test_tied_neighbours_share_mass() {
        // Row 0 has five neighbours tied at 0.125, more than perplexity 3 can hold
        let d = pairwise_distances(&two_clusters(), DistanceMetric::Hamming);
        assert!((1..6).all(|j| d[(0, j)] == d[(0, 1)]));

        let p = conditional_probabilities(&d, 3.0);
        for j in 1..6 {
            assert!((p[(0, j)] - 0.2).abs() < 1e-9, "p[0, {}] = {}", j, p[(0, j)]);
        }
        for j in 6..12 {
            assert!(p[(0, j)] < 1e-9);
        }

        let joint = joint_probabilities(&d, 3.0);
        assert!(joint[(0, 1)] > 100.0 * joint[(0, 6)]);
    }

    #[test]
    fn test_identical_rows_keep_finite_affinities() {
        let f = DMatrix::from_fn(6, 4, |i, j| (i < 3 && j < 2) as u8);
        let p = conditional_probabilities(&pairwise_distances(&f, DistanceMetric::Hamming), 2.0);
        for i in 0..6 {
            assert!(p.row(i).iter().all(|v| v.is_finite()));
            assert!((p.row(i).sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_two_points_with_large_perplexity() {
        let f = DMatrix::from_row_slice(2, 3, &[1, 0, 1, 0, 1, 1]);
        let embedding = Tsne::default().with_n_iter(50).reduce(&f, DistanceMetric::Hamming, 2).unwrap();
        assert_eq!(embedding.shape(), (2, 2));
        assert!(embedding.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rejects_degenerate_requests() {
        let single = DMatrix::from_row_slice(1, 2, &[1u8, 0]);
        assert!(matches!(
            Tsne::default().reduce(&single, DistanceMetric::Hamming, 2),
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(matches!(
            Tsne::default().reduce(&two_clusters(), DistanceMetric::Hamming, 0),
            Err(EmbeddingError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Tsne::default().with_perplexity(-1.0).reduce(&two_clusters(), DistanceMetric::Hamming, 2),
            Err(EmbeddingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_three_components() {
        let embedding = quick().reduce(&two_clusters(), DistanceMetric::Jaccard, 3).unwrap();
        assert_eq!(embedding.shape(), (12, 3));
        assert!(embedding.iter().all(|v| v.is_finite()));
    }
}
