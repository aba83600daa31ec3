//! Forest-proximity embedding
//!
//! # Pipeline
//! ```text
//! X ──► synthetic decoys ──► shuffled (X ∪ decoys, labels) ──► train classifier
//! X ──► decision paths (original row order) ──► Hamming manifold ──► embedding
//! ```
//! Training sees the shuffled discriminative dataset, but paths are always
//! extracted from the caller's unpermuted `X`, so row `i` of the embedding
//! belongs to row `i` of `X`.
//!
//! The classifier and the reducer are capabilities behind
//! [`DecisionPathClassifier`] and [`ManifoldReducer`]. [`ForestEmbedding::new`]
//! wires in the bundled random forest and exact t-SNE; other implementations
//! go through [`ForestEmbedding::with_capabilities`].
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, log, warn, Level};
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::config::EmbeddingConfig;
use crate::discriminative::generate_discriminative_dataset;
use crate::error::{EmbeddingError, Result};
use crate::forest::{DecisionPathClassifier, RandomForestClassifier};
use crate::manifold::{DistanceMetric, ManifoldReducer, Tsne};
use crate::matrix::FeatureMatrix;

/// Output dimensionality used when the caller does not pick one
pub const DEFAULT_N_COMPONENTS: usize = 2;

/// Unsupervised embedding through a real-versus-synthetic forest
#[derive(Debug, Clone)]
pub struct ForestEmbedding<C = RandomForestClassifier, R = Tsne> {
    config: EmbeddingConfig,
    classifier: C,
    reducer: R,
}

impl ForestEmbedding {
    /// Embedder backed by a random forest built from `config` and a t-SNE
    /// reducer with its fixed default seed
    pub fn new(config: EmbeddingConfig) -> Self {
        let classifier = RandomForestClassifier::new(config.forest_params());
        Self::with_capabilities(config, classifier, Tsne::default())
    }
}

impl Default for ForestEmbedding {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

impl<C, R> ForestEmbedding<C, R>
where
    C: DecisionPathClassifier,
    R: ManifoldReducer,
{
    pub fn with_capabilities(config: EmbeddingConfig, classifier: C, reducer: R) -> Self {
        Self {
            config,
            classifier,
            reducer,
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn is_fitted(&self) -> bool {
        self.classifier.is_trained()
    }

    /// Embed `x` with the trained classifier
    pub fn transform(&self, x: &FeatureMatrix, n_components: usize) -> Result<DMatrix<f64>> {
        if !self.is_fitted() {
            return Err(EmbeddingError::UndefinedState(
                "this embedding is not fitted yet; call fit or fit_transform first".to_string(),
            ));
        }
        check_components(n_components)?;
        let x = x.with_sorted_indices()?;
        self.embed(&self.classifier, &x, n_components)
    }

    /// Path extraction and reduction on an already validated, sorted `x`
    fn embed(&self, classifier: &C, x: &FeatureMatrix, n_components: usize) -> Result<DMatrix<f64>> {
        if n_components > 2 {
            warn!(
                "Embedding into {} components; t-SNE is extremely slow beyond 2",
                n_components
            );
        }
        let expected = classifier.n_features();
        if x.ncols() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: x.ncols(),
            });
        }

        let path = classifier.decision_path(x)?;
        if path.indicator.nrows() != x.nrows() {
            return Err(EmbeddingError::Classifier(format!(
                "decision path has {} rows for {} samples",
                path.indicator.nrows(),
                x.nrows()
            )));
        }
        let fingerprints = path.indicator.to_dense();
        debug!(
            "Extracted decision paths: {} samples over {} nodes, {} memberships",
            fingerprints.nrows(),
            fingerprints.ncols(),
            path.indicator.nnz()
        );

        let embedding = self
            .reducer
            .reduce(&fingerprints, DistanceMetric::Hamming, n_components)?;
        if embedding.shape() != (x.nrows(), n_components) {
            return Err(EmbeddingError::Manifold(format!(
                "reducer returned shape {:?}, expected ({}, {})",
                embedding.shape(),
                x.nrows(),
                n_components
            )));
        }
        Ok(embedding)
    }
}

impl<C, R> ForestEmbedding<C, R>
where
    C: DecisionPathClassifier + Clone,
    R: ManifoldReducer,
{
    /// Fit on `x`, discarding the embedding
    pub fn fit(&mut self, x: &FeatureMatrix) -> Result<&mut Self> {
        self.fit_transform(x, DEFAULT_N_COMPONENTS)?;
        Ok(self)
    }

    /// Train the discriminating classifier on `x` and embed `x`
    ///
    /// The trained classifier replaces the current one only when the whole
    /// pipeline succeeds.
    pub fn fit_transform(&mut self, x: &FeatureMatrix, n_components: usize) -> Result<DMatrix<f64>> {
        self.config.validate()?;
        if self.config.oob_score {
            return Err(EmbeddingError::NotSupported(
                "out-of-bag scoring is undefined for discriminatively relabeled data".to_string(),
            ));
        }
        check_components(n_components)?;

        let x = x.with_sorted_indices()?;
        let level = if self.config.verbose > 0 { Level::Info } else { Level::Debug };

        let mut rng = match self.config.random_state {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        let dataset = generate_discriminative_dataset(&x, self.config.method, &mut rng)?;

        log!(
            level,
            "Training classifier on {} rows ({} real, {} synthetic) using {} sampling",
            dataset.len(),
            dataset.n_real(),
            dataset.n_synthetic(),
            self.config.method
        );
        // Train a copy so a failed fit leaves the previous state untouched
        let mut classifier = self.classifier.clone();
        classifier.train(&dataset.features, &dataset.labels)?;
        let embedding = self.embed(&classifier, &x, n_components)?;

        self.classifier = classifier;
        Ok(embedding)
    }
}

fn check_components(n_components: usize) -> Result<()> {
    if n_components == 0 {
        return Err(EmbeddingError::invalid_argument(
            "n_components",
            "must be at least 1",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{DecisionPath, MembershipMatrix};
    use crate::matrix::CscMatrix;
    use crate::sampling::SamplingMethod;
    use rand_distr::{Distribution, StandardNormal};

    fn standard_normal(n: usize, f: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        DMatrix::from_fn(n, f, |_, _| StandardNormal.sample(&mut rng))
    }

    fn seeded() -> EmbeddingConfig {
        EmbeddingConfig::default().with_random_state(1234)
    }

    /// Visits node `2j` when feature `j` is positive and `2j + 1` otherwise
    #[derive(Debug, Clone, Default)]
    struct SignClassifier {
        n_features: usize,
        trained_rows: usize,
    }

    impl DecisionPathClassifier for SignClassifier {
        fn train(&mut self, x: &DMatrix<f64>, y: &[usize]) -> Result<()> {
            assert_eq!(x.nrows(), y.len());
            self.n_features = x.ncols();
            self.trained_rows = x.nrows();
            Ok(())
        }

        fn decision_path(&self, x: &FeatureMatrix) -> Result<DecisionPath> {
            let rows = (0..x.nrows())
                .map(|i| {
                    (0..x.ncols())
                        .map(|j| if x.get(i, j) > 0.0 { 2 * j } else { 2 * j + 1 })
                        .collect()
                })
                .collect();
            Ok(DecisionPath {
                indicator: MembershipMatrix::from_rows(2 * self.n_features, rows)?,
                node_offsets: vec![0, 2 * self.n_features],
            })
        }

        fn is_trained(&self) -> bool {
            self.trained_rows > 0
        }

        fn n_features(&self) -> usize {
            self.n_features
        }
    }

    /// Maps each fingerprint to (weighted column sum, popcount, ...)
    struct ChecksumReducer;

    impl ManifoldReducer for ChecksumReducer {
        fn reduce(
            &self,
            fingerprints: &DMatrix<u8>,
            metric: DistanceMetric,
            n_components: usize,
        ) -> Result<DMatrix<f64>> {
            assert_eq!(metric, DistanceMetric::Hamming);
            Ok(DMatrix::from_fn(fingerprints.nrows(), n_components, |i, c| {
                fingerprints
                    .row(i)
                    .iter()
                    .enumerate()
                    .map(|(j, &bit)| (bit as f64) * ((j + 1) as f64).powi(c as i32))
                    .sum()
            }))
        }
    }

    fn mocked(config: EmbeddingConfig) -> ForestEmbedding<SignClassifier, ChecksumReducer> {
        ForestEmbedding::with_capabilities(config, SignClassifier::default(), ChecksumReducer)
    }

    #[test]
    fn test_standard_normal_scenario() {
        let _ = env_logger::builder().is_test(true).try_init();
        let x = FeatureMatrix::from_dense(standard_normal(100, 5, 7)).unwrap();
        let mut embedder = ForestEmbedding::new(seeded());
        let embedding = embedder.fit_transform(&x, 2).unwrap();
        assert_eq!(embedding.shape(), (100, 2));
        assert!(embedding.iter().all(|v| v.is_finite()));
        assert!(embedder.is_fitted());
    }

    #[test]
    fn test_same_seed_same_embedding() {
        let x = FeatureMatrix::from_dense(standard_normal(40, 4, 3)).unwrap();
        let a = ForestEmbedding::new(seeded()).fit_transform(&x, 2).unwrap();
        let b = ForestEmbedding::new(seeded()).fit_transform(&x, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_transform_before_fit_is_undefined() {
        let x = FeatureMatrix::from_dense(standard_normal(5, 2, 1)).unwrap();
        let embedder = ForestEmbedding::default();
        assert!(!embedder.is_fitted());
        assert!(matches!(
            embedder.transform(&x, 2),
            Err(EmbeddingError::UndefinedState(_))
        ));
    }

    #[test]
    fn test_oob_score_not_supported() {
        let x = FeatureMatrix::from_dense(standard_normal(10, 2, 1)).unwrap();
        let mut embedder = mocked(seeded().with_oob_score(true));
        assert!(matches!(
            embedder.fit_transform(&x, 2),
            Err(EmbeddingError::NotSupported(_))
        ));
        assert!(!embedder.is_fitted());
    }

    #[test]
    fn test_unknown_method_rejected_before_sampling() {
        let err = EmbeddingConfig::from_json_str(r#"{"method": "gaussian", "random_state": 1}"#);
        assert!(matches!(err, Err(EmbeddingError::InvalidArgument { .. })));
    }

    #[test]
    fn test_zero_components_rejected() {
        let x = FeatureMatrix::from_dense(standard_normal(10, 2, 1)).unwrap();
        let mut embedder = mocked(seeded());
        assert!(matches!(
            embedder.fit_transform(&x, 0),
            Err(EmbeddingError::InvalidArgument { .. })
        ));
        assert!(!embedder.is_fitted());
    }

    #[test]
    fn test_failed_fit_leaves_embedder_unfitted() {
        let single = FeatureMatrix::from_rows(&[vec![0.3, -1.2]]).unwrap();
        let mut embedder = ForestEmbedding::new(seeded());
        assert!(matches!(
            embedder.fit_transform(&single, 2),
            Err(EmbeddingError::InvalidInput(_))
        ));
        assert!(!embedder.is_fitted());

        let pair = FeatureMatrix::from_rows(&[vec![0.3, -1.2], vec![1.0, 0.5]]).unwrap();
        assert!(matches!(
            embedder.transform(&pair, 2),
            Err(EmbeddingError::UndefinedState(_))
        ));
    }

    #[test]
    fn test_failed_refit_keeps_previous_classifier() {
        let x = FeatureMatrix::from_dense(standard_normal(20, 2, 6)).unwrap();
        let mut embedder = ForestEmbedding::new(seeded());
        embedder.fit(&x).unwrap();
        let before = embedder.classifier().clone();

        let single = FeatureMatrix::from_rows(&[vec![0.1, 0.2, 0.3]]).unwrap();
        assert!(embedder.fit_transform(&single, 2).is_err());
        assert_eq!(embedder.classifier(), &before);
        assert_eq!(embedder.transform(&x, 2).unwrap().shape(), (20, 2));
    }

    #[test]
    fn test_more_than_two_components_accepted() {
        let x = FeatureMatrix::from_dense(standard_normal(15, 3, 12)).unwrap();
        let mut embedder = mocked(seeded());
        let embedding = embedder.fit_transform(&x, 3).unwrap();
        assert_eq!(embedding.shape(), (15, 3));
        assert_eq!(embedder.transform(&x, 4).unwrap().shape(), (15, 4));
    }

    #[test]
    fn test_classifier_trains_on_discriminative_dataset() {
        let x = FeatureMatrix::from_dense(standard_normal(12, 3, 2)).unwrap();
        let mut embedder = mocked(seeded());
        let embedding = embedder.fit_transform(&x, 2).unwrap();
        assert_eq!(embedder.classifier().trained_rows, 24);
        assert_eq!(embedding.shape(), (12, 2));
    }

    #[test]
    fn test_rows_follow_input_order() {
        let dense = standard_normal(20, 4, 5);
        let permutation: Vec<usize> = (0..20).rev().collect();
        let permuted = crate::matrix::select_rows(&dense, &permutation);

        let original = mocked(seeded())
            .fit_transform(&FeatureMatrix::from_dense(dense).unwrap(), 2)
            .unwrap();
        let shuffled = mocked(seeded())
            .fit_transform(&FeatureMatrix::from_dense(permuted).unwrap(), 2)
            .unwrap();

        for (row, &source) in permutation.iter().enumerate() {
            assert_eq!(shuffled.row(row), original.row(source));
        }
    }

    #[test]
    fn test_forest_paths_follow_input_order() {
        let dense = standard_normal(30, 3, 8);
        let mut embedder = ForestEmbedding::new(seeded());
        embedder
            .fit(&FeatureMatrix::from_dense(dense.clone()).unwrap())
            .unwrap();

        let permutation: Vec<usize> = (0..30).map(|i| (i * 7) % 30).collect();
        let permuted = crate::matrix::select_rows(&dense, &permutation);
        let forest = embedder.classifier();
        let paths = forest
            .decision_path(&FeatureMatrix::from_dense(dense).unwrap())
            .unwrap();
        let permuted_paths = forest
            .decision_path(&FeatureMatrix::from_dense(permuted).unwrap())
            .unwrap();
        assert_eq!(permuted_paths.indicator, paths.indicator.select_rows(&permutation));
    }

    #[test]
    fn test_transform_new_rows_after_fit() {
        let x = FeatureMatrix::from_dense(standard_normal(30, 3, 4)).unwrap();
        let mut embedder = ForestEmbedding::new(seeded().with_method(SamplingMethod::Uniform));
        assert!(embedder.fit(&x).unwrap().is_fitted());

        let fresh = FeatureMatrix::from_dense(standard_normal(8, 3, 99)).unwrap();
        let embedding = embedder.transform(&fresh, 2).unwrap();
        assert_eq!(embedding.shape(), (8, 2));

        let narrow = FeatureMatrix::from_dense(standard_normal(8, 2, 99)).unwrap();
        assert!(matches!(
            embedder.transform(&narrow, 2),
            Err(EmbeddingError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_unsorted_sparse_matches_dense() {
        let dense = DMatrix::from_fn(16, 3, |i, j| if (i + j) % 3 == 0 { 0.0 } else { (i * 3 + j) as f64 });
        let mut indptr = vec![0];
        let mut indices = Vec::new();
        let mut data = Vec::new();
        for j in 0..3 {
            // Store every column bottom-up so the indices arrive unsorted
            for i in (0..16).rev() {
                if dense[(i, j)] != 0.0 {
                    indices.push(i);
                    data.push(dense[(i, j)]);
                }
            }
            indptr.push(indices.len());
        }
        let csc = CscMatrix::new(16, 3, indptr, indices, data).unwrap();
        assert!(!csc.has_sorted_indices());

        let sparse = FeatureMatrix::from_csc(csc).unwrap();
        let dense = FeatureMatrix::from_dense(dense).unwrap();
        let from_sparse = ForestEmbedding::new(seeded()).fit_transform(&sparse, 2).unwrap();
        let from_dense = ForestEmbedding::new(seeded()).fit_transform(&dense, 2).unwrap();
        assert_eq!(from_sparse, from_dense);
    }

    #[test]
    fn test_invalid_input_rejected() {
        let x = FeatureMatrix::Dense(DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, 0.0, 1.0]));
        assert!(matches!(
            mocked(seeded()).fit_transform(&x, 2),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
