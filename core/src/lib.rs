//! Sylvan: unsupervised embeddings from discriminative random forests
//!
//! A dataset is paired with synthetic decoys whose columns are drawn
//! independently from the real marginals. A random forest learns to tell the
//! two apart, and the set of tree nodes each real sample visits becomes a
//! binary fingerprint. Fingerprints are projected to a low-dimensional space
//! by t-SNE under Hamming distance.
//!
//! ```no_run
//! use sylvan_core::{EmbeddingConfig, FeatureMatrix, ForestEmbedding};
//!
//! let x = FeatureMatrix::from_rows(&[vec![0.1, 1.2], vec![0.4, 0.9], vec![1.3, -0.2]])?;
//! let mut embedder = ForestEmbedding::new(EmbeddingConfig::default().with_random_state(1234));
//! let embedding = embedder.fit_transform(&x, 2)?;
//! assert_eq!(embedding.shape(), (3, 2));
//! # Ok::<(), sylvan_core::EmbeddingError>(())
//! ```
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod config;
pub mod discriminative;
pub mod embedding;
pub mod error;
pub mod forest;
pub mod manifold;
pub mod matrix;
pub mod sampling;

pub use self::config::EmbeddingConfig;
pub use self::discriminative::{generate_discriminative_dataset, DiscriminativeDataset};
pub use self::embedding::{ForestEmbedding, DEFAULT_N_COMPONENTS};
pub use self::error::{EmbeddingError, Result};
pub use self::forest::{DecisionPathClassifier, RandomForestClassifier};
pub use self::manifold::{DistanceMetric, ManifoldReducer, Tsne};
pub use self::matrix::{CscMatrix, FeatureMatrix};
pub use self::sampling::{generate_synthetic_features, SamplingMethod};

use log::LevelFilter;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install an `env_logger` backend at a level derived from `verbose`
///
/// `RUST_LOG` overrides the derived level. Returns `false` when a logger was
/// already installed, in which case nothing changes.
pub fn init_logging(verbose: u8) -> bool {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .is_test(cfg!(test))
        .try_init()
        .is_ok()
}
