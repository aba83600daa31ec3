//! Manifold reduction capability
//!
//! The embedder hands a reducer a binary fingerprint matrix (one row per
//! sample, one column per forest node) together with the distance metric to
//! compare rows by, and receives an `(n_samples, n_components)` embedding whose
//! row `i` belongs to fingerprint row `i`.
//!
//! Binary fingerprints are bit-packed into `u64` words before any distance is
//! taken, so every supported metric reduces to popcounts over XOR / OR of the
//! packed rows.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod tsne;

pub use tsne::Tsne;

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};

/// Dimensionality reducer consuming binary fingerprints
pub trait ManifoldReducer: Send + Sync {
    /// Embed the rows of `fingerprints` into `n_components` dimensions,
    /// comparing rows with `metric`
    fn reduce(
        &self,
        fingerprints: &DMatrix<u8>,
        metric: DistanceMetric,
        n_components: usize,
    ) -> Result<DMatrix<f64>>;
}

/// Distances between binary fingerprint rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Fraction of positions at which two rows differ
    #[default]
    Hamming,
    /// Differing positions over positions set in either row
    Jaccard,
    Euclidean,
    Manhattan,
}

impl DistanceMetric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hamming => "hamming",
            Self::Jaccard => "jaccard",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
        }
    }

    /// Distance between two packed rows of `n_bits` logical columns
    pub fn distance(&self, a: &PackedRow, b: &PackedRow, n_bits: usize) -> f64 {
        let differing = a.differing(b) as f64;
        match self {
            Self::Hamming => {
                if n_bits == 0 {
                    0.0
                } else {
                    differing / n_bits as f64
                }
            }
            Self::Jaccard => {
                let union = a.union_count(b);
                if union == 0 {
                    0.0
                } else {
                    differing / union as f64
                }
            }
            Self::Euclidean => differing.sqrt(),
            Self::Manhattan => differing,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMetric {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hamming" => Ok(Self::Hamming),
            "jaccard" => Ok(Self::Jaccard),
            "euclidean" => Ok(Self::Euclidean),
            "manhattan" => Ok(Self::Manhattan),
            other => Err(EmbeddingError::invalid_argument(
                "metric",
                format!("unknown distance metric '{}'", other),
            )),
        }
    }
}

/// One fingerprint row, nonzero cells set, packed 64 columns per word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRow {
    words: Vec<u64>,
}

impl PackedRow {
    fn differing(&self, other: &Self) -> u32 {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    fn union_count(&self, other: &Self) -> u32 {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a | b).count_ones())
            .sum()
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// Bit-pack every row of a binary matrix
pub fn pack_rows(fingerprints: &DMatrix<u8>) -> Vec<PackedRow> {
    let (nrows, ncols) = fingerprints.shape();
    let n_words = (ncols + 63) / 64;
    (0..nrows)
        .map(|i| {
            let mut words = vec![0u64; n_words];
            for j in 0..ncols {
                if fingerprints[(i, j)] != 0 {
                    words[j / 64] |= 1u64 << (j % 64);
                }
            }
            PackedRow { words }
        })
        .collect()
}

/// Symmetric `(n, n)` matrix of pairwise row distances
pub fn pairwise_distances(fingerprints: &DMatrix<u8>, metric: DistanceMetric) -> DMatrix<f64> {
    let n = fingerprints.nrows();
    let n_bits = fingerprints.ncols();
    let packed = pack_rows(fingerprints);

    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        metric.distance(&packed[i], &packed[j], n_bits)
                    }
                })
                .collect()
        })
        .collect();

    DMatrix::from_fn(n, n, |i, j| rows[i][j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fingerprints() -> DMatrix<u8> {
        DMatrix::from_row_slice(3, 4, &[1, 1, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0])
    }

    #[test]
    fn test_hamming_is_fraction_of_differing_columns() {
        let d = pairwise_distances(&fingerprints(), DistanceMetric::Hamming);
        assert_relative_eq!(d[(0, 1)], 0.5);
        assert_relative_eq!(d[(0, 2)], 0.5);
        assert_relative_eq!(d[(1, 2)], 0.5);
        assert_relative_eq!(d[(1, 1)], 0.0);
    }

    #[test]
    fn test_other_metrics() {
        let f = fingerprints();
        let jaccard = pairwise_distances(&f, DistanceMetric::Jaccard);
        assert_relative_eq!(jaccard[(0, 1)], 2.0 / 3.0);
        assert_relative_eq!(jaccard[(0, 2)], 1.0);

        let manhattan = pairwise_distances(&f, DistanceMetric::Manhattan);
        assert_relative_eq!(manhattan[(0, 1)], 2.0);

        let euclidean = pairwise_distances(&f, DistanceMetric::Euclidean);
        assert_relative_eq!(euclidean[(0, 1)], 2.0_f64.sqrt());
    }

    #[test]
    fn test_distances_are_symmetric() {
        let f = DMatrix::from_fn(9, 70, |i, j| ((i * 7 + j * 3) % 5 == 0) as u8);
        let d = pairwise_distances(&f, DistanceMetric::Hamming);
        for i in 0..9 {
            for j in 0..9 {
                assert_eq!(d[(i, j)], d[(j, i)]);
            }
        }
    }

    #[test]
    fn test_packing_spans_word_boundaries() {
        let f = DMatrix::from_fn(2, 130, |i, j| (i == 0 && (j == 63 || j == 64 || j == 129)) as u8);
        let packed = pack_rows(&f);
        assert_eq!(packed[0].count_ones(), 3);
        assert_eq!(packed[1].count_ones(), 0);
        let d = pairwise_distances(&f, DistanceMetric::Hamming);
        assert_relative_eq!(d[(0, 1)], 3.0 / 130.0);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!("jaccard".parse::<DistanceMetric>().unwrap(), DistanceMetric::Jaccard);
        assert_eq!(DistanceMetric::Hamming.to_string(), "hamming");
        assert!(matches!(
            "cosine".parse::<DistanceMetric>(),
            Err(EmbeddingError::InvalidArgument { .. })
        ));
    }
}
