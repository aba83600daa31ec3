//! Synthetic feature generation from per-column marginal distributions
//!
//! A synthetic matrix has the shape of its source and every column is drawn
//! independently from an approximation of the corresponding source column.
//! Cross-column structure is destroyed on purpose: that structure is exactly
//! what the downstream discriminator has to learn.
//!
//! Two column strategies are available:
//! - **bootstrap**: draws with replacement from the observed values, so every
//!   synthetic value occurred in the source column.
//! - **uniform**: draws uniformly from `[min, max]` of the source column. On
//!   integer or categorical codes this produces out-of-vocabulary values.
//!
//! One generator is threaded by `&mut` through every column. Its state
//! advances from column to column and is never reseeded in between.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::fmt;
use std::str::FromStr;

use log::trace;
use nalgebra::DMatrix;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};
use crate::matrix::FeatureMatrix;

/// Column sampling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMethod {
    /// Resample observed values with replacement
    #[default]
    Bootstrap,

    /// Sample uniformly between the column minimum and maximum
    Uniform,
}

impl SamplingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            SamplingMethod::Bootstrap => "bootstrap",
            SamplingMethod::Uniform => "uniform",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SamplingMethod {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bootstrap" => Ok(SamplingMethod::Bootstrap),
            "uniform" => Ok(SamplingMethod::Uniform),
            other => Err(EmbeddingError::invalid_argument(
                "method",
                format!("method must be either `bootstrap` or `uniform`, got `{}`", other),
            )),
        }
    }
}

/// Draw `n_samples` values (default: column length) with replacement from `column`
pub fn bootstrap_sample_column<R: Rng + ?Sized>(
    column: &[f64],
    n_samples: Option<usize>,
    rng: &mut R,
) -> Result<Vec<f64>> {
    if column.is_empty() {
        return Err(EmbeddingError::InvalidInput(
            "cannot bootstrap an empty column".to_string(),
        ));
    }
    let n_samples = n_samples.unwrap_or(column.len());

    Ok((0..n_samples)
        .map(|_| column[rng.gen_range(0..column.len())])
        .collect())
}

/// Draw `n_samples` values (default: column length) uniformly from `[min, max]` of `column`
pub fn uniform_sample_column<R: Rng + ?Sized>(
    column: &[f64],
    n_samples: Option<usize>,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let (min, max) = column
        .iter()
        .fold(None, |bounds: Option<(f64, f64)>, &v| match bounds {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or_else(|| {
            EmbeddingError::InvalidInput("cannot sample uniformly from an empty column".to_string())
        })?;
    if column.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::InvalidInput(
            "cannot sample uniformly from a column with NaN or infinite values".to_string(),
        ));
    }
    let n_samples = n_samples.unwrap_or(column.len());

    if (max - min).is_finite() {
        let distribution = Uniform::new_inclusive(min, max);
        return Ok(distribution.sample_iter(rng).take(n_samples).collect());
    }
    // `max - min` overflows; interpolate from a unit draw instead
    let unit = Uniform::new_inclusive(0.0, 1.0);
    Ok(unit
        .sample_iter(rng)
        .take(n_samples)
        .map(|t: f64| (min * (1.0 - t) + max * t).clamp(min, max))
        .collect())
}

/// Dispatch one column to the requested strategy
pub fn sample_column<R: Rng + ?Sized>(
    method: SamplingMethod,
    column: &[f64],
    n_samples: Option<usize>,
    rng: &mut R,
) -> Result<Vec<f64>> {
    match method {
        SamplingMethod::Bootstrap => bootstrap_sample_column(column, n_samples, rng),
        SamplingMethod::Uniform => uniform_sample_column(column, n_samples, rng),
    }
}

/// Generate a synthetic matrix shaped like `x`, one independently sampled column at a time
pub fn generate_synthetic_features<R: Rng + ?Sized>(
    x: &FeatureMatrix,
    method: SamplingMethod,
    rng: &mut R,
) -> Result<DMatrix<f64>> {
    let (n_samples, n_features) = x.shape();
    let mut values = Vec::with_capacity(n_samples * n_features);

    for col in 0..n_features {
        let synthetic = sample_column(method, &x.column(col), Some(n_samples), rng)?;
        values.extend(synthetic);
    }
    trace!(
        "Generated ({}, {}) synthetic features with {} sampling",
        n_samples,
        n_features,
        method
    );

    // Column-major buffer: column `col` occupies `col * n_samples..(col + 1) * n_samples`
    Ok(DMatrix::from_vec(n_samples, n_features, values))
}
