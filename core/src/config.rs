//! Embedder configuration
//!
//! [`EmbeddingConfig`] carries the whole constructor surface of the embedder:
//! the forest hyperparameters, the synthetic sampling method and the run
//! controls (parallelism, seed, verbosity, warm start). It serialises to and
//! from JSON so a run can be reproduced from a stored configuration.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EmbeddingError, Result};
use crate::forest::{Criterion, ForestParams, MaxFeatures, TreeParams};
use crate::sampling::SamplingMethod;

/// Configuration for [`crate::embedding::ForestEmbedding`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Number of trees in the forest
    pub n_estimators: usize,

    /// Split quality criterion
    pub criterion: Criterion,

    /// Maximum tree depth, unbounded when `None`
    pub max_depth: Option<usize>,

    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub min_weight_fraction_leaf: f64,

    /// Candidate features per split
    pub max_features: MaxFeatures,

    /// Switches tree growth to best-first when set
    pub max_leaf_nodes: Option<usize>,

    /// Bootstrap rows for each tree; unrelated to the synthetic `method`
    pub bootstrap: bool,

    /// Out-of-bag scoring; always rejected at fit time
    pub oob_score: bool,

    /// Synthetic column sampling method
    pub method: SamplingMethod,

    /// Worker threads for tree growth, all cores when `None`
    pub n_jobs: Option<usize>,

    /// Seed for the whole pipeline, OS entropy when `None`
    pub random_state: Option<u64>,

    pub verbose: u8,
    pub warm_start: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let tree = TreeParams::default();
        Self {
            n_estimators: 10,
            criterion: tree.criterion,
            max_depth: tree.max_depth,
            min_samples_split: tree.min_samples_split,
            min_samples_leaf: tree.min_samples_leaf,
            min_weight_fraction_leaf: tree.min_weight_fraction_leaf,
            max_features: tree.max_features,
            max_leaf_nodes: tree.max_leaf_nodes,
            bootstrap: true,
            oob_score: false,
            method: SamplingMethod::Bootstrap,
            n_jobs: None,
            random_state: None,
            verbose: 0,
            warm_start: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn with_method(mut self, method: SamplingMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = Some(n_jobs);
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_warm_start(mut self, warm_start: bool) -> Self {
        self.warm_start = warm_start;
        self
    }

    pub fn with_oob_score(mut self, oob_score: bool) -> Self {
        self.oob_score = oob_score;
        self
    }

    /// Tree-level view of the configuration
    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            criterion: self.criterion,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            min_weight_fraction_leaf: self.min_weight_fraction_leaf,
            max_features: self.max_features,
            max_leaf_nodes: self.max_leaf_nodes,
        }
    }

    /// Forest-level view of the configuration
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            tree: self.tree_params(),
            bootstrap: self.bootstrap,
            oob_score: self.oob_score,
            n_jobs: self.n_jobs,
            random_state: self.random_state,
            verbose: self.verbose,
            warm_start: self.warm_start,
        }
    }

    /// Reject values outside their admissible domain
    pub fn validate(&self) -> Result<()> {
        self.forest_params().validate()
    }

    /// Parse a JSON configuration; omitted keys keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        // Surface an unknown method as a bad argument rather than a decode error
        if let Some(method) = value.get("method") {
            let name = method.as_str().ok_or_else(|| {
                EmbeddingError::invalid_argument("method", format!("expected a string, got {}", method))
            })?;
            name.parse::<SamplingMethod>()?;
        }
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.n_estimators, 10);
        assert_eq!(config.criterion, Criterion::Gini);
        assert_eq!(config.max_depth, Some(5));
        assert_eq!(config.min_samples_split, 2);
        assert_eq!(config.min_samples_leaf, 1);
        assert_eq!(config.max_features, MaxFeatures::Auto);
        assert_eq!(config.max_leaf_nodes, None);
        assert!(config.bootstrap);
        assert!(!config.oob_score);
        assert_eq!(config.method, SamplingMethod::Bootstrap);
        assert_eq!(config.n_jobs, None);
        assert_eq!(config.random_state, None);
        assert!(!config.warm_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EmbeddingConfig::default()
            .with_method(SamplingMethod::Uniform)
            .with_random_state(42)
            .with_n_estimators(25);
        let json = config.to_json_string().unwrap();
        assert!(json.contains("\"uniform\""));
        assert_eq!(EmbeddingConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EmbeddingConfig::from_json_str(r#"{"n_estimators": 3, "criterion": "entropy"}"#).unwrap();
        assert_eq!(config.n_estimators, 3);
        assert_eq!(config.criterion, Criterion::Entropy);
        assert_eq!(config.max_depth, Some(5));
    }

    #[test]
    fn test_unknown_method_is_invalid_argument() {
        match EmbeddingConfig::from_json_str(r#"{"method": "gaussian"}"#) {
            Err(EmbeddingError::InvalidArgument { name, .. }) => assert_eq!(name, "method"),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        assert!(matches!(
            "gaussian".parse::<SamplingMethod>(),
            Err(EmbeddingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let bad = [
            EmbeddingConfig::default().with_n_estimators(0),
            EmbeddingConfig::default().with_n_jobs(0),
            EmbeddingConfig::default().with_max_depth(Some(0)),
            EmbeddingConfig {
                min_samples_split: 1,
                ..EmbeddingConfig::default()
            },
            EmbeddingConfig {
                max_features: MaxFeatures::Fraction(1.5),
                ..EmbeddingConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(EmbeddingError::InvalidArgument { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        assert!(matches!(
            EmbeddingConfig::from_json_str("{not json"),
            Err(EmbeddingError::Serialization(_))
        ));
    }

    #[test]
    fn test_forest_params_mirror_config() {
        let config = EmbeddingConfig::default().with_random_state(9).with_warm_start(true);
        let params = config.forest_params();
        assert_eq!(params.random_state, Some(9));
        assert!(params.warm_start);
        assert_eq!(params.tree.max_depth, Some(5));
    }
}
