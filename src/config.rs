//! Experiment configuration
//!
//! One JSON document drives a whole comparison: seeds, column roles, the
//! model variants to fit, and the aggregation parameters. `validate`
//! collects every violation at once so a caller sees the full list of
//! data-precondition failures before any job is dispatched.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::run::ResourceSpec;
use crate::split::SplitSpec;
use crate::variant::ModelVariant;
use crate::{Error, Result};

fn default_quantiles() -> Vec<f64> {
    vec![0.05, 0.25, 0.5, 0.75, 0.95]
}

const fn default_clip() -> f64 {
    8.0
}

const fn default_permutations() -> usize {
    1000
}

/// Full configuration for one repeated-run experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// One seed per run; the run's ordinal index is its position here.
    pub seeds: Vec<u64>,
    /// Train fraction in (0, 1).
    pub train_fraction: f64,
    /// Regression covariates (e.g. age).
    pub covariates: Vec<String>,
    /// Batch-effect columns kept as separate categorical labels.
    pub batch_effects: Vec<String>,
    /// Ordered response-variable (biomarker) columns.
    pub biomarkers: Vec<String>,
    /// Stratification columns for balanced splits.
    pub stratify_by: Vec<String>,
    /// Predictive quantile levels for centile curves and MACE.
    #[serde(default = "default_quantiles")]
    pub quantile_levels: Vec<f64>,
    /// Deviation-score clipping bound applied before metric computation.
    #[serde(default = "default_clip")]
    pub clip_bound: f64,
    /// Label-permutation count for AUC significance, fixed across biomarkers.
    #[serde(default = "default_permutations")]
    pub permutations: usize,
    /// Per-job resource parameters, passed opaquely to the backend.
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Model variants to fit and compare.
    pub variants: Vec<ModelVariant>,
}

impl ExperimentConfig {
    /// Load a config from a JSON file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error on IO/parse failure or any validation violation.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every precondition, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns `Error::Precondition` listing each violation.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.seeds.is_empty() {
            problems.push("seed list is empty".to_string());
        }
        let mut seen = self.seeds.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.seeds.len() {
            problems.push("seed list contains duplicates".to_string());
        }

        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            problems.push(format!(
                "train fraction must lie in (0, 1), got {}",
                self.train_fraction
            ));
        }

        if self.covariates.is_empty() {
            problems.push("no covariate columns configured".to_string());
        }
        if self.biomarkers.is_empty() {
            problems.push("no biomarker columns configured".to_string());
        }
        let mut names = self.biomarkers.clone();
        names.sort();
        names.dedup();
        if names.len() != self.biomarkers.len() {
            problems.push("biomarker list contains duplicates".to_string());
        }

        if self.quantile_levels.is_empty() {
            problems.push("quantile level list is empty".to_string());
        }
        for pair in self.quantile_levels.windows(2) {
            if pair[0] >= pair[1] {
                problems.push("quantile levels must be strictly increasing".to_string());
                break;
            }
        }
        if self
            .quantile_levels
            .iter()
            .any(|&l| !(l > 0.0 && l < 1.0))
        {
            problems.push("quantile levels must lie in (0, 1)".to_string());
        }

        if !(self.clip_bound > 0.0) {
            problems.push(format!(
                "clip bound must be positive, got {}",
                self.clip_bound
            ));
        }
        if self.permutations == 0 {
            problems.push("permutation count must be positive".to_string());
        }

        if self.variants.is_empty() {
            problems.push("no model variants configured".to_string());
        }
        let mut variant_names: Vec<&str> = self.variants.iter().map(ModelVariant::name).collect();
        variant_names.sort_unstable();
        variant_names.dedup();
        if variant_names.len() != self.variants.len() {
            problems.push("variant names are not unique".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Precondition(problems.join("; ")))
        }
    }

    /// The column-role view the Run Generator consumes.
    #[must_use]
    pub fn split_spec(&self) -> SplitSpec {
        SplitSpec {
            train_fraction: self.train_fraction,
            covariates: self.covariates.clone(),
            batch_effects: self.batch_effects.clone(),
            biomarkers: self.biomarkers.clone(),
            stratify_by: self.stratify_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ExperimentConfig {
        ExperimentConfig {
            seeds: vec![42, 100],
            train_fraction: 0.5,
            covariates: vec!["age".to_string()],
            batch_effects: vec!["sex".to_string(), "site".to_string()],
            biomarkers: vec!["theta".to_string(), "alpha".to_string()],
            stratify_by: vec!["site".to_string()],
            quantile_levels: default_quantiles(),
            clip_bound: default_clip(),
            permutations: 100,
            resources: ResourceSpec::default(),
            variants: vec![ModelVariant::linear(), ModelVariant::shash()],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_violations_are_collected() {
        let mut c = valid();
        c.seeds = vec![1, 1];
        c.train_fraction = 1.5;
        c.variants = Vec::new();
        let err = c.validate().unwrap_err().to_string();
        assert!(err.contains("duplicates"));
        assert!(err.contains("train fraction"));
        assert!(err.contains("variants"));
    }

    #[test]
    fn test_from_json_file_loads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        std::fs::write(&path, serde_json::to_vec(&valid()).unwrap()).unwrap();
        let config = ExperimentConfig::from_json_file(&path).unwrap();
        assert_eq!(config.seeds, [42, 100]);
        assert_eq!(config.variants.len(), 2);

        // A document failing validation is rejected at load time.
        let mut bad = valid();
        bad.train_fraction = 1.5;
        std::fs::write(&path, serde_json::to_vec(&bad).unwrap()).unwrap();
        assert!(ExperimentConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let json = r#"{
            "seeds": [42, 100],
            "train_fraction": 0.5,
            "covariates": ["age"],
            "batch_effects": ["sex", "site"],
            "biomarkers": ["theta"],
            "stratify_by": ["site"],
            "variants": [{
                "name": "linear",
                "family": "linear",
                "likelihood": "gaussian",
                "sigma_covariate": false,
                "skew_covariate": false,
                "kurtosis_covariate": false,
                "random_slope": false
            }]
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.clip_bound, default_clip());
        assert_eq!(config.quantile_levels.len(), 5);
        assert_eq!(config.permutations, default_permutations());
    }
}
