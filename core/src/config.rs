use crate::{
    correlation::CorrelationMethod,
    distribution::DistributionFamily,
    error::{SimError, SimResult},
    fitter::{DEFAULT_MIN_DATA_POINTS, DEFAULT_OUTLIER_SIGMA},
    sampling::SamplingMethod,
    types::Seed,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SEED: Seed = 42;
pub const DEFAULT_ITERATIONS: u64 = 10_000;

fn default_seed() -> Seed {
    DEFAULT_SEED
}

fn default_iterations() -> u64 {
    DEFAULT_ITERATIONS
}

fn default_min_data_points() -> usize {
    DEFAULT_MIN_DATA_POINTS
}

fn default_outlier_sigma() -> f64 {
    DEFAULT_OUTLIER_SIGMA
}

fn default_candidates() -> Vec<DistributionFamily> {
    DistributionFamily::ALL.to_vec()
}

/// Engine settings. Every field has a default, so an empty JSON object is
/// a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_seed")]
    pub seed:               Seed,
    #[serde(default = "default_iterations")]
    pub iterations:         u64,
    /// Scenarios per sampling batch; `None` samples all iterations at once.
    #[serde(default)]
    pub batch_size:         Option<u64>,
    #[serde(default)]
    pub sampling:           SamplingMethod,
    /// Accepted for forward compatibility; execution is sequential by batch.
    #[serde(default)]
    pub parallel:           bool,
    #[serde(default)]
    pub workers:            Option<usize>,
    #[serde(default = "default_min_data_points")]
    pub min_data_points:    usize,
    #[serde(default)]
    pub remove_outliers:    bool,
    #[serde(default = "default_outlier_sigma")]
    pub outlier_sigma:      f64,
    #[serde(default = "default_candidates")]
    pub candidate_families: Vec<DistributionFamily>,
    #[serde(default)]
    pub correlation_method: CorrelationMethod,
    #[serde(default)]
    pub min_correlation:    f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed:               DEFAULT_SEED,
            iterations:         DEFAULT_ITERATIONS,
            batch_size:         None,
            sampling:           SamplingMethod::default(),
            parallel:           false,
            workers:            None,
            min_data_points:    DEFAULT_MIN_DATA_POINTS,
            remove_outliers:    false,
            outlier_sigma:      DEFAULT_OUTLIER_SIGMA,
            candidate_families: default_candidates(),
            correlation_method: CorrelationMethod::default(),
            min_correlation:    0.0,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &str) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimError::Other(anyhow::anyhow!("Cannot read {path}: {e}")))?;
        let config = Self::from_json_str(&content)?;
        log::info!("Loaded simulation config from {path}");
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.iterations == 0 {
            return Err(SimError::Configuration("iterations must be positive".into()));
        }
        if self.batch_size == Some(0) {
            return Err(SimError::Configuration("batch_size must be positive".into()));
        }
        if self.workers == Some(0) {
            return Err(SimError::Configuration("workers must be positive".into()));
        }
        if self.min_data_points < 2 {
            return Err(SimError::Configuration(format!(
                "min_data_points must be at least 2, got {}",
                self.min_data_points
            )));
        }
        if !(self.outlier_sigma > 0.0 && self.outlier_sigma.is_finite()) {
            return Err(SimError::Configuration(format!(
                "outlier_sigma must be positive, got {}",
                self.outlier_sigma
            )));
        }
        if !(0.0..=1.0).contains(&self.min_correlation) {
            return Err(SimError::Configuration(format!(
                "min_correlation must lie in [0, 1], got {}",
                self.min_correlation
            )));
        }
        if self.candidate_families.is_empty() {
            return Err(SimError::Configuration("candidate_families is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = SimulationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
        assert_eq!(config.seed, 42);
        assert_eq!(config.candidate_families.len(), 6);
    }

    #[test]
    fn aliases_and_overrides_parse() {
        let config = SimulationConfig::from_json_str(
            r#"{"seed": 7, "sampling": "lhs", "correlation_method": "spearman", "batch_size": 250}"#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.sampling, SamplingMethod::LatinHypercube);
        assert_eq!(config.correlation_method, CorrelationMethod::Spearman);
        assert_eq!(config.batch_size, Some(250));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        for bad in [
            r#"{"iterations": 0}"#,
            r#"{"batch_size": 0}"#,
            r#"{"min_correlation": 1.5}"#,
            r#"{"candidate_families": []}"#,
        ] {
            assert!(
                matches!(SimulationConfig::from_json_str(bad), Err(SimError::Configuration(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn unreadable_file_is_reported_with_its_path() {
        let path = std::env::temp_dir().join("comp-risk-missing-config.json");
        let path = path.to_string_lossy();
        match SimulationConfig::load(&path) {
            Err(SimError::Other(e)) => {
                let message = e.to_string();
                assert!(message.contains("Cannot read"));
                assert!(message.contains("comp-risk-missing-config.json"));
            }
            other => panic!("expected an unreadable-file error, got {other:?}"),
        }
    }

    #[test]
    fn load_reads_and_validates_a_file() {
        let path = std::env::temp_dir().join("comp-risk-config-load.json");
        std::fs::write(&path, r#"{"seed": 11, "iterations": 0}"#).unwrap();
        let result = SimulationConfig::load(&path.to_string_lossy());
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(SimError::Configuration(_))));
    }
}
