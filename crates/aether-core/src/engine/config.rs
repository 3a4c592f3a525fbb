//! Engine configuration.
//!
//! Every runner reads its constants from here. Defaults reproduce the stock
//! behaviour; partial JSON documents are accepted because every section is
//! `#[serde(default)]`.

use serde::{Deserialize, Serialize};

use crate::engine::errors::ExecError;
use crate::engine::runners::attention::AttentionConfig;
use crate::engine::runners::bayesian::BayesianConfig;
use crate::engine::runners::decision_tree::DecisionTreeConfig;
use crate::engine::runners::linear::RegressionConfig;
use crate::engine::runners::mcmc::McmcConfig;
use crate::engine::runners::monte_carlo::MonteCarloConfig;
use crate::engine::runners::variational::VariationalConfig;
use crate::engine::sensitivity::SensitivityConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bayesian: BayesianConfig,
    pub monte_carlo: MonteCarloConfig,
    pub mcmc: McmcConfig,
    pub decision_tree: DecisionTreeConfig,
    pub regression: RegressionConfig,
    pub variational: VariationalConfig,
    pub attention: AttentionConfig,
    pub sensitivity: SensitivityConfig,
    /// Seed for the sampling runners. `None` seeds from OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Decimal places kept in fused scores.
    pub round_decimals: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bayesian: BayesianConfig::default(),
            monte_carlo: MonteCarloConfig::default(),
            mcmc: McmcConfig::default(),
            decision_tree: DecisionTreeConfig::default(),
            regression: RegressionConfig::default(),
            variational: VariationalConfig::default(),
            attention: AttentionConfig::default(),
            sensitivity: SensitivityConfig::default(),
            seed: None,
            round_decimals: 4,
        }
    }
}

impl EngineConfig {
    /// Default configuration with a fixed sampling seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ExecError> {
        self.bayesian.validate()?;
        self.monte_carlo.validate()?;
        self.mcmc.validate()?;
        self.decision_tree.validate()?;
        self.regression.validate()?;
        self.variational.validate()?;
        self.attention.validate()?;
        self.sensitivity.validate()?;
        if self.round_decimals > 12 {
            return Err(ExecError::invalid("round_decimals must be <= 12"));
        }
        Ok(())
    }

    /// Rounds a fused score to the configured precision.
    pub(crate) fn round(&self, value: f64) -> f64 {
        let scale = 10_f64.powi(self.round_decimals as i32);
        (value * scale).round() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"seed": 42, "bayesian": {"max_iterations": 10}}"#).unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.bayesian.max_iterations, 10);
        assert_eq!(config.bayesian.update_rate, 0.8);
        assert_eq!(config.mcmc, McmcConfig::default());
        assert_eq!(config.round_decimals, 4);
    }

    #[test]
    fn rounds_to_configured_decimals() {
        let config = EngineConfig::default();
        assert_eq!(config.round(0.123456), 0.1235);
        let coarse = EngineConfig {
            round_decimals: 1,
            ..EngineConfig::default()
        };
        assert_eq!(coarse.round(0.96), 1.0);
    }

    #[test]
    fn invalid_section_fails_validation() {
        let mut config = EngineConfig::default();
        config.variational.step = 2.0;
        assert!(config.validate().is_err());
    }
}
