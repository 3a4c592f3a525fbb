//! Monte Carlo simulation ("MCS").
//!
//! Every trial perturbs the priors of the propagating nodes, then runs a short
//! weakest-parent relaxation. The score is the per-node trial mean; reliability
//! falls as the spread across trials grows.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    clamp_unit, ensure_finite, min_score, AlgorithmId, BeliefRunner, RunContext, RunDiagnostics,
    RunnerOutput,
};
use crate::engine::errors::ExecError;

/// Configuration for Monte Carlo simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub trials: usize,
    /// Relaxation steps per trial.
    pub steps_per_trial: usize,
    /// Share of a node's own sampled value kept at each step; the rest comes
    /// from its weakest parent.
    pub own_weight: f64,
    /// Noise amplitude for priors at 0 or 1.
    pub noise_floor: f64,
    /// Extra amplitude at a prior of 0.5, shrinking linearly toward the edges.
    pub noise_span: f64,
    /// Variance penalty in `1 / (1 + k·meanVariance)`.
    pub variance_penalty: f64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            trials: 300,
            steps_per_trial: 5,
            own_weight: 0.4,
            noise_floor: 0.05,
            noise_span: 0.3,
            variance_penalty: 10.0,
        }
    }
}

impl MonteCarloConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.trials == 0 {
            return Err(ExecError::invalid("mcs: trials must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.own_weight) {
            return Err(ExecError::invalid("mcs: own_weight must be in [0, 1]"));
        }
        if !(self.noise_floor >= 0.0 && self.noise_span >= 0.0 && self.variance_penalty >= 0.0) {
            return Err(ExecError::invalid(
                "mcs: noise_floor, noise_span and variance_penalty must be >= 0",
            ));
        }
        Ok(())
    }

    /// Noise amplitude for a prior: widest at 0.5, narrowest at certainty.
    fn amplitude(&self, prior: f64) -> f64 {
        self.noise_floor + self.noise_span * (0.5 - (prior - 0.5).abs())
    }
}

/// Runner for Monte Carlo simulation.
pub struct MonteCarloRunner;

impl BeliefRunner for MonteCarloRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Mcs
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.monte_carlo;
        let topology = ctx.topology;
        let propagating = ctx.propagating();
        let mut scores = ctx.initial_scores();

        if propagating.is_empty() {
            return Ok(RunnerOutput {
                scores,
                reliability: 1.0,
                diagnostics: RunDiagnostics {
                    converged: true,
                    mean_variance: Some(0.0),
                    ..RunDiagnostics::default()
                },
            });
        }

        let n = topology.len();
        let mut sums = vec![0.0_f64; n];
        let mut squares = vec![0.0_f64; n];
        let mut sample = scores.clone();
        let mut next = scores.clone();

        for _ in 0..config.trials {
            for &i in &propagating {
                let prior = ctx.priors[i];
                let amplitude = config.amplitude(prior);
                sample[i] = clamp_unit(prior + ctx.rng.gen_range(-1.0_f64..=1.0) * amplitude);
            }
            next.copy_from_slice(&sample);

            for _ in 0..config.steps_per_trial {
                for &i in &propagating {
                    if let Some(weakest) = min_score(&sample, topology.parents(i)) {
                        next[i] = clamp_unit(
                            config.own_weight * sample[i] + (1.0 - config.own_weight) * weakest,
                        );
                    }
                }
                sample.copy_from_slice(&next);
            }

            for &i in &propagating {
                sums[i] += sample[i];
                squares[i] += sample[i] * sample[i];
            }
        }

        let trials = config.trials as f64;
        let mut variance_total = 0.0;
        for &i in &propagating {
            let mean = sums[i] / trials;
            let variance = (squares[i] / trials - mean * mean).max(0.0);
            scores[i] = clamp_unit(mean);
            variance_total += variance;
        }
        let mean_variance = variance_total / propagating.len() as f64;

        ensure_finite(AlgorithmId::Mcs, &scores)?;
        let reliability =
            (1.0 / (1.0 + config.variance_penalty * mean_variance)).clamp(0.1, 1.0);
        debug!(reliability, mean_variance, trials = config.trials, "mcs finished");

        Ok(RunnerOutput {
            scores,
            reliability,
            diagnostics: RunDiagnostics {
                iterations_run: config.trials,
                converged: true,
                final_max_delta: 0.0,
                mean_variance: Some(mean_variance),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn amplitude_is_widest_at_one_half() {
        let config = MonteCarloConfig::default();
        assert!((config.amplitude(0.5) - 0.2).abs() < 1e-12);
        assert!((config.amplitude(1.0) - 0.05).abs() < 1e-12);
        assert!((config.amplitude(0.0) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn weak_parent_drags_child_mean_down() {
        let mut g = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let (scores, output) = run(AlgorithmId::Mcs, &mut g, &[("a", 0.1)], true);
        // after five steps the child's own share is 0.4^5; the rest is the parent
        assert!(scores["b"] < 0.2, "b = {}", scores["b"]);
        let variance = output.diagnostics.mean_variance.unwrap();
        assert!(variance >= 0.0);
        assert!((output.reliability - 1.0 / (1.0 + 10.0 * variance)).abs() < 1e-12);
    }
}
