//! Loopy belief relaxation ("BN").
//!
//! Each non-evidence node moves toward a weighted blend of three signals:
//! its own prior, the weakest parent (causal signal) and the weakest child
//! (diagnostic signal, weighted highest because downstream observations are the
//! strongest evidence about an upstream fault). Updates are damped and
//! synchronous; cycles are tolerated without a convergence guarantee.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{
    clamp_unit, ensure_finite, min_score, AlgorithmId, BeliefRunner, RunContext, RunDiagnostics,
    RunnerOutput,
};
use crate::engine::errors::ExecError;

/// Configuration for loopy belief relaxation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesianConfig {
    /// Maximum synchronous iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the max absolute per-node delta.
    pub convergence_tolerance: f64,
    /// Share of the freshly computed value in each damped update, in (0, 1].
    pub update_rate: f64,
    pub prior_weight: f64,
    /// Weight of the weakest parent, applied when the node has parents.
    pub causal_weight: f64,
    /// Weight of the weakest child, applied when the node has children.
    pub diagnostic_weight: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_tolerance: 1e-4,
            update_rate: 0.8,
            prior_weight: 1.0,
            causal_weight: 1.5,
            diagnostic_weight: 2.0,
        }
    }
}

impl BayesianConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.max_iterations == 0 {
            return Err(ExecError::invalid("bn: max_iterations must be > 0"));
        }
        if !(self.update_rate > 0.0 && self.update_rate <= 1.0) {
            return Err(ExecError::invalid("bn: update_rate must be in (0, 1]"));
        }
        if self.convergence_tolerance <= 0.0 || !self.convergence_tolerance.is_finite() {
            return Err(ExecError::invalid(
                "bn: convergence_tolerance must be finite and > 0",
            ));
        }
        for (name, w) in [
            ("prior_weight", self.prior_weight),
            ("causal_weight", self.causal_weight),
            ("diagnostic_weight", self.diagnostic_weight),
        ] {
            if !(w.is_finite() && w >= 0.0) {
                return Err(ExecError::invalid(format!(
                    "bn: {} must be finite and >= 0",
                    name
                )));
            }
        }
        if self.prior_weight <= 0.0 {
            return Err(ExecError::invalid("bn: prior_weight must be > 0"));
        }
        Ok(())
    }
}

/// Runner for loopy belief relaxation.
pub struct BayesianRunner;

impl BeliefRunner for BayesianRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Bn
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.bayesian;
        let topology = ctx.topology;
        let propagating = ctx.propagating();

        let mut scores = ctx.initial_scores();
        let mut next = scores.clone();
        let mut diagnostics = RunDiagnostics {
            converged: true,
            ..RunDiagnostics::default()
        };

        if !propagating.is_empty() {
            diagnostics.converged = false;
            for iteration in 0..config.max_iterations {
                let mut max_delta = 0.0_f64;
                for &i in &propagating {
                    let mut numerator = config.prior_weight * ctx.priors[i];
                    let mut denominator = config.prior_weight;
                    if let Some(causal) = min_score(&scores, topology.parents(i)) {
                        numerator += config.causal_weight * causal;
                        denominator += config.causal_weight;
                    }
                    if let Some(diagnostic) = min_score(&scores, topology.children(i)) {
                        numerator += config.diagnostic_weight * diagnostic;
                        denominator += config.diagnostic_weight;
                    }
                    let target = numerator / denominator;
                    let old = scores[i];
                    let updated =
                        clamp_unit(config.update_rate * target + (1.0 - config.update_rate) * old);
                    max_delta = max_delta.max((updated - old).abs());
                    next[i] = updated;
                }

                std::mem::swap(&mut scores, &mut next);
                diagnostics.iterations_run = iteration + 1;
                diagnostics.final_max_delta = max_delta;
                trace!(iteration, max_delta, "bn iteration");
                if max_delta < config.convergence_tolerance {
                    diagnostics.converged = true;
                    break;
                }
            }
            if !diagnostics.converged {
                warn!(
                    iterations = diagnostics.iterations_run,
                    max_delta = diagnostics.final_max_delta,
                    "bn hit the iteration cap without converging"
                );
            }
        }

        ensure_finite(AlgorithmId::Bn, &scores)?;
        let reliability = reliability(&diagnostics);
        debug!(
            reliability,
            iterations = diagnostics.iterations_run,
            converged = diagnostics.converged,
            "bn finished"
        );
        Ok(RunnerOutput {
            scores,
            reliability,
            diagnostics,
        })
    }
}

/// `1 − 100·maxDelta`, halved when the run did not converge, kept in `[0.1, 1]`.
fn reliability(diagnostics: &RunDiagnostics) -> f64 {
    let mut r = 1.0 - diagnostics.final_max_delta * 100.0;
    if !diagnostics.converged {
        r *= 0.5;
    }
    r.clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn child_with_evidence_parent_settles_between_prior_and_evidence() {
        let mut g = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let (scores, output) = run(AlgorithmId::Bn, &mut g, &[("a", 0.9)], true);
        // fixed point: (0.95 + 1.5 * 0.9) / 2.5 = 0.92
        assert!((scores["b"] - 0.92).abs() < 1e-3, "b = {}", scores["b"]);
        assert!(output.diagnostics.converged);
        assert!(output.reliability > 0.98);
    }

    #[test]
    fn downstream_evidence_pulls_parent_harder_than_upstream() {
        let mut up = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let (from_parent, _) = run(AlgorithmId::Bn, &mut up, &[("a", 0.2)], true);
        let mut down = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let (from_child, _) = run(AlgorithmId::Bn, &mut down, &[("b", 0.2)], true);
        assert!(from_child["a"] < from_parent["b"]);
    }

    #[test]
    fn tolerates_cycles() {
        let mut g = graph(
            vec![part("a"), part("b"), part("c")],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        let (scores, output) = run(AlgorithmId::Bn, &mut g, &[], true);
        for s in scores.values() {
            assert!((0.0..=1.0).contains(s));
        }
        assert!(output.diagnostics.iterations_run <= 50);
    }

    #[test]
    fn non_convergence_halves_reliability() {
        let diagnostics = RunDiagnostics {
            iterations_run: 50,
            converged: false,
            final_max_delta: 0.002,
            mean_variance: None,
        };
        assert!((reliability(&diagnostics) - 0.4).abs() < 1e-12);
        let diverging = RunDiagnostics {
            final_max_delta: 0.5,
            ..diagnostics
        };
        assert_eq!(reliability(&diverging), 0.1);
    }

    #[test]
    fn validate_rejects_bad_config() {
        let config = BayesianConfig {
            max_iterations: 0,
            ..BayesianConfig::default()
        };
        assert!(config.validate().is_err());
        let config = BayesianConfig {
            update_rate: 1.5,
            ..BayesianConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
