//! Mean-field variational smoothing ("VI").

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    clamp_unit, ensure_finite, mean_score, AlgorithmId, BeliefRunner, RunContext, RunDiagnostics,
    RunnerOutput,
};
use crate::engine::errors::ExecError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationalConfig {
    pub iterations: usize,
    /// Share of the neighbour mean in the target; the rest is the prior.
    pub neighbour_share: f64,
    /// Share of the target in each update; the rest is the current value.
    pub step: f64,
    pub delta_penalty: f64,
}

impl Default for VariationalConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            neighbour_share: 0.8,
            step: 0.7,
            delta_penalty: 10.0,
        }
    }
}

impl VariationalConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.iterations == 0 {
            return Err(ExecError::invalid("vi: iterations must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.neighbour_share) || !(0.0..=1.0).contains(&self.step) {
            return Err(ExecError::invalid(
                "vi: neighbour_share and step must be in [0, 1]",
            ));
        }
        if !(self.delta_penalty.is_finite() && self.delta_penalty >= 0.0) {
            return Err(ExecError::invalid("vi: delta_penalty must be finite and >= 0"));
        }
        Ok(())
    }
}

pub struct VariationalRunner;

impl BeliefRunner for VariationalRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Vi
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.variational;
        let topology = ctx.topology;
        let propagating = ctx.propagating();

        let mut scores = ctx.initial_scores();
        let mut next = scores.clone();
        let mut max_delta = 0.0_f64;

        for iteration in 0..config.iterations {
            max_delta = 0.0;
            for &i in &propagating {
                let Some(neighbourhood) = mean_score(&scores, topology.neighbors(i)) else {
                    continue;
                };
                let target = config.neighbour_share * neighbourhood
                    + (1.0 - config.neighbour_share) * ctx.priors[i];
                let updated = clamp_unit((1.0 - config.step) * scores[i] + config.step * target);
                max_delta = max_delta.max((updated - scores[i]).abs());
                next[i] = updated;
            }
            std::mem::swap(&mut scores, &mut next);
            trace!(iteration, max_delta, "vi iteration");
        }

        ensure_finite(AlgorithmId::Vi, &scores)?;
        let reliability = (1.0 - config.delta_penalty * max_delta).clamp(0.1, 1.0);
        debug!(reliability, max_delta, "vi finished");

        Ok(RunnerOutput {
            scores,
            reliability,
            diagnostics: RunDiagnostics {
                iterations_run: config.iterations,
                converged: true,
                final_max_delta: max_delta,
                mean_variance: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn smooths_toward_neighbours_and_settles() {
        let mut g = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let (scores, output) = run(AlgorithmId::Vi, &mut g, &[("a", 0.5)], true);
        // fixed point: 0.8 * 0.5 + 0.2 * 0.95 = 0.59
        assert!((scores["b"] - 0.59).abs() < 1e-4, "b = {}", scores["b"]);
        assert!(output.reliability > 0.99);
    }

    #[test]
    fn healthy_graph_stays_at_prior() {
        let mut g = graph(vec![part("a"), part("b"), part("c")], &[("a", "b"), ("b", "c")]);
        let (scores, output) = run(AlgorithmId::Vi, &mut g, &[], true);
        for s in scores.values() {
            assert!((s - 0.95).abs() < 1e-12);
        }
        assert!(output.reliability > 1.0 - 1e-9);
    }
}
