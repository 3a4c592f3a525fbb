//! Rule-based weakest-parent cascade ("DT").
//!
//! A node can be no healthier than its weakest parent, nor healthier than its
//! own prior. Nodes without parents keep their prior.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ensure_finite, min_score, AlgorithmId, BeliefRunner, RunContext, RunDiagnostics, RunnerOutput,
};
use crate::engine::errors::ExecError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionTreeConfig {
    pub passes: usize,
    /// Reported reliability; the rules carry no convergence signal.
    pub reliability: f64,
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self {
            passes: 5,
            reliability: 0.6,
        }
    }
}

impl DecisionTreeConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.passes == 0 {
            return Err(ExecError::invalid("dt: passes must be > 0"));
        }
        if !(0.1..=1.0).contains(&self.reliability) {
            return Err(ExecError::invalid("dt: reliability must be in [0.1, 1]"));
        }
        Ok(())
    }
}

pub struct DecisionTreeRunner;

impl BeliefRunner for DecisionTreeRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Dt
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.decision_tree;
        let topology = ctx.topology;
        let propagating = ctx.propagating();

        let mut scores = ctx.initial_scores();
        let mut next = scores.clone();
        let mut max_delta = 0.0_f64;

        for _ in 0..config.passes {
            max_delta = 0.0;
            for &i in &propagating {
                let prior = ctx.priors[i];
                let updated = match min_score(&scores, topology.parents(i)) {
                    Some(weakest) => weakest.min(prior),
                    None => prior,
                };
                max_delta = max_delta.max((updated - scores[i]).abs());
                next[i] = updated;
            }
            std::mem::swap(&mut scores, &mut next);
        }

        ensure_finite(AlgorithmId::Dt, &scores)?;
        debug!(reliability = config.reliability, passes = config.passes, "dt finished");

        Ok(RunnerOutput {
            scores,
            reliability: config.reliability,
            diagnostics: RunDiagnostics {
                iterations_run: config.passes,
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
    fn weakest_parent_cascades_down_a_chain() {
        let mut g = graph(
            vec![part("a"), part("b"), part("c"), part("d")],
            &[("a", "b"), ("b", "c"), ("d", "c")],
        );
        let (scores, output) = run(AlgorithmId::Dt, &mut g, &[("a", 0.4)], true);
        assert_eq!(scores["b"], 0.4);
        assert_eq!(scores["c"], 0.4);
        // roots without evidence keep their prior
        assert_eq!(scores["d"], 0.95);
        assert_eq!(output.reliability, 0.6);
    }

    #[test]
    fn healthy_parent_never_raises_a_weak_prior() {
        let mut g = graph(
            vec![part("a"), part("b").with_attribute("wear", "high", 0.3)],
            &[("a", "b")],
        );
        let (scores, _) = run(AlgorithmId::Dt, &mut g, &[("a", 0.99)], true);
        assert_eq!(scores["b"], 0.3);
    }
}
