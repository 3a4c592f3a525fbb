//! Online logistic regression ("LogReg").
//!
//! Same neighbour-weight layout as [`super::linear`], passed through a sigmoid
//! over centred neighbour scores. Evidence acts as a supervised label: an
//! evidenced node with neighbours trains toward its evidence at a boosted rate
//! but keeps reporting the evidence value.

use tracing::debug;

use super::linear::{init_weights, weight_of};
use super::{
    clamp_unit, ensure_finite, sigmoid, AlgorithmId, BeliefRunner, RunContext, RunDiagnostics,
    RunnerOutput,
};
use crate::engine::errors::ExecError;
use crate::engine::graph::ModelParams;

pub struct LogisticRegressionRunner;

impl BeliefRunner for LogisticRegressionRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::LogReg
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.regression;
        let topology = ctx.topology;
        let learners: Vec<usize> = (0..topology.len())
            .filter(|&i| !topology.is_isolated(i))
            .collect();

        let mut models: Vec<ModelParams> = learners
            .iter()
            .map(|&i| {
                let mut params = ctx.load_params(i);
                init_weights(&mut params.logistic_weights, topology, i);
                params
            })
            .collect();

        let mut scores = ctx.initial_scores();
        let mut next = scores.clone();
        let mut max_change = 0.0_f64;

        for _ in 0..config.steps {
            max_change = 0.0;
            for (params, &i) in models.iter_mut().zip(&learners) {
                let prior = ctx.priors[i];
                let evidence = ctx.evidence[i];
                let centred: f64 = topology
                    .neighbors(i)
                    .iter()
                    .map(|&j| weight_of(&params.logistic_weights, topology, j) * (scores[j] - 0.5))
                    .sum();
                let prediction = sigmoid(params.logistic_bias + centred);

                if ctx.training {
                    let target = evidence.unwrap_or(prior);
                    let lr = if evidence.is_some() {
                        config.evidence_learning_rate
                    } else {
                        params.learning_rate
                    };
                    let error = prediction - target;
                    let gradient = error * prediction * (1.0 - prediction);
                    for &j in topology.neighbors(i) {
                        if let Some(w) = params.logistic_weights.get_mut(&topology.ids()[j]) {
                            *w -= lr * gradient * (scores[j] - 0.5);
                        }
                    }
                    params.logistic_bias -= lr * gradient;
                    params.last_error = error;
                }

                if evidence.is_none() {
                    let updated = clamp_unit(
                        config.prediction_share * prediction
                            + (1.0 - config.prediction_share) * prior,
                    );
                    max_change = max_change.max((updated - scores[i]).abs());
                    next[i] = updated;
                }
            }
            std::mem::swap(&mut scores, &mut next);
        }

        for (params, &i) in models.into_iter().zip(&learners) {
            ctx.store_params(i, params);
        }

        ensure_finite(AlgorithmId::LogReg, &scores)?;
        let reliability = (config.logistic_base_reliability
            - config.logistic_change_penalty * max_change)
            .clamp(0.2, 1.0);
        debug!(reliability, max_change, learners = learners.len(), "logreg finished");

        Ok(RunnerOutput {
            scores,
            reliability,
            diagnostics: RunDiagnostics {
                iterations_run: config.steps,
                converged: true,
                final_max_delta: max_change,
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
    fn evidence_node_learns_but_keeps_its_value() {
        let mut g = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let (scores, _) = run(AlgorithmId::LogReg, &mut g, &[("a", 0.1)], true);
        assert_eq!(scores["a"], 0.1);
        let params = g.node("a").unwrap().model_params.clone().unwrap();
        // sigmoid output sits above the 0.1 label, so the bias is pushed down
        assert!(params.logistic_bias < 0.0);
        assert!(params.last_error > 0.0);
        // the linear table is untouched
        assert!(params.weights.is_empty());
    }

    #[test]
    fn inference_without_training_leaves_nodes_untouched() {
        let mut g = graph(vec![part("a"), part("b")], &[("a", "b")]);
        let before = g.clone();
        let (scores, output) = run(AlgorithmId::LogReg, &mut g, &[], false);
        for id in ["a", "b"] {
            assert_eq!(g.node(id), before.node(id));
            assert!((0.0..=1.0).contains(&scores[id]));
        }
        assert!(output.reliability >= 0.2);
    }
}
