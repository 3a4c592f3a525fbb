//! Online linear regression ("LR").
//!
//! Each node learns a bias plus one weight per neighbour (parents and
//! children) that predicts its prior from the neighbours' current scores.
//! Weights start at `1/n`, so an untrained node predicts the neighbour mean.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    clamp_unit, ensure_finite, retain_neighbours, AlgorithmId, BeliefRunner, RunContext,
    RunDiagnostics, RunnerOutput, Topology,
};
use crate::engine::errors::ExecError;
use crate::engine::graph::{ModelParams, NodeId};

/// Configuration shared by the linear and logistic regression runners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Online gradient steps per run.
    pub steps: usize,
    /// Share of the prediction in a node's propagated value; the rest is the prior.
    pub prediction_share: f64,
    pub linear_base_reliability: f64,
    pub linear_change_penalty: f64,
    pub logistic_base_reliability: f64,
    pub logistic_change_penalty: f64,
    /// Learning rate used when a logistic learner trains on an evidence label.
    pub evidence_learning_rate: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            prediction_share: 0.5,
            linear_base_reliability: 0.95,
            linear_change_penalty: 10.0,
            logistic_base_reliability: 0.98,
            logistic_change_penalty: 8.0,
            evidence_learning_rate: 0.2,
        }
    }
}

impl RegressionConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.steps == 0 {
            return Err(ExecError::invalid("regression: steps must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.prediction_share) {
            return Err(ExecError::invalid(
                "regression: prediction_share must be in [0, 1]",
            ));
        }
        let finite = [
            self.linear_base_reliability,
            self.linear_change_penalty,
            self.logistic_base_reliability,
            self.logistic_change_penalty,
            self.evidence_learning_rate,
        ];
        if finite.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ExecError::invalid(
                "regression: reliability constants and learning rate must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// Fills in a `1/n` weight for every neighbour the table has not seen yet.
/// Prunes weights of former neighbours and seeds new ones at `1/n`.
pub(super) fn init_weights(weights: &mut FxHashMap<NodeId, f64>, topology: &Topology, i: usize) {
    retain_neighbours(weights, topology, i);
    let neighbours = topology.neighbors(i);
    let initial = 1.0 / neighbours.len() as f64;
    for &j in neighbours {
        weights.entry(topology.ids()[j].clone()).or_insert(initial);
    }
}

pub(super) fn weight_of(weights: &FxHashMap<NodeId, f64>, topology: &Topology, j: usize) -> f64 {
    weights.get(&topology.ids()[j]).copied().unwrap_or(0.0)
}

pub struct LinearRegressionRunner;

impl BeliefRunner for LinearRegressionRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Lr
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.regression;
        let topology = ctx.topology;
        let propagating = ctx.propagating();

        let mut models: Vec<ModelParams> = propagating
            .iter()
            .map(|&i| {
                let mut params = ctx.load_params(i);
                init_weights(&mut params.weights, topology, i);
                params
            })
            .collect();

        let mut scores = ctx.initial_scores();
        let mut next = scores.clone();
        let mut max_change = 0.0_f64;

        for _ in 0..config.steps {
            max_change = 0.0;
            for (params, &i) in models.iter_mut().zip(&propagating) {
                let prior = ctx.priors[i];
                let linear: f64 = topology
                    .neighbors(i)
                    .iter()
                    .map(|&j| weight_of(&params.weights, topology, j) * scores[j])
                    .sum();
                let prediction = clamp_unit(params.bias + linear);
                let error = prediction - prior;

                if ctx.training {
                    let lr = params.learning_rate;
                    for &j in topology.neighbors(i) {
                        if let Some(w) = params.weights.get_mut(&topology.ids()[j]) {
                            *w -= lr * error * scores[j];
                        }
                    }
                    params.bias -= lr * error;
                    params.last_error = error;
                }

                let updated = clamp_unit(
                    config.prediction_share * prediction + (1.0 - config.prediction_share) * prior,
                );
                max_change = max_change.max((updated - scores[i]).abs());
                next[i] = updated;
            }
            std::mem::swap(&mut scores, &mut next);
        }

        for (params, &i) in models.into_iter().zip(&propagating) {
            ctx.store_params(i, params);
        }

        ensure_finite(AlgorithmId::Lr, &scores)?;
        let reliability = (config.linear_base_reliability
            - config.linear_change_penalty * max_change)
            .clamp(0.1, 1.0);
        debug!(reliability, max_change, training = ctx.training, "lr finished");

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
