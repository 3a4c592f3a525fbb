//! Single-head self-attention over graph neighbours ("Transformer").
//!
//! Every layer, a node attends to its neighbours through a softmax over learned
//! logits and moves toward the attention-weighted neighbour score. Logits start
//! from a similarity heuristic: nodes of the same domain context or the same
//! kind attend to each other more.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::{
    clamp_unit, ensure_finite, retain_neighbours, AlgorithmId, BeliefRunner, RunContext,
    RunDiagnostics, RunnerOutput, Topology,
};
use crate::engine::errors::ExecError;
use crate::engine::graph::{DomainContext, ModelParams, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    pub layers: usize,
    /// Initial logit bonus for a neighbour in the same domain context.
    pub same_context_bonus: f64,
    /// Initial logit bonus for a neighbour of the same kind.
    pub same_kind_bonus: f64,
    /// Share of the attended context in each layer's update.
    pub context_share: f64,
    pub delta_penalty: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            layers: 3,
            same_context_bonus: 1.0,
            same_kind_bonus: 0.5,
            context_share: 0.8,
            delta_penalty: 5.0,
        }
    }
}

impl AttentionConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.layers == 0 {
            return Err(ExecError::invalid("transformer: layers must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.context_share) {
            return Err(ExecError::invalid(
                "transformer: context_share must be in [0, 1]",
            ));
        }
        let finite = [self.same_context_bonus, self.same_kind_bonus, self.delta_penalty];
        if finite.iter().any(|v| !v.is_finite()) || self.delta_penalty < 0.0 {
            return Err(ExecError::invalid(
                "transformer: bonuses must be finite and delta_penalty >= 0",
            ));
        }
        Ok(())
    }
}

pub struct AttentionRunner;

impl BeliefRunner for AttentionRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Transformer
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.attention;
        let topology = ctx.topology;
        let propagating = ctx.propagating();

        let traits: Vec<Option<(NodeKind, DomainContext)>> = topology
            .ids()
            .iter()
            .map(|id| ctx.graph.node(id.as_str()).map(|n| (n.kind, n.context)))
            .collect();

        let mut models: Vec<ModelParams> = propagating
            .iter()
            .map(|&i| {
                let mut params = ctx.load_params(i);
                init_logits(&mut params, topology, &traits, &config, i);
                params
            })
            .collect();

        let mut scores = ctx.initial_scores();
        let mut next = scores.clone();
        let mut max_delta = 0.0_f64;

        for layer in 0..config.layers {
            max_delta = 0.0;
            for (params, &i) in models.iter_mut().zip(&propagating) {
                let neighbours = topology.neighbors(i);
                let weights = softmax(params, topology, neighbours);
                let context: f64 = neighbours
                    .iter()
                    .zip(&weights)
                    .map(|(&j, a)| a * scores[j])
                    .sum();

                if ctx.training {
                    let error = context - ctx.priors[i];
                    let lr = params.learning_rate;
                    for (&j, a) in neighbours.iter().zip(&weights) {
                        if let Some(logit) = params.attention.get_mut(&topology.ids()[j]) {
                            *logit -= lr * error * (scores[j] - context) * a;
                        }
                    }
                    params.last_error = error;
                }

                let updated = clamp_unit(
                    (1.0 - config.context_share) * scores[i] + config.context_share * context,
                );
                max_delta = max_delta.max((updated - scores[i]).abs());
                next[i] = updated;
            }
            std::mem::swap(&mut scores, &mut next);
            trace!(layer, max_delta, "transformer layer");
        }

        for (params, &i) in models.into_iter().zip(&propagating) {
            ctx.store_params(i, params);
        }

        ensure_finite(AlgorithmId::Transformer, &scores)?;
        let reliability = (1.0 - config.delta_penalty * max_delta).clamp(0.1, 1.0);
        debug!(reliability, max_delta, layers = config.layers, "transformer finished");

        Ok(RunnerOutput {
            scores,
            reliability,
            diagnostics: RunDiagnostics {
                iterations_run: config.layers,
                converged: true,
                final_max_delta: max_delta,
                mean_variance: None,
            },
        })
    }
}

fn init_logits(
    params: &mut ModelParams,
    topology: &Topology,
    traits: &[Option<(NodeKind, DomainContext)>],
    config: &AttentionConfig,
    i: usize,
) {
    retain_neighbours(&mut params.attention, topology, i);
    for &j in topology.neighbors(i) {
        params
            .attention
            .entry(topology.ids()[j].clone())
            .or_insert_with(|| {
                let mut logit = 0.0;
                if let (Some((kind_i, ctx_i)), Some((kind_j, ctx_j))) = (traits[i], traits[j]) {
                    if ctx_i == ctx_j {
                        logit += config.same_context_bonus;
                    }
                    if kind_i == kind_j {
                        logit += config.same_kind_bonus;
                    }
                }
                logit
            });
    }
}

/// Attention weights over `neighbours`, max-shifted for stability.
fn softmax(params: &ModelParams, topology: &Topology, neighbours: &[usize]) -> SmallVec<[f64; 8]> {
    let logits: SmallVec<[f64; 8]> = neighbours
        .iter()
        .map(|&j| {
            params
                .attention
                .get(&topology.ids()[j])
                .copied()
                .unwrap_or(0.0)
        })
        .collect();
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut weights: SmallVec<[f64; 8]> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    weights
}
