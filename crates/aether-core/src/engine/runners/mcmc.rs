//! Metropolis sampling ("MCMC").
//!
//! Each propagating node gets its own chain. The target density is
//! `exp(−k·(v − μ)²)` where `μ` blends the node's prior with its weakest parent
//! and weakest child, read from the starting state. Proposal width adapts
//! toward a fixed acceptance band.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    clamp_unit, ensure_finite, min_score, AlgorithmId, BeliefRunner, RunContext, RunDiagnostics,
    RunnerOutput,
};
use crate::engine::errors::ExecError;

/// Configuration for Metropolis sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McmcConfig {
    /// Discarded iterations at the start of each chain.
    pub burn_in: usize,
    /// Kept samples per chain.
    pub samples: usize,
    pub initial_step: f64,
    /// Iterations between step-size adjustments.
    pub adapt_interval: usize,
    pub min_acceptance: f64,
    pub max_acceptance: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// `k` in the acceptance probability `exp(−k·ΔE)`.
    pub energy_scale: f64,
    pub prior_weight: f64,
    pub parent_weight: f64,
    pub child_weight: f64,
    /// Variance penalty in `1 / (1 + k·meanVariance)`.
    pub variance_penalty: f64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            burn_in: 100,
            samples: 400,
            initial_step: 0.1,
            adapt_interval: 50,
            min_acceptance: 0.2,
            max_acceptance: 0.3,
            min_step: 0.001,
            max_step: 0.5,
            energy_scale: 10.0,
            prior_weight: 1.0,
            parent_weight: 1.5,
            child_weight: 2.0,
            variance_penalty: 8.0,
        }
    }
}

impl McmcConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.samples == 0 || self.adapt_interval == 0 {
            return Err(ExecError::invalid(
                "mcmc: samples and adapt_interval must be > 0",
            ));
        }
        if !(self.min_step > 0.0 && self.min_step <= self.max_step && self.max_step.is_finite()) {
            return Err(ExecError::invalid(
                "mcmc: step bounds must satisfy 0 < min_step <= max_step",
            ));
        }
        if !(self.min_step..=self.max_step).contains(&self.initial_step) {
            return Err(ExecError::invalid(
                "mcmc: initial_step must lie within the step bounds",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_acceptance)
            || !(self.min_acceptance..=1.0).contains(&self.max_acceptance)
        {
            return Err(ExecError::invalid("mcmc: acceptance band must be ordered within [0, 1]"));
        }
        if !(self.energy_scale > 0.0 && self.prior_weight > 0.0) {
            return Err(ExecError::invalid(
                "mcmc: energy_scale and prior_weight must be > 0",
            ));
        }
        Ok(())
    }
}

/// Runner for Metropolis sampling.
pub struct McmcRunner;

impl BeliefRunner for McmcRunner {
    fn algorithm(&self) -> AlgorithmId {
        AlgorithmId::Mcmc
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError> {
        let config = ctx.config.mcmc;
        let topology = ctx.topology;
        let propagating = ctx.propagating();
        let state = ctx.initial_scores();
        let mut scores = state.clone();
        let mut variance_total = 0.0;

        for &i in &propagating {
            let mut numerator = config.prior_weight * ctx.priors[i];
            let mut denominator = config.prior_weight;
            if let Some(causal) = min_score(&state, topology.parents(i)) {
                numerator += config.parent_weight * causal;
                denominator += config.parent_weight;
            }
            if let Some(diagnostic) = min_score(&state, topology.children(i)) {
                numerator += config.child_weight * diagnostic;
                denominator += config.child_weight;
            }
            let expectation = numerator / denominator;

            let chain = sample_chain(&config, state[i], expectation, ctx.rng);
            trace!(node = %topology.ids()[i], mean = chain.mean, step = chain.final_step, "mcmc chain");
            scores[i] = clamp_unit(chain.mean);
            variance_total += chain.variance;
        }

        let mean_variance = if propagating.is_empty() {
            0.0
        } else {
            variance_total / propagating.len() as f64
        };

        ensure_finite(AlgorithmId::Mcmc, &scores)?;
        let reliability =
            (1.0 / (1.0 + config.variance_penalty * mean_variance)).clamp(0.1, 1.0);
        debug!(reliability, mean_variance, chains = propagating.len(), "mcmc finished");

        Ok(RunnerOutput {
            scores,
            reliability,
            diagnostics: RunDiagnostics {
                iterations_run: config.burn_in + config.samples,
                converged: true,
                final_max_delta: 0.0,
                mean_variance: Some(mean_variance),
            },
        })
    }
}

struct ChainSummary {
    mean: f64,
    variance: f64,
    final_step: f64,
}

fn sample_chain<R: Rng + ?Sized>(
    config: &McmcConfig,
    start: f64,
    expectation: f64,
    rng: &mut R,
) -> ChainSummary {
    let energy = |v: f64| (v - expectation) * (v - expectation);

    let mut current = start;
    let mut current_energy = energy(current);
    let mut step = config.initial_step;
    let mut accepted = 0_usize;
    let mut sum = 0.0;
    let mut squares = 0.0;

    for iteration in 0..config.burn_in + config.samples {
        let proposal = clamp_unit(current + rng.gen_range(-step..=step));
        let proposal_energy = energy(proposal);
        let delta = proposal_energy - current_energy;
        if delta <= 0.0 || rng.gen::<f64>() < (-config.energy_scale * delta).exp() {
            current = proposal;
            current_energy = proposal_energy;
            accepted += 1;
        }

        if (iteration + 1) % config.adapt_interval == 0 {
            let rate = accepted as f64 / config.adapt_interval as f64;
            if rate < config.min_acceptance {
                step *= 0.8;
            } else if rate > config.max_acceptance {
                step *= 1.2;
            }
            step = step.clamp(config.min_step, config.max_step);
            accepted = 0;
        }

        if iteration >= config.burn_in {
            sum += current;
            squares += current * current;
        }
    }

    let n = config.samples as f64;
    let mean = sum / n;
    ChainSummary {
        mean,
        variance: (squares / n - mean * mean).max(0.0),
        final_step: step,
    }
}
