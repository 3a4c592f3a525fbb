//! Belief estimation runners.
//!
//! Eight independent estimators share one contract: given the graph, the
//! validated evidence and the training flag, produce a score per node plus a
//! self-assessed reliability. The consensus layer iterates them generically.
//!
//! Rules every runner follows:
//! - an evidenced node reports exactly its evidence value and is never recomputed;
//! - a node with no parents, no children and no evidence reports its prior;
//! - updates inside one iteration are synchronous, computed from the previous
//!   iteration's scores, so results never depend on node iteration order;
//! - scores stay in `[0, 1]`.

pub mod attention;
pub mod bayesian;
pub mod decision_tree;
pub mod linear;
pub mod logistic;
pub mod mcmc;
pub mod monte_carlo;
pub mod variational;

use std::fmt;
use std::str::FromStr;

use rand_chacha::ChaCha20Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::engine::config::EngineConfig;
use crate::engine::errors::ExecError;
use crate::engine::graph::{ModelParams, NodeId, ProcessGraph};

/// Identifier of an estimation algorithm.
///
/// The declaration order is the order in which the engine runs a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmId {
    /// Loopy relaxation over parents and children.
    Bn,
    /// Monte Carlo simulation of noisy priors.
    Mcs,
    /// Metropolis sampling around a local expectation.
    Mcmc,
    /// Rule-based weakest-parent cascade.
    Dt,
    /// Online linear regression over neighbours.
    Lr,
    /// Online logistic regression over neighbours.
    #[serde(rename = "logreg")]
    LogReg,
    /// Mean-field variational smoothing.
    Vi,
    /// Learned self-attention over neighbours.
    Transformer,
}

impl AlgorithmId {
    pub const ALL: [AlgorithmId; 8] = [
        AlgorithmId::Bn,
        AlgorithmId::Mcs,
        AlgorithmId::Mcmc,
        AlgorithmId::Dt,
        AlgorithmId::Lr,
        AlgorithmId::LogReg,
        AlgorithmId::Vi,
        AlgorithmId::Transformer,
    ];

    /// Fixed trust multiplier applied on top of the run's reliability.
    pub fn sophistication_bias(self) -> f64 {
        match self {
            AlgorithmId::Bn => 1.5,
            AlgorithmId::Mcmc | AlgorithmId::Mcs => 1.2,
            AlgorithmId::Transformer => 1.1,
            AlgorithmId::Dt | AlgorithmId::Lr | AlgorithmId::LogReg | AlgorithmId::Vi => 0.8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmId::Bn => "bn",
            AlgorithmId::Mcs => "mcs",
            AlgorithmId::Mcmc => "mcmc",
            AlgorithmId::Dt => "dt",
            AlgorithmId::Lr => "lr",
            AlgorithmId::LogReg => "logreg",
            AlgorithmId::Vi => "vi",
            AlgorithmId::Transformer => "transformer",
        }
    }

    /// The runner implementing this algorithm.
    pub fn runner(self) -> &'static dyn BeliefRunner {
        match self {
            AlgorithmId::Bn => &bayesian::BayesianRunner,
            AlgorithmId::Mcs => &monte_carlo::MonteCarloRunner,
            AlgorithmId::Mcmc => &mcmc::McmcRunner,
            AlgorithmId::Dt => &decision_tree::DecisionTreeRunner,
            AlgorithmId::Lr => &linear::LinearRegressionRunner,
            AlgorithmId::LogReg => &logistic::LogisticRegressionRunner,
            AlgorithmId::Vi => &variational::VariationalRunner,
            AlgorithmId::Transformer => &attention::AttentionRunner,
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmId {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AlgorithmId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| ExecError::invalid(format!("unknown algorithm '{}'", s)))
    }
}

/// Capability shared by all estimation algorithms.
pub trait BeliefRunner: Send + Sync {
    fn algorithm(&self) -> AlgorithmId;

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<RunnerOutput, ExecError>;
}

/// Convergence information reported by a run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunDiagnostics {
    /// Iterations, passes, steps or layers actually executed.
    pub iterations_run: usize,
    /// Whether a tolerance-based stop was reached (always true for fixed budgets).
    pub converged: bool,
    /// Largest per-node change in the last iteration.
    pub final_max_delta: f64,
    /// Mean per-node sample variance, for sampling runners.
    pub mean_variance: Option<f64>,
}

/// Result of one runner: dense scores in topology order plus reliability.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOutput {
    pub scores: Vec<f64>,
    pub reliability: f64,
    pub diagnostics: RunDiagnostics,
}

/// Read-only structural snapshot of a graph in deterministic (id) order.
///
/// Parent, child and neighbour lists are deduplicated: parallel edges count once.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    ids: Vec<NodeId>,
    index: FxHashMap<NodeId, usize>,
    parents: Vec<SmallVec<[usize; 4]>>,
    children: Vec<SmallVec<[usize; 4]>>,
    neighbors: Vec<SmallVec<[usize; 8]>>,
}

impl Topology {
    pub fn from_graph(graph: &ProcessGraph) -> Self {
        let ids = graph.sorted_node_ids();
        let index: FxHashMap<NodeId, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut parents: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); ids.len()];
        let mut children: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); ids.len()];
        for edge in graph.edges() {
            if let (Some(&src), Some(&dst)) = (index.get(&edge.source), index.get(&edge.target)) {
                parents[dst].push(src);
                children[src].push(dst);
            }
        }

        for list in parents.iter_mut().chain(children.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let neighbors = parents
            .iter()
            .zip(&children)
            .map(|(p, c)| {
                let mut merged: SmallVec<[usize; 8]> = p.iter().chain(c.iter()).copied().collect();
                merged.sort_unstable();
                merged.dedup();
                merged
            })
            .collect();

        Self {
            ids,
            index,
            parents,
            children,
            neighbors,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn parents(&self, i: usize) -> &[usize] {
        &self.parents[i]
    }

    pub fn children(&self, i: usize) -> &[usize] {
        &self.children[i]
    }

    /// Parents and children merged.
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.neighbors[i]
    }

    pub fn is_isolated(&self, i: usize) -> bool {
        self.neighbors[i].is_empty()
    }
}

/// Everything a runner needs for one invocation.
pub struct RunContext<'a> {
    /// Mutable only for learned state (`model_params`).
    pub graph: &'a mut ProcessGraph,
    pub topology: &'a Topology,
    /// Evidence per node in topology order.
    pub evidence: &'a [Option<f64>],
    /// Prior per node in topology order.
    pub priors: &'a [f64],
    /// When false, no learned state is written.
    pub training: bool,
    pub config: &'a EngineConfig,
    pub rng: &'a mut ChaCha20Rng,
}

impl RunContext<'_> {
    /// Starting point for every runner: evidence where given, prior elsewhere.
    pub fn initial_scores(&self) -> Vec<f64> {
        self.evidence
            .iter()
            .zip(self.priors)
            .map(|(e, p)| e.unwrap_or(*p))
            .collect()
    }

    /// Nodes whose value a runner may recompute: no evidence, at least one neighbour.
    pub fn propagating(&self) -> Vec<usize> {
        (0..self.topology.len())
            .filter(|&i| self.evidence[i].is_none() && !self.topology.is_isolated(i))
            .collect()
    }

    /// A working copy of node `i`'s learned state (default when absent).
    pub fn load_params(&self, i: usize) -> ModelParams {
        self.graph
            .node(self.topology.ids()[i].as_str())
            .and_then(|n| n.model_params.clone())
            .unwrap_or_default()
    }

    /// Persists learned state; a no-op when training is disabled.
    pub fn store_params(&mut self, i: usize, params: ModelParams) {
        if !self.training {
            return;
        }
        if let Some(node) = self.graph.node_mut(self.topology.ids()[i].as_str()) {
            node.model_params = Some(params);
        }
    }
}

/// Drops learned entries keyed by nodes that are no longer neighbours of `i`.
pub(crate) fn retain_neighbours(
    learned: &mut FxHashMap<NodeId, f64>,
    topology: &Topology,
    i: usize,
) {
    let neighbours = topology.neighbors(i);
    learned.retain(|id, _| {
        topology
            .index_of(id.as_str())
            .is_some_and(|j| neighbours.binary_search(&j).is_ok())
    });
}

pub(crate) fn min_score(scores: &[f64], indices: &[usize]) -> Option<f64> {
    indices.iter().map(|&j| scores[j]).reduce(f64::min)
}

pub(crate) fn mean_score(scores: &[f64], indices: &[usize]) -> Option<f64> {
    if indices.is_empty() {
        return None;
    }
    Some(indices.iter().map(|&j| scores[j]).sum::<f64>() / indices.len() as f64)
}

#[inline]
pub(crate) fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Rejects non-finite scores so NaN never reaches the fusion step.
pub(crate) fn ensure_finite(algorithm: AlgorithmId, scores: &[f64]) -> Result<(), ExecError> {
    match scores.iter().position(|s| !s.is_finite()) {
        Some(i) => Err(ExecError::Numerical(format!(
            "{} produced a non-finite score at position {}",
            algorithm, i
        ))),
        None => Ok(()),
    }
}
