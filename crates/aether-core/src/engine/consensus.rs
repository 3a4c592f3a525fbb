//! Consensus fusion over the selected runners.
//!
//! The engine validates evidence, derives one topology snapshot and prior
//! vector, runs each selected algorithm in [`AlgorithmId`] order and fuses the
//! per-node scores by `reliability × sophistication bias`. Fused scores are
//! rounded; evidenced nodes report their evidence exactly.
//!
//! `analyze` never writes beliefs. Callers that keep state between calls
//! (the CLI's tick loop) persist results explicitly with [`commit`].

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::config::EngineConfig;
use crate::engine::errors::ExecError;
use crate::engine::graph::{NodeId, ProcessGraph, WORKING_BELIEF};
use crate::engine::prior::prior_table;
use crate::engine::runners::{AlgorithmId, RunContext, RunDiagnostics, RunnerOutput, Topology};

/// Observed health per node; entries for unknown ids are ignored.
pub type Evidence = BTreeMap<NodeId, f64>;

/// Score per node, ordered by id.
pub type Scores = BTreeMap<NodeId, f64>;

/// A selection of algorithms. Iteration order is the execution order.
pub type AlgorithmSet = BTreeSet<AlgorithmId>;

/// One runner's contribution to a fused result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmRun {
    pub algorithm: AlgorithmId,
    pub reliability: f64,
    /// `reliability × sophistication bias`.
    pub weight: f64,
    pub scores: Scores,
    #[serde(skip)]
    pub diagnostics: RunDiagnostics,
}

/// Fused scores plus the individual runs behind them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusReport {
    pub scores: Scores,
    pub runs: Vec<AlgorithmRun>,
    /// True when the total weight was zero and raw BN scores were reported.
    pub fell_back_to_bn: bool,
}

/// Validated inputs shared by every runner of one call.
pub(crate) struct Prepared {
    pub(crate) topology: Topology,
    pub(crate) priors: Vec<f64>,
    pub(crate) evidence: Vec<Option<f64>>,
}

impl Prepared {
    pub(crate) fn new(graph: &ProcessGraph, evidence: &Evidence) -> Result<Self, ExecError> {
        graph.validate_numerical_stability()?;
        let topology = Topology::from_graph(graph);
        let priors = prior_table(graph, &topology);

        let mut dense = vec![None; topology.len()];
        for (id, &value) in evidence {
            let Some(i) = topology.index_of(id.as_str()) else {
                debug!(node = %id, "ignoring evidence for unknown node");
                continue;
            };
            if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                return Err(ExecError::invalid(format!(
                    "evidence for node '{}' must be a finite probability in [0, 1], got {}",
                    id, value
                )));
            }
            dense[i] = Some(value);
        }

        Ok(Self {
            topology,
            priors,
            evidence: dense,
        })
    }

    pub(crate) fn to_scores(&self, dense: &[f64]) -> Scores {
        self.topology
            .ids()
            .iter()
            .cloned()
            .zip(dense.iter().copied())
            .collect()
    }
}

/// Multi-algorithm belief engine.
///
/// Owns the configuration and the random source used by the sampling runners.
/// One engine can serve any number of graphs; each call borrows its graph
/// mutably for the learned state only.
#[derive(Debug, Clone)]
pub struct BeliefEngine {
    config: EngineConfig,
    rng: ChaCha20Rng,
}

impl BeliefEngine {
    /// Builds an engine after validating `config`.
    pub fn new(config: EngineConfig) -> Result<Self, ExecError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fused score per node.
    ///
    /// Never writes `beliefs["working"]`: repeated calls with the same inputs
    /// see the same priors. Persist a result with [`commit`] to make it the
    /// next call's starting belief. With `training == false` no runner writes
    /// learned state either, and the graph is left untouched.
    pub fn analyze(
        &mut self,
        graph: &mut ProcessGraph,
        evidence: &Evidence,
        algorithms: &AlgorithmSet,
        training: bool,
    ) -> Result<Scores, ExecError> {
        Ok(self
            .analyze_detailed(graph, evidence, algorithms, training)?
            .scores)
    }

    /// Like [`analyze`](Self::analyze), also returning every run's scores and weight.
    pub fn analyze_detailed(
        &mut self,
        graph: &mut ProcessGraph,
        evidence: &Evidence,
        algorithms: &AlgorithmSet,
        training: bool,
    ) -> Result<ConsensusReport, ExecError> {
        let prepared = Prepared::new(graph, evidence)?;
        let n = prepared.topology.len();

        let mut outputs: Vec<(AlgorithmId, RunnerOutput, f64)> =
            Vec::with_capacity(algorithms.len());
        let mut weighted = vec![0.0_f64; n];
        let mut total_weight = 0.0_f64;

        for &algorithm in algorithms {
            let output = self.run_one(algorithm, graph, &prepared, training)?;
            let weight = output.reliability * algorithm.sophistication_bias();
            for (acc, score) in weighted.iter_mut().zip(&output.scores) {
                *acc += score * weight;
            }
            total_weight += weight;
            outputs.push((algorithm, output, weight));
        }

        let fell_back_to_bn = total_weight <= 0.0;
        let fused: Vec<f64> = if fell_back_to_bn {
            match outputs.iter().find(|(id, _, _)| *id == AlgorithmId::Bn) {
                Some((_, output, _)) => output.scores.clone(),
                None => self.run_one(AlgorithmId::Bn, graph, &prepared, training)?.scores,
            }
        } else {
            weighted.iter().map(|w| w / total_weight).collect()
        };

        let scores: Scores = prepared
            .topology
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let value = prepared.evidence[i].unwrap_or_else(|| self.config.round(fused[i]));
                (id.clone(), value)
            })
            .collect();

        info!(
            nodes = n,
            evidence = prepared.evidence.iter().flatten().count(),
            algorithms = ?algorithms,
            fell_back_to_bn,
            "analysis complete"
        );

        let runs = outputs
            .into_iter()
            .map(|(algorithm, output, weight)| AlgorithmRun {
                algorithm,
                reliability: output.reliability,
                weight,
                scores: prepared.to_scores(&output.scores),
                diagnostics: output.diagnostics,
            })
            .collect();

        Ok(ConsensusReport {
            scores,
            runs,
            fell_back_to_bn,
        })
    }

    pub(crate) fn run_one(
        &mut self,
        algorithm: AlgorithmId,
        graph: &mut ProcessGraph,
        prepared: &Prepared,
        training: bool,
    ) -> Result<RunnerOutput, ExecError> {
        let mut ctx = RunContext {
            graph,
            topology: &prepared.topology,
            evidence: &prepared.evidence,
            priors: &prepared.priors,
            training,
            config: &self.config,
            rng: &mut self.rng,
        };
        let output = algorithm.runner().run(&mut ctx)?;
        if output.scores.len() != prepared.topology.len() {
            return Err(ExecError::Internal(format!(
                "{} returned {} scores for {} nodes",
                algorithm,
                output.scores.len(),
                prepared.topology.len()
            )));
        }
        Ok(output)
    }
}

/// Writes `scores` into each node's working belief.
///
/// Ids without a node are skipped. Returns how many nodes were updated.
pub fn commit(graph: &mut ProcessGraph, scores: &Scores) -> Result<usize, ExecError> {
    if let Some((id, value)) = scores
        .iter()
        .find(|(_, v)| !(v.is_finite() && (0.0..=1.0).contains(*v)))
    {
        return Err(ExecError::invalid(format!(
            "cannot commit score {} for node '{}'",
            value, id
        )));
    }
    let mut updated = 0;
    for (id, &value) in scores {
        if let Some(node) = graph.node_mut(id.as_str()) {
            node.beliefs.insert(WORKING_BELIEF.to_string(), value);
            updated += 1;
        }
    }
    Ok(updated)
}

/// [`BeliefEngine::analyze`] with the default configuration.
pub fn analyze(
    graph: &mut ProcessGraph,
    evidence: &Evidence,
    algorithms: &AlgorithmSet,
    training: bool,
) -> Result<Scores, ExecError> {
    BeliefEngine::new(EngineConfig::default())?.analyze(graph, evidence, algorithms, training)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::{DomainContext, EdgeData, EdgeKind, NodeData, NodeKind};

    fn chain() -> ProcessGraph {
        let mut g = ProcessGraph::default();
        for id in ["a", "b", "c"] {
            g.add_node(NodeData::new(id, NodeKind::Part, DomainContext::Manufacturing))
                .unwrap();
        }
        g.add_edge(EdgeData::new("ab", "a", "b", EdgeKind::Structural))
            .unwrap();
        g.add_edge(EdgeData::new("bc", "b", "c", EdgeKind::Structural))
            .unwrap();
        g
    }

    fn evidence(entries: &[(&str, f64)]) -> Evidence {
        entries.iter().map(|(id, v)| (NodeId::from(*id), *v)).collect()
    }

    fn engine() -> BeliefEngine {
        BeliefEngine::new(EngineConfig::seeded(3)).unwrap()
    }

    #[test]
    fn fused_score_is_weighted_mean_of_runs() {
        let mut g = chain();
        let algorithms: AlgorithmSet = [AlgorithmId::Bn, AlgorithmId::Dt].into_iter().collect();
        let report = engine()
            .analyze_detailed(&mut g, &evidence(&[("a", 0.6)]), &algorithms, true)
            .unwrap();
        assert!(!report.fell_back_to_bn);
        assert_eq!(report.runs.len(), 2);
        assert_eq!(report.runs[0].algorithm, AlgorithmId::Bn);

        let total: f64 = report.runs.iter().map(|r| r.weight).sum();
        let expected: f64 = report
            .runs
            .iter()
            .map(|r| r.scores["b"] * r.weight)
            .sum::<f64>()
            / total;
        assert!((report.scores["b"] - expected).abs() <= 5e-5);
        assert_eq!(report.scores["a"], 0.6);
    }

    #[test]
    fn empty_selection_falls_back_to_bn() {
        let mut g = chain();
        let ev = evidence(&[("a", 0.5)]);
        let mut e = engine();
        let report = e.analyze_detailed(&mut g, &ev, &AlgorithmSet::new(), true).unwrap();
        assert!(report.fell_back_to_bn);
        assert!(report.runs.is_empty());

        let bn_only: AlgorithmSet = [AlgorithmId::Bn].into_iter().collect();
        let bn = e.analyze(&mut g, &ev, &bn_only, true).unwrap();
        assert_eq!(report.scores, bn);
    }

    #[test]
    fn evidence_is_validated_and_unknown_ids_ignored() {
        let mut g = chain();
        let all: AlgorithmSet = AlgorithmId::ALL.into_iter().collect();
        let err = engine()
            .analyze(&mut g, &evidence(&[("a", f64::NAN)]), &all, true)
            .unwrap_err();
        assert!(matches!(err, ExecError::ValidationError(_)));
        let err = engine()
            .analyze(&mut g, &evidence(&[("b", 1.2)]), &all, true)
            .unwrap_err();
        assert!(matches!(err, ExecError::ValidationError(_)));

        let scores = engine()
            .analyze(&mut g, &evidence(&[("ghost", 7.0)]), &all, true)
            .unwrap();
        assert_eq!(scores.len(), 3);
        assert!(!scores.contains_key("ghost"));
    }

    #[test]
    fn analyze_leaves_beliefs_alone_until_commit() {
        let mut g = chain();
        let bn: AlgorithmSet = [AlgorithmId::Bn].into_iter().collect();
        let scores = engine()
            .analyze(&mut g, &evidence(&[("a", 0.2)]), &bn, true)
            .unwrap();
        assert!(g.nodes().all(|n| n.beliefs.is_empty()));
        let again = engine()
            .analyze(&mut g, &evidence(&[("a", 0.2)]), &bn, true)
            .unwrap();
        assert_eq!(scores, again);

        assert_eq!(commit(&mut g, &scores).unwrap(), 3);
        assert_eq!(g.node("b").unwrap().working_belief(), Some(scores["b"]));

        let mut bad = scores.clone();
        bad.insert(NodeId::from("c"), f64::INFINITY);
        assert!(commit(&mut g, &bad).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.bayesian.max_iterations = 0;
        assert!(BeliefEngine::new(config).is_err());
    }
}
