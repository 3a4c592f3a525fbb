//! Perturbation-based influence analysis.
//!
//! Measures how strongly each node, and each custom attribute of a node, moves
//! a target's score. Only the deterministic BN and DT estimators are accepted
//! so that every measured change comes from the perturbation itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::config::EngineConfig;
use crate::engine::consensus::{BeliefEngine, Evidence, Prepared};
use crate::engine::errors::ExecError;
use crate::engine::graph::{NodeId, ProcessGraph, WORKING_BELIEF};
use crate::engine::runners::AlgorithmId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    /// Amount subtracted from evidence values and attribute confidences.
    pub delta: f64,
    /// Influences at or below this are not reported.
    pub threshold: f64,
    /// Evidence perturbations at or below this are skipped (node already near 0).
    pub min_perturbation: f64,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            delta: 0.2,
            threshold: 0.005,
            min_perturbation: 0.001,
        }
    }
}

impl SensitivityConfig {
    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if !(self.delta > 0.0 && self.delta <= 1.0) {
            return Err(ExecError::invalid("sensitivity: delta must be in (0, 1]"));
        }
        if !(self.threshold >= 0.0 && self.min_perturbation >= 0.0) {
            return Err(ExecError::invalid(
                "sensitivity: threshold and min_perturbation must be >= 0",
            ));
        }
        Ok(())
    }
}

/// Influence per key, where a key is `node` or `node:attribute`.
///
/// Every value is a non-negative finite number.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SensitivityReport {
    entries: BTreeMap<String, f64>,
}

impl SensitivityReport {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Entries by descending influence, ties by key.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.entries
    }

    fn record(&mut self, key: String, influence: f64, threshold: f64) {
        if influence.is_finite() && influence > threshold {
            self.entries.insert(key, influence);
        }
    }
}

impl BeliefEngine {
    /// Influence of every other node on `target` under `algorithm`.
    ///
    /// Works on a private copy: `graph` is never modified.
    pub fn run_sensitivity_analysis(
        &mut self,
        graph: &ProcessGraph,
        target: &str,
        evidence: &Evidence,
        algorithm: AlgorithmId,
    ) -> Result<SensitivityReport, ExecError> {
        if !matches!(algorithm, AlgorithmId::Bn | AlgorithmId::Dt) {
            return Err(ExecError::invalid(format!(
                "sensitivity analysis supports bn and dt only, got {}",
                algorithm
            )));
        }
        if !graph.contains_node(target) {
            return Err(ExecError::invalid(format!(
                "unknown sensitivity target '{}'",
                target
            )));
        }

        let config = self.config().sensitivity;
        let mut work = graph.clone();
        let baseline_scores = self.estimate(&mut work, evidence, algorithm)?;
        let baseline = score_of(&baseline_scores, target)?;
        let mut report = SensitivityReport::default();

        for id in work.sorted_node_ids() {
            if id.as_str() == target {
                continue;
            }

            let attribute_names: Vec<String> = work
                .node(id.as_str())
                .and_then(|n| n.custom_attributes.as_ref())
                .map(|attrs| attrs.keys().cloned().collect())
                .unwrap_or_default();

            if !attribute_names.is_empty() {
                let saved_belief = work
                    .node_mut(id.as_str())
                    .and_then(|n| n.beliefs.remove(WORKING_BELIEF));
                let mut own_free = evidence.clone();
                own_free.remove(&id);
                let design = score_of(&self.estimate(&mut work, &own_free, algorithm)?, target)?;

                for name in &attribute_names {
                    let original =
                        set_confidence(&mut work, &id, name, |c| (c - config.delta).max(0.0));
                    let perturbed = self.estimate(&mut work, &own_free, algorithm);
                    if let Some(original) = original {
                        set_confidence(&mut work, &id, name, |_| original);
                    }
                    let perturbed = score_of(&perturbed?, target)?;
                    report.record(
                        format!("{}:{}", id, name),
                        ((perturbed - design) / config.delta).abs(),
                        config.threshold,
                    );
                }

                if let (Some(belief), Some(node)) = (saved_belief, work.node_mut(id.as_str())) {
                    node.beliefs.insert(WORKING_BELIEF.to_string(), belief);
                }
            }

            let current = match evidence.get(&id) {
                Some(&value) => value,
                None => score_of(&baseline_scores, id.as_str())?,
            };
            let lowered = (current - config.delta).max(0.0);
            let actual = current - lowered;
            if actual > config.min_perturbation {
                let mut perturbed_evidence = evidence.clone();
                perturbed_evidence.insert(id.clone(), lowered);
                let perturbed =
                    score_of(&self.estimate(&mut work, &perturbed_evidence, algorithm)?, target)?;
                report.record(
                    id.to_string(),
                    ((perturbed - baseline) / actual).abs(),
                    config.threshold,
                );
            } else {
                debug!(node = %id, current, "skipping evidence perturbation near zero");
            }
        }

        info!(
            target_node = target,
            %algorithm,
            entries = report.len(),
            "sensitivity analysis complete"
        );
        Ok(report)
    }

    /// Raw scores from a single estimator, without fusion or rounding.
    fn estimate(
        &mut self,
        graph: &mut ProcessGraph,
        evidence: &Evidence,
        algorithm: AlgorithmId,
    ) -> Result<BTreeMap<NodeId, f64>, ExecError> {
        let prepared = Prepared::new(graph, evidence)?;
        let output = self.run_one(algorithm, graph, &prepared, false)?;
        Ok(prepared.to_scores(&output.scores))
    }
}

/// Sets an attribute's confidence through `f`, returning the previous value.
fn set_confidence(
    graph: &mut ProcessGraph,
    id: &NodeId,
    name: &str,
    f: impl FnOnce(f64) -> f64,
) -> Option<f64> {
    let attr = graph
        .node_mut(id.as_str())?
        .custom_attributes
        .as_mut()?
        .get_mut(name)?;
    let previous = attr.confidence;
    attr.confidence = f(previous);
    Some(previous)
}

fn score_of(scores: &BTreeMap<NodeId, f64>, id: &str) -> Result<f64, ExecError> {
    scores
        .get(id)
        .copied()
        .ok_or_else(|| ExecError::Internal(format!("no score for node '{}'", id)))
}

/// [`BeliefEngine::run_sensitivity_analysis`] with the default configuration.
pub fn run_sensitivity_analysis(
    graph: &ProcessGraph,
    target: &str,
    evidence: &Evidence,
    algorithm: AlgorithmId,
) -> Result<SensitivityReport, ExecError> {
    BeliefEngine::new(EngineConfig::default())?.run_sensitivity_analysis(
        graph, target, evidence, algorithm,
    )
}
