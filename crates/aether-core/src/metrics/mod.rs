//! Summary metrics over fused scores.
//!
//! - `system_entropy(scores)`: mean binary Shannon entropy in bits, a measure
//!   of how undecided the engine is across the whole plant.
//! - `rank_suspects(graph, scores, exclude)`: least healthy nodes first.
//!
//! Deterministic: iteration follows `NodeId` order, ties break by id.

use serde::Serialize;

use crate::engine::consensus::Scores;
use crate::engine::graph::{DomainContext, NodeId, ProcessGraph};

/// Probabilities are clamped to `[EPSILON, 1 − EPSILON]` before taking logs.
const EPSILON: f64 = 1e-9;

/// Mean binary entropy of `scores`, in bits. Zero for an empty map.
pub fn system_entropy(scores: &Scores) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    // Kahan compensated summation
    let mut sum = 0.0_f64;
    let mut c = 0.0_f64;
    for &p in scores.values() {
        let y = binary_entropy(p) - c;
        let t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    sum / scores.len() as f64
}

fn binary_entropy(p: f64) -> f64 {
    let p = p.clamp(EPSILON, 1.0 - EPSILON);
    -(p * p.log2() + (1.0 - p) * (1.0 - p).log2())
}

/// A node ranked by how likely it is to be at fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suspect {
    pub id: NodeId,
    pub name: String,
    pub context: DomainContext,
    pub health: f64,
}

/// Nodes by ascending health, ties by id.
///
/// `exclude` drops one domain context, typically [`DomainContext::Support`]
/// where the symptoms were observed rather than caused. Score ids without a
/// node are skipped.
pub fn rank_suspects(
    graph: &ProcessGraph,
    scores: &Scores,
    exclude: Option<DomainContext>,
) -> Vec<Suspect> {
    let mut suspects: Vec<Suspect> = scores
        .iter()
        .filter_map(|(id, &health)| {
            let node = graph.node(id.as_str())?;
            (Some(node.context) != exclude).then(|| Suspect {
                id: id.clone(),
                name: node.name.clone(),
                context: node.context,
                health,
            })
        })
        .collect();
    suspects.sort_by(|a, b| a.health.total_cmp(&b.health).then_with(|| a.id.cmp(&b.id)));
    suspects
}
