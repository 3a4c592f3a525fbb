//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use aether_core::{
    AlgorithmId, AlgorithmSet, BeliefEngine, DomainContext, EdgeData, EdgeKind, EngineConfig,
    Evidence, NodeData, NodeId, NodeKind, ProcessGraph,
};

pub fn part(id: &str, context: DomainContext) -> NodeData {
    NodeData::new(id, NodeKind::Part, context)
}

/// Graph over `nodes` with one structural edge per `(source, target)` pair.
pub fn graph(nodes: Vec<NodeData>, edges: &[(&str, &str)]) -> ProcessGraph {
    let mut g = ProcessGraph::default();
    for node in nodes {
        g.add_node(node).expect("node");
    }
    for (source, target) in edges {
        g.add_edge(EdgeData::new(
            format!("{}->{}#{}", source, target, g.edge_count()),
            *source,
            *target,
            EdgeKind::Structural,
        ))
        .expect("edge");
    }
    g
}

/// `a -> b -> c` with no intrinsic signal.
pub fn chain() -> ProcessGraph {
    graph(
        vec![
            part("a", DomainContext::Design),
            part("b", DomainContext::Manufacturing),
            part("c", DomainContext::Support),
        ],
        &[("a", "b"), ("b", "c")],
    )
}

/// The five-node engine plant: one drawing, two parts, two sensors, with a
/// cross link and an isolated spare.
pub fn plant() -> ProcessGraph {
    graph(
        vec![
            part("D001", DomainContext::Design).with_attribute("review", "passed", 0.95),
            part("M001", DomainContext::Manufacturing).with_tag("yield", "98%"),
            part("M002", DomainContext::Manufacturing).with_tag("line_status", "medium"),
            part("S001", DomainContext::Support),
            part("S002", DomainContext::Support),
            part("SPARE", DomainContext::Support).with_attribute("shelf_life", 2.0, 0.8),
        ],
        &[
            ("D001", "M001"),
            ("D001", "M002"),
            ("M001", "S001"),
            ("M002", "S002"),
            ("M001", "S002"),
        ],
    )
}

pub fn evidence(entries: &[(&str, f64)]) -> Evidence {
    entries
        .iter()
        .map(|(id, value)| (NodeId::from(*id), *value))
        .collect()
}

pub fn only(algorithm: AlgorithmId) -> AlgorithmSet {
    [algorithm].into_iter().collect()
}

pub fn all_algorithms() -> AlgorithmSet {
    AlgorithmId::ALL.into_iter().collect()
}

pub fn engine(seed: u64) -> BeliefEngine {
    BeliefEngine::new(EngineConfig::seeded(seed)).expect("engine")
}
