//! Outgoing-neighbour index with incremental maintenance.
//!
//! The index stores one entry per edge so parallel edges between the same pair
//! stay distinguishable, and keeps a reverse map from edge id to source so single
//! edges can be removed without a scan of the whole graph.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::graph::{EdgeData, EdgeId, NodeId};

/// Maximum size for inline storage in SmallVec
const INLINE_VEC_SIZE: usize = 8;

/// Adjacency index mapping each node to its outgoing `(edge, target)` pairs.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyIndex {
    /// Source node -> outgoing edges in insertion order.
    outgoing: FxHashMap<NodeId, SmallVec<[(EdgeId, NodeId); INLINE_VEC_SIZE]>>,

    /// Reverse index: EdgeId -> source for fast removal.
    reverse: FxHashMap<EdgeId, NodeId>,

    stats: IndexStats,
}

/// Statistics for index maintenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of full rebuilds performed
    pub full_rebuilds: usize,
    /// Number of incremental updates
    pub incremental_updates: usize,
}

impl AdjacencyIndex {
    /// Rebuilds the index from scratch.
    pub fn build_from_edges(&mut self, edges: &[Arc<EdgeData>]) {
        self.outgoing.clear();
        self.reverse.clear();
        for edge in edges {
            self.insert(edge);
        }
        self.stats.full_rebuilds += 1;
    }

    /// Incrementally adds an edge.
    pub fn add_edge(&mut self, edge: &EdgeData) {
        self.insert(edge);
        self.stats.incremental_updates += 1;
    }

    /// Incrementally removes an edge. Returns `false` if the edge was not indexed.
    pub fn remove_edge(&mut self, edge_id: &EdgeId) -> bool {
        let Some(source) = self.reverse.remove(edge_id) else {
            return false;
        };
        let mut emptied = false;
        if let Some(entries) = self.outgoing.get_mut(&source) {
            entries.retain(|(id, _)| id != edge_id);
            emptied = entries.is_empty();
        }
        if emptied {
            self.outgoing.remove(&source);
        }
        self.stats.incremental_updates += 1;
        true
    }

    pub fn contains_edge(&self, edge_id: &EdgeId) -> bool {
        self.reverse.contains_key(edge_id)
    }

    /// Targets of edges leaving `node`, one per edge.
    pub fn outgoing<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.outgoing
            .get(node)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(_, target)| target))
    }

    pub fn out_degree(&self, node: &str) -> usize {
        self.outgoing.get(node).map_or(0, |entries| entries.len())
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    fn insert(&mut self, edge: &EdgeData) {
        self.outgoing
            .entry(edge.source.clone())
            .or_default()
            .push((edge.id.clone(), edge.target.clone()));
        self.reverse.insert(edge.id.clone(), edge.source.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::EdgeKind;

    fn edge(id: &str, src: &str, dst: &str) -> EdgeData {
        EdgeData::new(id, src, dst, EdgeKind::Structural)
    }

    #[test]
    fn incremental_updates_match_full_rebuild() {
        let edges: Vec<Arc<EdgeData>> = vec![
            Arc::new(edge("e1", "a", "b")),
            Arc::new(edge("e2", "a", "c")),
            Arc::new(edge("e3", "b", "c")),
        ];

        let mut incremental = AdjacencyIndex::default();
        for e in &edges {
            incremental.add_edge(e);
        }
        let mut rebuilt = AdjacencyIndex::default();
        rebuilt.build_from_edges(&edges);

        for node in ["a", "b", "c"] {
            let lhs: Vec<_> = incremental.outgoing(node).cloned().collect();
            let rhs: Vec<_> = rebuilt.outgoing(node).cloned().collect();
            assert_eq!(lhs, rhs, "node {}", node);
        }
        assert_eq!(incremental.stats().incremental_updates, 3);
        assert_eq!(rebuilt.stats().full_rebuilds, 1);
    }

    #[test]
    fn remove_edge_keeps_parallel_edge() {
        let mut index = AdjacencyIndex::default();
        index.add_edge(&edge("e1", "a", "b"));
        index.add_edge(&edge("e2", "a", "b"));
        assert_eq!(index.out_degree("a"), 2);

        assert!(index.remove_edge(&EdgeId::from("e1")));
        assert_eq!(index.out_degree("a"), 1);
        assert!(!index.remove_edge(&EdgeId::from("e1")));

        assert!(index.remove_edge(&EdgeId::from("e2")));
        assert_eq!(index.out_degree("a"), 0);
        assert_eq!(index.outgoing("a").count(), 0);
    }
}
