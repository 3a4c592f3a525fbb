//! # Process Graph
//!
//! This module implements the directed multigraph the belief engine reasons over.
//!
//! ## Key Components
//!
//! - **NodeData**: a plant element (part, process step or visual group) carrying
//!   intrinsic evidence (custom attributes, tags, beliefs) and learned state
//!   ([`ModelParams`]).
//!
//! - **EdgeData**: a structural or logical dependency between two nodes. Several
//!   edges may connect the same ordered pair.
//!
//! - **ProcessGraph**: owns nodes and edges and keeps an [`AdjacencyIndex`] in
//!   step with the edge sequence.
//!
//! ## Design
//!
//! - O(1) node lookups through an `FxHashMap` keyed by [`NodeId`]; lookups accept
//!   plain `&str` ids.
//! - Edges are stored as `Arc<EdgeData>`: cloning a graph deep-copies every node
//!   (including learned state) while edges are shared, so a snapshot never aliases
//!   another graph's mutable node state.
//! - Every probability stored on a node is finite and in `[0, 1]`; violations are
//!   rejected with [`ExecError::ValidationError`] on insertion and re-checked by
//!   [`ProcessGraph::validate_numerical_stability`] before each engine run.
//!
//! ## Example
//!
//! ```rust
//! use aether_core::engine::graph::*;
//!
//! let mut graph = ProcessGraph::default();
//! graph.add_node(NodeData::new("drawing", NodeKind::Part, DomainContext::Design)).unwrap();
//! graph.add_node(NodeData::new("piston", NodeKind::Part, DomainContext::Manufacturing)).unwrap();
//! graph.add_edge(EdgeData::new("e1", "drawing", "piston", EdgeKind::Structural)).unwrap();
//! assert_eq!(graph.parents("piston"), vec![NodeId::from("drawing")]);
//! ```

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::engine::adjacency_index::AdjacencyIndex;
use crate::engine::errors::ExecError;

/// Belief key read by the prior estimator and written by `consensus::commit`.
pub const WORKING_BELIEF: &str = "working";

/// Learning rate assigned to freshly initialised [`ModelParams`].
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(Arc<str>);

        impl $name {
            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(Arc::from(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0.as_ref().to_owned()
            }
        }
    };
}

string_id! {
    /// A unique identifier for a node in the process graph.
    ///
    /// Ordered so that engine iteration is stable and deterministic. Cloning is a
    /// reference-count increment.
    NodeId
}

string_id! {
    /// A unique identifier for an edge in the process graph.
    EdgeId
}

/// Semantic kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A physical part or component.
    Part,
    /// A process step (machining, assembly, inspection, ...).
    Process,
    /// A visual grouping of other nodes.
    Group,
}

/// Lifecycle domain a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainContext {
    /// Engineering bill of materials: theoretical, design-time values.
    #[serde(alias = "ebom")]
    Design,
    /// Manufacturing bill of materials: process and tolerance values.
    #[serde(alias = "mbom")]
    Manufacturing,
    /// Service bill of materials: observed, in-field values.
    #[serde(alias = "sbom")]
    Support,
}

/// Kind of dependency an edge expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Structural,
    Logical,
}

/// A loosely typed value attached to a node as a tag or attribute payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// A named intrinsic factor with its own confidence in `[0, 1]`.
///
/// Attributes are authoritative: when a node has any, its prior is the mean of
/// their confidences and tags are not consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttribute {
    pub value: FieldValue,
    pub confidence: f64,
}

/// Per-node learned state for the online learning runners.
///
/// Lives on the node itself and is carried across engine invocations; this is
/// the only training state in the system. The regression and logistic learners
/// keep separate per-neighbour tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Linear regression weight per neighbour.
    pub weights: FxHashMap<NodeId, f64>,
    /// Linear regression bias.
    pub bias: f64,
    /// Logistic regression weight per neighbour.
    pub logistic_weights: FxHashMap<NodeId, f64>,
    /// Logistic regression bias.
    pub logistic_bias: f64,
    /// Attention logit per neighbour.
    pub attention: FxHashMap<NodeId, f64>,
    pub learning_rate: f64,
    /// Training error observed by the last learner that updated this node.
    pub last_error: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            weights: FxHashMap::default(),
            bias: 0.0,
            logistic_weights: FxHashMap::default(),
            logistic_bias: 0.0,
            attention: FxHashMap::default(),
            learning_rate: DEFAULT_LEARNING_RATE,
            last_error: 0.0,
        }
    }
}

/// A node in the process graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    /// Display name; defaults to the id.
    pub name: String,
    pub kind: NodeKind,
    pub context: DomainContext,
    /// Belief kind -> probability. The engine reads and commits [`WORKING_BELIEF`].
    #[serde(default)]
    pub beliefs: FxHashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<BTreeMap<String, CustomAttribute>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, FieldValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_params: Option<ModelParams>,
}

impl NodeData {
    /// Creates a node with no intrinsic evidence and no learned state.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, context: DomainContext) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            kind,
            context,
            beliefs: FxHashMap::default(),
            custom_attributes: None,
            tags: None,
            model_params: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds (or replaces) a custom attribute.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
        confidence: f64,
    ) -> Self {
        self.custom_attributes.get_or_insert_with(BTreeMap::new).insert(
            name.into(),
            CustomAttribute {
                value: value.into(),
                confidence,
            },
        );
        self
    }

    /// Adds (or replaces) a free-form tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_belief(mut self, kind: impl Into<String>, probability: f64) -> Self {
        self.beliefs.insert(kind.into(), probability);
        self
    }

    /// The node's last committed working belief, if any.
    pub fn working_belief(&self) -> Option<f64> {
        self.beliefs.get(WORKING_BELIEF).copied()
    }

    /// Checks the probability invariants of this node.
    pub fn validate(&self) -> Result<(), ExecError> {
        for (kind, p) in &self.beliefs {
            check_probability(p, || format!("node '{}' belief '{}'", self.id, kind))?;
        }
        if let Some(attrs) = &self.custom_attributes {
            for (name, attr) in attrs {
                check_probability(&attr.confidence, || {
                    format!("node '{}' attribute '{}' confidence", self.id, name)
                })?;
            }
        }
        if let Some(params) = &self.model_params {
            let learned = params
                .weights
                .values()
                .chain(params.logistic_weights.values())
                .chain(params.attention.values())
                .chain([&params.bias, &params.logistic_bias, &params.learning_rate]);
            if learned.into_iter().any(|v| !v.is_finite()) {
                return Err(ExecError::Numerical(format!(
                    "node '{}' has non-finite learned parameters",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn check_probability(p: &f64, what: impl FnOnce() -> String) -> Result<(), ExecError> {
    if p.is_finite() && (0.0..=1.0).contains(p) {
        Ok(())
    } else {
        Err(ExecError::invalid(format!(
            "{} must be a finite probability in [0, 1], got {}",
            what(),
            p
        )))
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    /// Optional domain classification (e.g. "design", "supply").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub weight: f64,
}

impl EdgeData {
    /// Creates an edge with unit weight and no domain tag.
    pub fn new(
        id: impl Into<EdgeId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        kind: EdgeKind,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind,
            domain: None,
            weight: 1.0,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// A directed multigraph of plant elements.
///
/// Nodes and edges are created and destroyed only through this type's mutation
/// operations; the engine reads topology and writes beliefs and learned state.
#[derive(Debug, Clone, Default)]
pub struct ProcessGraph {
    nodes: FxHashMap<NodeId, NodeData>,
    edges: Vec<Arc<EdgeData>>,
    adjacency: AdjacencyIndex,
}

impl ProcessGraph {
    /// Inserts a node. Fails on a duplicate id or an invalid probability.
    pub fn add_node(&mut self, node: NodeData) -> Result<(), ExecError> {
        node.validate()?;
        if self.nodes.contains_key(&node.id) {
            return Err(ExecError::invalid(format!(
                "node '{}' already exists",
                node.id
            )));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Removes a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeData> {
        let node = self.nodes.remove(id)?;
        let before = self.edges.len();
        self.edges
            .retain(|e| e.source.as_str() != id && e.target.as_str() != id);
        if self.edges.len() != before {
            self.adjacency.build_from_edges(&self.edges);
        }
        Some(node)
    }

    /// Inserts an edge. Both endpoints must already exist; parallel edges are allowed.
    pub fn add_edge(&mut self, edge: EdgeData) -> Result<(), ExecError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(ExecError::invalid(format!(
                    "edge '{}' references unknown node '{}'",
                    edge.id, endpoint
                )));
            }
        }
        if !edge.weight.is_finite() {
            return Err(ExecError::invalid(format!(
                "edge '{}' weight must be finite",
                edge.id
            )));
        }
        if self.adjacency.contains_edge(&edge.id) {
            return Err(ExecError::invalid(format!(
                "edge '{}' already exists",
                edge.id
            )));
        }
        self.adjacency.add_edge(&edge);
        self.edges.push(Arc::new(edge));
        Ok(())
    }

    /// Removes an edge by id.
    pub fn remove_edge(&mut self, id: &str) -> Option<Arc<EdgeData>> {
        let position = self.edges.iter().position(|e| e.id.as_str() == id)?;
        let edge = self.edges.remove(position);
        self.adjacency.remove_edge(&edge.id);
        Some(edge)
    }

    pub fn node(&self, id: &str) -> Option<&NodeData> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeData> {
        self.nodes.get_mut(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterates nodes in unspecified order. Use [`Self::sorted_node_ids`] for a
    /// deterministic order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeData> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Arc<EdgeData>] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All node ids in ascending order.
    pub fn sorted_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Outgoing neighbour ids, one entry per edge (parallel edges repeat).
    pub fn outgoing(&self, id: &str) -> Vec<NodeId> {
        self.adjacency.outgoing(id).cloned().collect()
    }

    /// Distinct targets of edges leaving `id`, sorted.
    pub fn children(&self, id: &str) -> Vec<NodeId> {
        let mut children = self.outgoing(id);
        children.sort_unstable();
        children.dedup();
        children
    }

    /// Distinct sources of edges entering `id`, sorted. Computed from the edge
    /// sequence on every call.
    pub fn parents(&self, id: &str) -> Vec<NodeId> {
        let mut parents: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.target.as_str() == id)
            .map(|e| e.source.clone())
            .collect();
        parents.sort_unstable();
        parents.dedup();
        parents
    }

    /// Re-checks every node's probability invariants and edge endpoints.
    ///
    /// Node fields are public, so values may have been changed after insertion;
    /// the engine calls this before every run.
    pub fn validate_numerical_stability(&self) -> Result<(), ExecError> {
        for id in self.sorted_node_ids() {
            if let Some(node) = self.nodes.get(&id) {
                node.validate()?;
            }
        }
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
                return Err(ExecError::Internal(format!(
                    "edge '{}' is dangling",
                    edge.id
                )));
            }
        }
        Ok(())
    }
}
