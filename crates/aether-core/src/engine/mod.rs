//! The belief engine for process graphs.
//!
//! This module provides:
//! - **errors**: Error types for graph construction and engine runs
//! - **graph**: Process graph data model with learned per-node state
//! - **prior**: Structure-independent prior per node
//! - **runners**: The eight estimation algorithms behind one trait
//! - **consensus**: Reliability-weighted fusion and belief commits
//! - **sensitivity**: Perturbation-based influence ranking
//! - **config**: Tunable constants for all of the above

pub mod adjacency_index;
pub mod config;
pub mod consensus;
pub mod errors;
pub mod graph;
pub mod prior;
pub mod runners;
pub mod sensitivity;
