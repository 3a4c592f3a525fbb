//! # Aether Core
//!
//! Multi-algorithm belief fusion over industrial process graphs.

pub mod engine;
pub mod metrics;

// Re-export commonly used types
pub use engine::config::EngineConfig;
pub use engine::consensus::{
    analyze, commit, AlgorithmRun, AlgorithmSet, BeliefEngine, ConsensusReport, Evidence, Scores,
};
pub use engine::errors::ExecError;
pub use engine::graph::{
    DomainContext, EdgeData, EdgeId, EdgeKind, FieldValue, ModelParams, NodeData, NodeId,
    NodeKind, ProcessGraph,
};
pub use engine::runners::AlgorithmId;
pub use engine::sensitivity::{run_sensitivity_analysis, SensitivityReport};
