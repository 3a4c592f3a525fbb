//! Error types for Aether engine execution.

use thiserror::Error;

/// Errors that can occur while building a process graph or running the engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes.
///
/// All public APIs return `Result<T, ExecError>`; library code does not panic on
/// malformed input. Non-finite or out-of-range probabilities are rejected as
/// `ValidationError` before any runner touches them.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExecError {
    /// Invalid input: unknown ids, duplicate ids, out-of-range probabilities,
    /// unsupported algorithm choices or invalid configuration.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Numerical stability error (NaN/Inf produced during a run).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Internal execution error (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ExecError::ValidationError(msg.into())
    }
}
