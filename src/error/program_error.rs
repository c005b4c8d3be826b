//! Program-level error types.

use super::OpError;
use thiserror::Error;

/// Program-level errors
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Cycle detected in program graph")]
    CycleDetected,
    #[error("Program expects {expected} inputs, received {found}")]
    InputCountMismatch { expected: usize, found: usize },
    #[error("Missing required input x{index} (`{name}`): received None")]
    MissingInput { index: usize, name: String },
    #[error("Duplicate variable path: {0}")]
    DuplicateVariablePath(String),
    #[error("Node execution error: node={node}, error={error}")]
    NodeExecutionError { node: String, error: Box<OpError> },
    #[error("Operation error: {0}")]
    Op(Box<OpError>),
}

impl From<OpError> for ProgramError {
    fn from(value: OpError) -> Self {
        ProgramError::Op(Box::new(value))
    }
}
