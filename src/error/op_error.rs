use thiserror::Error;

use super::ProgramError;
use crate::llm::LlmError;

/// Operation-level errors
#[derive(Debug, Error)]
pub enum OpError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid name: {0:?} must be non-empty and cannot contain '/'")]
    InvalidName(String),
    #[error("Scope error: {0}")]
    ScopeError(String),
    #[error("Variable {0} is already initialized")]
    AlreadyInitialized(String),
    #[error("Incompatible merge in `{op}`: operand x{index} is None. Received x{index}=None")]
    IncompatibleMerge { op: String, index: usize },
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Language model error: {0}")]
    LanguageModel(#[from] LlmError),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Program error: {0}")]
    Program(Box<ProgramError>),
}

impl From<serde_json::Error> for OpError {
    fn from(e: serde_json::Error) -> Self {
        OpError::SerializationError(e.to_string())
    }
}

impl From<ProgramError> for OpError {
    fn from(e: ProgramError) -> Self {
        OpError::Program(Box::new(e))
    }
}
