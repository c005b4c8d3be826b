//! Error types for the graph engine.
//!
//! - [`OpError`]: errors raised by a single operation or module call.
//! - [`ProgramError`]: errors raised while declaring, compiling or running a program.
//! - [`StoreError`]: errors raised while saving or loading variable payloads.

pub mod op_error;
pub mod program_error;
pub mod store_error;

pub use op_error::OpError;
pub use program_error::ProgramError;
pub use store_error::StoreError;

/// Convenience alias for operation-level results.
pub type OpResult<T> = Result<T, OpError>;
/// Convenience alias for program-level results.
pub type ProgramResult<T> = Result<T, ProgramError>;
