//! Program declaration, compilation and execution.
//!
//! Declare inputs with [`Input`], trace modules on the resulting placeholders,
//! then hand the inputs and outputs to [`Program::new`].

mod compiled_program;
mod graph;
pub mod node;

pub use compiled_program::Program;
pub use node::{History, Input, Node, NodeKind};
