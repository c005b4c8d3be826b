//! Built-in modules.

pub mod branch;
pub mod chain_of_thought;
pub mod decision;
pub mod generator;
pub mod merging;
pub mod module;

pub use branch::{Branch, BranchBuilder};
pub use chain_of_thought::ChainOfThought;
pub use decision::{decision_schema, Decision, DecisionBuilder};
pub use generator::{Generator, GeneratorBuilder, GeneratorState, Prediction};
pub use merging::{Merge, MergeKind};
pub use module::{Module, ModuleHandle};
