//! # xlinks: a dual-mode computation-graph engine for language-model programs
//!
//! Operations over schema-typed JSON values run in one of two modes, chosen per
//! call from the operands:
//!
//! - **Symbolic**: operands are placeholders carrying only a schema. The
//!   operation infers its output schema inside a stateless, symbolic scope, with
//!   no model call and no visible state change, and records a graph node.
//! - **Eager**: operands are concrete values. The operation runs, may call a
//!   language model, and may update its trainable variables.
//!
//! Tracing modules on [`Input`] placeholders declares a [`Program`], which is
//! compiled once into a fixed execution order and then called repeatedly with
//! concrete values. Generators log their predictions while training, and an
//! [`Optimizer`] rewrites their state from the batch reward.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xlinks::{
//!     CallContext, DataType, FieldType, Generator, Input, JsonDataModel, LanguageModel,
//!     LanguageModelConfig, ModuleHandle, Program, Schema,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let lm = Arc::new(LanguageModel::from_config(&LanguageModelConfig::from_env()?)?);
//!     let query = DataType::new("Query", &Schema::new().field("query", FieldType::String));
//!     let answer = Schema::new().field("answer", FieldType::String);
//!
//!     let x = Input::new(&query);
//!     let generator = ModuleHandle::new(Generator::builder(answer, lm).build()?);
//!     let y = generator.trace_one(&x)?;
//!     let program = Program::new(vec![x], vec![y])?;
//!
//!     let input = query.instantiate(serde_json::json!({"query": "Capital of France?"}))?;
//!     let output = program.run_one(input, &CallContext::new()).await?;
//!     println!("{:?}", output.map(JsonDataModel::into_json));
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Description |
//! |------|-------------|
//! | `openai-provider` | Bundles the OpenAI-compatible HTTP provider (default) |

pub mod config;
pub mod core;
pub mod error;
pub mod llm;
pub mod modules;
pub mod ops;
pub mod optimizers;
pub mod program;
pub mod rewards;
pub mod schema;
pub mod store;
pub mod template;
pub mod trainer;

#[cfg(test)]
mod testing;

pub use crate::config::{EngineConfig, LanguageModelConfig, TrainingConfig};
pub use crate::core::{
    initialize_all_variables, CallContext, Data, Initializer, JsonDataModel, SymbolicDataModel,
    Variable,
};
pub use crate::error::{OpError, OpResult, ProgramError, ProgramResult, StoreError};
pub use crate::llm::{LanguageModel, LlmError, LlmProvider, LlmProviderRegistry, RetryPolicy};
pub use crate::modules::{
    Branch, ChainOfThought, Decision, Generator, GeneratorState, Merge, MergeKind, Module,
    ModuleHandle, Prediction,
};
pub use crate::ops::{concat, logical_and, logical_or};
pub use crate::optimizers::{Optimizer, OptimizerState, RandomFewShot};
pub use crate::program::{Input, Program};
pub use crate::rewards::{ExactMatch, Reward};
pub use crate::schema::{DataModel, DataType, Field, FieldType, Schema, TypeRegistry};
pub use crate::store::{
    FileVariableStore, MemoryVariableStore, Saveable, StoreMap, VariableStore,
};
pub use crate::trainer::{Trainer, TrainingHistory};
