//! The module interface and the dispatching handle.
//!
//! A [`Module`] implements one operation twice: [`Module::compute_output_spec`]
//! maps input schemas to output schemas, [`Module::call`] maps concrete values
//! to concrete values. [`ModuleHandle`] chooses between them per call by
//! inspecting the operands, runs the one-time build, records graph nodes on
//! the symbolic path and checks eager outputs against the inferred shapes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::context::CallContext;
use crate::core::value::{Data, JsonDataModel, SymbolicDataModel};
use crate::core::variable::Variable;
use crate::error::{OpError, OpResult};
use crate::program::node::{History, Node};
use crate::schema::{standardize, Schema};

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Create owned variables. Runs once, under the module's name scope,
    /// with the first observed input schemas.
    fn build(&self, _input_schemas: &[Option<Schema>], _ctx: &CallContext) -> OpResult<()> {
        Ok(())
    }

    /// Output schemas for the given input schemas, without side effects.
    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>>;

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>>;

    /// Variables owned directly by this module.
    fn variables(&self) -> Vec<Variable> {
        Vec::new()
    }

    fn submodules(&self) -> Vec<ModuleHandle> {
        Vec::new()
    }

    /// Whether eager outputs are checked against the inferred output schemas.
    fn checks_output_spec(&self) -> bool {
        true
    }
}

struct ModuleCell {
    module: Arc<dyn Module>,
    built: Mutex<bool>,
}

/// Shared, cloneable reference to a module.
#[derive(Clone)]
pub struct ModuleHandle(Arc<ModuleCell>);

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleHandle({})", self.name())
    }
}

impl ModuleHandle {
    pub fn new(module: impl Module + 'static) -> Self {
        Self::from_arc(Arc::new(module))
    }

    /// Wrap a module the caller keeps a typed reference to.
    pub fn from_arc<M: Module + 'static>(module: Arc<M>) -> Self {
        let module: Arc<dyn Module> = module;
        Self(Arc::new(ModuleCell {
            module,
            built: Mutex::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        self.0.module.name()
    }

    pub fn module(&self) -> &dyn Module {
        self.0.module.as_ref()
    }

    pub fn ptr_eq(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_built(&self) -> bool {
        *self.0.built.lock()
    }

    pub fn ensure_built(&self, input_schemas: &[Option<Schema>], ctx: &CallContext) -> OpResult<()> {
        let mut built = self.0.built.lock();
        if *built {
            return Ok(());
        }
        let _name = ctx.name_scope(self.name());
        tracing::debug!(module = %self.name(), "building module");
        self.0.module.build(input_schemas, ctx)?;
        *built = true;
        Ok(())
    }

    /// Output schemas for `input_schemas`, computed inside a stateless scope
    /// nested in a symbolic scope. Buffered writes are discarded.
    pub fn infer(
        &self,
        input_schemas: &[Option<Schema>],
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        let _symbolic = ctx.symbolic_scope();
        let _stateless = ctx.stateless_scope();
        self.ensure_built(input_schemas, ctx)?;
        let outputs = self.0.module.compute_output_spec(input_schemas, ctx)?;
        Ok(outputs
            .into_iter()
            .map(|s| s.map(|s| standardize(&s)))
            .collect())
    }

    /// Symbolic variant: infer output schemas and record a graph node.
    pub fn symbolic_call(
        &self,
        inputs: &[Option<SymbolicDataModel>],
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<SymbolicDataModel>>> {
        let schemas: Vec<Option<Schema>> = inputs
            .iter()
            .map(|i| i.as_ref().map(|s| s.schema().clone()))
            .collect();
        let outputs = self.infer(&schemas, ctx)?;
        let node = Node::operation(self.clone(), inputs.to_vec(), outputs.clone());
        tracing::debug!(module = %self.name(), node = node.id(), "recorded node");
        Ok(outputs
            .into_iter()
            .enumerate()
            .map(|(index, schema)| {
                schema.map(|schema| {
                    SymbolicDataModel::with_history(
                        schema,
                        History {
                            node: node.clone(),
                            index,
                        },
                    )
                })
            })
            .collect())
    }

    /// Trace this module on placeholders with a fresh context.
    pub fn trace(
        &self,
        inputs: &[Option<SymbolicDataModel>],
    ) -> OpResult<Vec<Option<SymbolicDataModel>>> {
        self.symbolic_call(inputs, &CallContext::new())
    }

    /// Trace a single-input, single-output module.
    pub fn trace_one(&self, input: &SymbolicDataModel) -> OpResult<SymbolicDataModel> {
        self.trace(&[Some(input.clone())])?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| {
                OpError::SchemaMismatch(format!("`{}` produced no output", self.name()))
            })
    }

    /// Eager variant: run the module and check its outputs.
    pub async fn forward(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        let schemas: Vec<Option<Schema>> = inputs
            .iter()
            .map(|i| i.as_ref().map(|v| v.schema().clone()))
            .collect();
        self.ensure_built(&schemas, ctx)?;
        let outputs = self.0.module.call(inputs, ctx).await?;

        if self.0.module.checks_output_spec() {
            let expected = self.infer(&schemas, ctx)?;
            self.check_outputs(&outputs, &expected)?;
        }
        Ok(outputs)
    }

    fn check_outputs(
        &self,
        outputs: &[Option<JsonDataModel>],
        expected: &[Option<Schema>],
    ) -> OpResult<()> {
        if outputs.len() != expected.len() {
            return Err(OpError::SchemaMismatch(format!(
                "`{}` returned {} outputs, expected {}",
                self.name(),
                outputs.len(),
                expected.len()
            )));
        }
        for (index, (output, schema)) in outputs.iter().zip(expected).enumerate() {
            let Some(output) = output else { continue };
            match schema {
                Some(schema) if output.schema() == schema => {}
                Some(schema) => {
                    return Err(OpError::SchemaMismatch(format!(
                        "`{}` output {} has fields {:?}, expected {:?}",
                        self.name(),
                        index,
                        output.schema().field_names(),
                        schema.field_names()
                    )))
                }
                None => {
                    return Err(OpError::SchemaMismatch(format!(
                        "`{}` output {} should be None",
                        self.name(),
                        index
                    )))
                }
            }
        }
        Ok(())
    }

    /// Dispatch on the operands: symbolic if any is a type descriptor or a
    /// placeholder, eager otherwise.
    pub async fn call(
        &self,
        inputs: Vec<Option<Data>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<Data>>> {
        if inputs.iter().flatten().any(Data::is_symbolic) {
            let symbolic: Vec<Option<SymbolicDataModel>> = inputs
                .iter()
                .map(|i| i.as_ref().map(Data::to_symbolic))
                .collect();
            let outputs = self.symbolic_call(&symbolic, ctx)?;
            return Ok(outputs.into_iter().map(|o| o.map(Data::Symbolic)).collect());
        }
        let concrete = inputs
            .into_iter()
            .map(|i| i.and_then(Data::into_json))
            .collect();
        let outputs = self.forward(concrete, ctx).await?;
        Ok(outputs.into_iter().map(|o| o.map(Data::Json)).collect())
    }

    /// All variables reachable from this module, without duplicates.
    pub fn variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        for variable in self.0.module.variables() {
            if !out.contains(&variable) {
                out.push(variable);
            }
        }
        for sub in self.0.module.submodules() {
            sub.collect_variables(out);
        }
    }

    pub fn trainable_variables(&self) -> Vec<Variable> {
        self.variables().into_iter().filter(|v| v.trainable()).collect()
    }
}
