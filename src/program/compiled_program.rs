use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::graph::ProgramGraph;
use super::node::{Node, NodeKind};
use crate::core::context::{commit, CallContext};
use crate::core::naming::auto_name;
use crate::core::value::{JsonDataModel, SymbolicDataModel};
use crate::core::variable::{initialize_variables, validate_name, Variable};
use crate::error::{OpError, OpResult, ProgramError, ProgramResult};
use crate::modules::{Module, ModuleHandle};
use crate::schema::Schema;

struct ProgramInner {
    name: String,
    description: Option<String>,
    inputs: Vec<SymbolicDataModel>,
    outputs: Vec<SymbolicDataModel>,
    order: Vec<Arc<Node>>,
    input_positions: HashMap<u64, usize>,
    modules: Vec<ModuleHandle>,
    variables: Vec<Variable>,
}

/// A compiled graph with a fixed call signature.
///
/// Built once from traced placeholders; the execution order is computed at
/// construction and shared by every call. Calls keep their node outputs in a
/// per-call cache, so a program can run concurrently with itself.
#[derive(Clone)]
pub struct Program(Arc<ProgramInner>);

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.0.name)
            .field("nodes", &self.node_names())
            .finish()
    }
}

impl Program {
    pub fn new(
        inputs: Vec<SymbolicDataModel>,
        outputs: Vec<SymbolicDataModel>,
    ) -> ProgramResult<Self> {
        Self::with_name(inputs, outputs, auto_name("program"), None)
    }

    pub fn with_name(
        inputs: Vec<SymbolicDataModel>,
        outputs: Vec<SymbolicDataModel>,
        name: impl Into<String>,
        description: Option<String>,
    ) -> ProgramResult<Self> {
        let name = name.into();
        validate_name(&name).map_err(ProgramError::from)?;

        let graph = ProgramGraph::build(&inputs, &outputs)?;
        let order = graph.execution_order()?;

        let mut input_positions = HashMap::new();
        for (position, input) in inputs.iter().enumerate() {
            if let Some(history) = input.history() {
                input_positions.insert(history.node.id(), position);
            }
        }

        let modules: Vec<ModuleHandle> = order
            .iter()
            .filter_map(|node| match node.kind() {
                NodeKind::Operation(module) => Some(module.clone()),
                NodeKind::Input { .. } => None,
            })
            .fold(Vec::new(), |mut acc, module| {
                if !acc.iter().any(|m: &ModuleHandle| m.ptr_eq(&module)) {
                    acc.push(module);
                }
                acc
            });

        let mut variables: Vec<Variable> = Vec::new();
        for module in &modules {
            for variable in module.variables() {
                if !variables.contains(&variable) {
                    variables.push(variable);
                }
            }
        }
        let mut paths = HashSet::new();
        for variable in &variables {
            if !paths.insert(variable.path().to_string()) {
                return Err(ProgramError::DuplicateVariablePath(
                    variable.path().to_string(),
                ));
            }
        }

        let initialized = initialize_variables(&variables, &CallContext::new())?;
        tracing::debug!(
            program = %name,
            nodes = graph.node_count(),
            variables = variables.len(),
            initialized,
            "program compiled"
        );

        Ok(Self(Arc::new(ProgramInner {
            name,
            description,
            inputs,
            outputs,
            order,
            input_positions,
            modules,
            variables,
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn input_schemas(&self) -> Vec<&Schema> {
        self.0.inputs.iter().map(|i| i.schema()).collect()
    }

    pub fn output_schemas(&self) -> Vec<&Schema> {
        self.0.outputs.iter().map(|o| o.schema()).collect()
    }

    /// Node names in execution order.
    pub fn node_names(&self) -> Vec<&str> {
        self.0.order.iter().map(|n| n.name()).collect()
    }

    pub fn modules(&self) -> &[ModuleHandle] {
        &self.0.modules
    }

    pub fn variables(&self) -> &[Variable] {
        &self.0.variables
    }

    pub fn trainable_variables(&self) -> Vec<Variable> {
        self.0
            .variables
            .iter()
            .filter(|v| v.trainable())
            .cloned()
            .collect()
    }

    /// Execute with concrete inputs, positionally matching the declared inputs.
    ///
    /// Variable writes made by the nodes are buffered for the whole call and
    /// committed through `ctx` only once every node has succeeded. A failing
    /// call leaves variables as they were.
    pub async fn run(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> ProgramResult<Vec<Option<JsonDataModel>>> {
        if inputs.len() != self.0.inputs.len() {
            return Err(ProgramError::InputCountMismatch {
                expected: self.0.inputs.len(),
                found: inputs.len(),
            });
        }
        for (index, input) in inputs.iter().enumerate() {
            if input.is_none() {
                let name = self.0.inputs[index]
                    .history()
                    .map(|h| h.node.name().to_string())
                    .unwrap_or_default();
                return Err(ProgramError::MissingInput { index, name });
            }
        }

        let call_ctx = ctx.child();
        let (outputs, updates) = {
            let scope = call_ctx.stateless_scope();
            let outputs = self.execute(&inputs, &call_ctx).await?;
            (outputs, scope.take_updates())
        };
        if !updates.is_empty() {
            tracing::debug!(program = %self.0.name, updates = updates.len(), "committing variable updates");
        }
        commit(updates, ctx)?;
        Ok(outputs)
    }

    async fn execute(
        &self,
        inputs: &[Option<JsonDataModel>],
        ctx: &CallContext,
    ) -> ProgramResult<Vec<Option<JsonDataModel>>> {
        let mut cache: HashMap<u64, Vec<Option<JsonDataModel>>> = HashMap::new();
        for node in &self.0.order {
            let outputs = match node.kind() {
                NodeKind::Input { .. } => {
                    let position = *self.0.input_positions.get(&node.id()).ok_or_else(|| {
                        ProgramError::GraphBuildError(format!(
                            "input node `{}` is not a declared program input",
                            node.name()
                        ))
                    })?;
                    vec![inputs[position].clone()]
                }
                NodeKind::Operation(module) => {
                    let operands = node
                        .inputs()
                        .iter()
                        .map(|operand| {
                            operand.as_ref().and_then(|o| o.history()).and_then(|h| {
                                cache
                                    .get(&h.node.id())
                                    .and_then(|outs| outs.get(h.index))
                                    .cloned()
                                    .flatten()
                            })
                        })
                        .collect();
                    tracing::debug!(program = %self.0.name, node = %node.name(), "executing node");
                    module.forward(operands, ctx).await.map_err(|error| {
                        ProgramError::NodeExecutionError {
                            node: node.name().to_string(),
                            error: Box::new(error),
                        }
                    })?
                }
            };
            cache.insert(node.id(), outputs);
        }

        Ok(self
            .0
            .outputs
            .iter()
            .map(|output| {
                output.history().and_then(|h| {
                    cache
                        .get(&h.node.id())
                        .and_then(|outs| outs.get(h.index))
                        .cloned()
                        .flatten()
                })
            })
            .collect())
    }

    /// Single-input, single-output convenience over [`Program::run`].
    pub async fn run_one(
        &self,
        input: JsonDataModel,
        ctx: &CallContext,
    ) -> ProgramResult<Option<JsonDataModel>> {
        Ok(self.run(vec![Some(input)], ctx).await?.into_iter().next().flatten())
    }
}

#[async_trait]
impl Module for Program {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }

    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        _ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        if input_schemas.len() != self.0.inputs.len() {
            return Err(ProgramError::InputCountMismatch {
                expected: self.0.inputs.len(),
                found: input_schemas.len(),
            }
            .into());
        }
        for (index, (given, declared)) in input_schemas.iter().zip(&self.0.inputs).enumerate() {
            if let Some(given) = given {
                if given != declared.schema() {
                    return Err(OpError::SchemaMismatch(format!(
                        "program `{}` input x{} expects fields {:?}, received {:?}",
                        self.0.name,
                        index,
                        declared.schema().field_names(),
                        given.field_names()
                    )));
                }
            }
        }
        Ok(self
            .0
            .outputs
            .iter()
            .map(|o| Some(o.schema().clone()))
            .collect())
    }

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        // a nested program with an absent input yields absent outputs
        if inputs.iter().all(Option::is_none) {
            return Ok(vec![None; self.0.outputs.len()]);
        }
        Ok(self.run(inputs, ctx).await?)
    }

    fn submodules(&self) -> Vec<ModuleHandle> {
        self.0.modules.clone()
    }

    /// Outputs may be absent when a branch inside is inactive.
    fn checks_output_spec(&self) -> bool {
        false
    }
}
