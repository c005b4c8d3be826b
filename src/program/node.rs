//! Graph nodes recorded while tracing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::naming::to_snake_case;
use crate::core::value::SymbolicDataModel;
use crate::modules::ModuleHandle;
use crate::schema::{DataType, Schema};

/// Node ids increase with construction order, which makes them the
/// deterministic tie-break of the topological sort.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub enum NodeKind {
    /// A declared program input.
    Input { name: String },
    Operation(ModuleHandle),
}

pub struct Node {
    id: u64,
    kind: NodeKind,
    inputs: Vec<Option<SymbolicDataModel>>,
    outputs: Vec<Option<Schema>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}#{})", self.name(), self.id)
    }
}

impl Node {
    pub(crate) fn operation(
        module: ModuleHandle,
        inputs: Vec<Option<SymbolicDataModel>>,
        outputs: Vec<Option<Schema>>,
    ) -> Arc<Node> {
        Arc::new(Node {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            kind: NodeKind::Operation(module),
            inputs,
            outputs,
        })
    }

    pub(crate) fn input(name: String, schema: Schema) -> Arc<Node> {
        Arc::new(Node {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            kind: NodeKind::Input { name },
            inputs: Vec::new(),
            outputs: vec![Some(schema)],
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Input { name } => name,
            NodeKind::Operation(module) => module.name(),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, NodeKind::Input { .. })
    }

    pub fn inputs(&self) -> &[Option<SymbolicDataModel>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Option<Schema>] {
        &self.outputs
    }
}

/// Which node produced a placeholder, and at which output slot.
#[derive(Clone)]
pub struct History {
    pub node: Arc<Node>,
    pub index: usize,
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.node, self.index)
    }
}

/// Declares program inputs.
pub struct Input;

impl Input {
    /// Placeholder for a program input of type `data_type`.
    pub fn new(data_type: &DataType) -> SymbolicDataModel {
        Self::named(&to_snake_case(data_type.name()), data_type.schema())
    }

    pub fn named(name: &str, schema: &Schema) -> SymbolicDataModel {
        let node = Node::input(name.to_string(), schema.clone());
        SymbolicDataModel::with_history(schema.clone(), History { node, index: 0 })
    }
}
