//! Reconstruct the node graph between declared inputs and outputs and fix an
//! execution order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use super::node::Node;
use crate::core::value::SymbolicDataModel;
use crate::error::{ProgramError, ProgramResult};

/// Dependency graph of a program. Edge weights are the consumer's operand slot.
pub(crate) struct ProgramGraph {
    graph: StableDiGraph<Arc<Node>, usize>,
}

impl ProgramGraph {
    /// Walk back from `outputs` to `inputs`, collecting every node in between.
    pub(crate) fn build(
        inputs: &[SymbolicDataModel],
        outputs: &[SymbolicDataModel],
    ) -> ProgramResult<Self> {
        let mut declared: HashSet<u64> = HashSet::new();
        for (index, input) in inputs.iter().enumerate() {
            let node = input
                .history()
                .map(|h| h.node.clone())
                .filter(|n| n.is_input())
                .ok_or_else(|| {
                    ProgramError::GraphBuildError(format!(
                        "input x{} is not a program input placeholder",
                        index
                    ))
                })?;
            if !declared.insert(node.id()) {
                return Err(ProgramError::GraphBuildError(format!(
                    "input `{}` is declared twice",
                    node.name()
                )));
            }
        }

        let mut nodes: HashMap<u64, Arc<Node>> = HashMap::new();
        let mut stack: Vec<Arc<Node>> = Vec::new();
        for (index, output) in outputs.iter().enumerate() {
            let history = output.history().ok_or_else(|| {
                ProgramError::GraphBuildError(format!(
                    "output y{} was not produced by a traced operation",
                    index
                ))
            })?;
            stack.push(history.node.clone());
        }

        while let Some(node) = stack.pop() {
            if nodes.contains_key(&node.id()) {
                continue;
            }
            if node.is_input() && !declared.contains(&node.id()) {
                return Err(ProgramError::GraphBuildError(format!(
                    "`{}` is an input of the graph but was not declared as a program input",
                    node.name()
                )));
            }
            for (slot, operand) in node.inputs().iter().enumerate() {
                let Some(operand) = operand else { continue };
                let history = operand.history().ok_or_else(|| {
                    ProgramError::GraphBuildError(format!(
                        "operand x{} of `{}` is not connected to the program inputs",
                        slot,
                        node.name()
                    ))
                })?;
                stack.push(history.node.clone());
            }
            nodes.insert(node.id(), node);
        }

        let mut graph = StableDiGraph::new();
        let mut index_map: HashMap<u64, NodeIndex> = HashMap::new();
        let mut ids: Vec<u64> = nodes.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(node) = nodes.get(&id) {
                index_map.insert(id, graph.add_node(node.clone()));
            }
        }
        for node in nodes.values() {
            let target = index_map[&node.id()];
            for (slot, operand) in node.inputs().iter().enumerate() {
                if let Some(history) = operand.as_ref().and_then(|o| o.history()) {
                    let source = index_map[&history.node.id()];
                    graph.add_edge(source, target, slot);
                }
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(ProgramError::CycleDetected);
        }
        Ok(Self { graph })
    }

    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Parents before children; among ready nodes, declaration order first.
    pub(crate) fn execution_order(&self) -> ProgramResult<Vec<Arc<Node>>> {
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut ready = BinaryHeap::new();
        for idx in self.graph.node_indices() {
            let degree = self.graph.edges_directed(idx, Direction::Incoming).count();
            in_degree.insert(idx, degree);
            if degree == 0 {
                ready.push(Reverse((self.graph[idx].id(), idx)));
            }
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, idx))) = ready.pop() {
            order.push(self.graph[idx].clone());
            for child in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[child].id(), child)));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(ProgramError::CycleDetected);
        }
        Ok(order)
    }
}
