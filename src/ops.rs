//! Named merge operations over [`Data`] operands.
//!
//! Each operation inspects its operands: if any is a type descriptor or a
//! placeholder it traces a merge node and returns a placeholder, otherwise it
//! merges the concrete values directly.

use crate::core::context::CallContext;
use crate::core::value::{Data, JsonDataModel, SymbolicDataModel};
use crate::error::OpResult;
use crate::modules::merging::{Merge, MergeKind};
use crate::modules::ModuleHandle;

fn dispatch(kind: MergeKind, operands: &[Option<Data>]) -> OpResult<Option<Data>> {
    if operands.iter().flatten().any(Data::is_symbolic) {
        let symbolic: Vec<Option<SymbolicDataModel>> = operands
            .iter()
            .map(|o| o.as_ref().map(Data::to_symbolic))
            .collect();
        let module = ModuleHandle::new(Merge::new(kind));
        let outputs = module.symbolic_call(&symbolic, &CallContext::new())?;
        return Ok(outputs.into_iter().next().flatten().map(Data::Symbolic));
    }
    let values: Vec<Option<&JsonDataModel>> = operands
        .iter()
        .map(|o| o.as_ref().and_then(Data::as_json))
        .collect();
    Ok(kind.merge_values(&values)?.map(Data::Json))
}

/// Merge all operands; fails naming the first absent one.
pub fn concat(operands: &[Option<Data>]) -> OpResult<Option<Data>> {
    dispatch(MergeKind::Concat, operands)
}

/// Merge if every operand is present, else `None`.
pub fn logical_and(operands: &[Option<Data>]) -> OpResult<Option<Data>> {
    dispatch(MergeKind::And, operands)
}

/// Merge the present operands, `None` if there are none.
pub fn logical_or(operands: &[Option<Data>]) -> OpResult<Option<Data>> {
    dispatch(MergeKind::Or, operands)
}
