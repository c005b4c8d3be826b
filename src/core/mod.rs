pub mod context;
pub mod naming;
pub mod value;
pub mod variable;

pub use context::{commit, CallContext, NameScope, StatelessScope, SymbolicScope, Updates};
pub use naming::{auto_name, reset_uids, to_snake_case};
pub use value::{concat_values, Data, JsonDataModel, SymbolicDataModel};
pub use variable::{
    initialize_all_variables, initialize_variables, validate_name, Initializer, Variable,
    VariableBuilder,
};
