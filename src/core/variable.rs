//! Named, schema-typed, path-scoped mutable state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::core::context::CallContext;
use crate::error::{OpError, OpResult};
use crate::schema::{standardize, Schema};

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Variables created with a deferred initializer inside a stateless scope,
/// waiting for [`initialize_all_variables`]. Held weakly: a variable dropped
/// before the flush is forgotten.
static PENDING: Mutex<Vec<Weak<VariableInner>>> = parking_lot::const_mutex(Vec::new());

fn is_pending_entry(entry: &Weak<VariableInner>, variable: &Variable) -> bool {
    std::ptr::eq(entry.as_ptr(), Arc::as_ptr(&variable.0))
}

fn forget_pending(variable: &Variable) {
    PENDING
        .lock()
        .retain(|entry| entry.strong_count() > 0 && !is_pending_entry(entry, variable));
}

type Producer = dyn Fn(&Schema) -> Value + Send + Sync;

/// Deferred payload producer.
#[derive(Clone)]
pub struct Initializer {
    producer: Arc<Producer>,
}

impl Initializer {
    pub fn new(producer: impl Fn(&Schema) -> Value + Send + Sync + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// Field defaults, falling back to zero values.
    pub fn empty() -> Self {
        Self::new(Schema::default_payload)
    }

    fn produce(&self, schema: &Schema) -> Value {
        (self.producer)(schema)
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Initializer")
    }
}

struct VariableState {
    value: Option<Value>,
    initializer: Option<Initializer>,
}

struct VariableInner {
    id: u64,
    name: String,
    path: String,
    schema: Schema,
    trainable: AtomicBool,
    state: RwLock<VariableState>,
}

/// Handle to a variable. Clones share the same state.
#[derive(Clone)]
pub struct Variable(Arc<VariableInner>);

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("path", &self.0.path)
            .field("trainable", &self.trainable())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Variable {}

/// Reject empty names and names containing the path separator.
pub fn validate_name(name: &str) -> OpResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(OpError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct VariableBuilder {
    name: String,
    schema: Option<Schema>,
    value: Option<Value>,
    initializer: Option<Initializer>,
    trainable: bool,
}

impl VariableBuilder {
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Create the variable under the context's current name scope.
    ///
    /// Inside a stateless scope only deferred initializers are accepted; the
    /// variable stays uninitialized until flushed. Outside one, an initializer
    /// runs immediately.
    pub fn build(self, ctx: &CallContext) -> OpResult<Variable> {
        validate_name(&self.name)?;
        let schema = self.schema.ok_or_else(|| {
            OpError::ConfigError(format!("Variable `{}` requires a schema", self.name))
        })?;
        let schema = standardize(&schema);

        let stateless = ctx.in_stateless_scope();
        let (value, initializer) = match (self.value, self.initializer) {
            (Some(_), Some(_)) => {
                return Err(OpError::ConfigError(format!(
                    "Variable `{}` accepts either a value or an initializer, not both",
                    self.name
                )))
            }
            (None, None) => {
                return Err(OpError::ConfigError(format!(
                    "Variable `{}` requires a value or an initializer",
                    self.name
                )))
            }
            (Some(_), None) if stateless => {
                return Err(OpError::ScopeError(format!(
                    "Variable `{}` was created with a concrete value inside a stateless scope; \
                     use a deferred initializer instead",
                    self.name
                )))
            }
            (Some(value), None) => {
                schema
                    .validate(&value)
                    .map_err(|e| OpError::SchemaMismatch(e.to_string()))?;
                (Some(value), None)
            }
            (None, Some(init)) if stateless => (None, Some(init)),
            (None, Some(init)) => {
                let value = init.produce(&schema);
                schema
                    .validate(&value)
                    .map_err(|e| OpError::SchemaMismatch(e.to_string()))?;
                (Some(value), None)
            }
        };

        let prefix = ctx.current_path();
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", prefix, self.name)
        };

        let deferred = initializer.is_some();
        let variable = Variable(Arc::new(VariableInner {
            id: NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed),
            name: self.name,
            path,
            schema,
            trainable: AtomicBool::new(self.trainable),
            state: RwLock::new(VariableState { value, initializer }),
        }));
        if deferred {
            tracing::debug!(path = %variable.path(), "deferred variable registered");
            let mut pending = PENDING.lock();
            pending.retain(|entry| entry.strong_count() > 0);
            pending.push(Arc::downgrade(&variable.0));
        }
        Ok(variable)
    }
}

impl Variable {
    pub fn builder(name: impl Into<String>) -> VariableBuilder {
        VariableBuilder {
            name: name.into(),
            schema: None,
            value: None,
            initializer: None,
            trainable: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    pub fn schema(&self) -> &Schema {
        &self.0.schema
    }

    pub fn trainable(&self) -> bool {
        self.0.trainable.load(Ordering::Relaxed)
    }

    pub fn set_trainable(&self, trainable: bool) {
        self.0.trainable.store(trainable, Ordering::Relaxed);
    }

    pub fn is_initialized(&self) -> bool {
        self.0.state.read().value.is_some()
    }

    /// Live payload, ignoring any scope overlay.
    pub fn payload(&self) -> Option<Value> {
        self.0.state.read().value.clone()
    }

    /// Current payload as seen from `ctx`: the innermost buffered write if a
    /// stateless scope holds one, else the live payload.
    pub fn value(&self, ctx: &CallContext) -> OpResult<Value> {
        if let Some(value) = ctx.read_overlay(self.id()) {
            return Ok(value);
        }
        self.payload().ok_or_else(|| {
            OpError::ScopeError(format!(
                "Variable `{}` is not initialized; run initialize_all_variables first",
                self.path()
            ))
        })
    }

    /// Write a payload. Buffered when a stateless scope is active, applied
    /// directly otherwise.
    pub fn assign(&self, value: Value, ctx: &CallContext) -> OpResult<()> {
        self.0
            .schema
            .validate(&value)
            .map_err(|e| OpError::SchemaMismatch(format!("{}: {}", self.path(), e)))?;
        let value = match ctx.buffer_update(self, value) {
            None => return Ok(()),
            Some(value) => value,
        };
        if ctx.in_symbolic_scope() {
            return Err(OpError::ScopeError(format!(
                "Cannot assign variable `{}` inside a symbolic scope",
                self.path()
            )));
        }
        self.direct_assign(value);
        Ok(())
    }

    /// Read-modify-write through `ctx`.
    pub fn update(
        &self,
        ctx: &CallContext,
        f: impl FnOnce(&mut Value) -> OpResult<()>,
    ) -> OpResult<()> {
        let mut value = self.value(ctx)?;
        f(&mut value)?;
        self.assign(value, ctx)
    }

    /// Replace the live payload without validation or scope checks.
    pub(crate) fn direct_assign(&self, value: Value) {
        self.0.state.write().value = Some(value);
    }

    /// Install a stored payload, dropping any pending initializer.
    pub(crate) fn restore(&self, value: Value) {
        let was_pending = {
            let mut state = self.0.state.write();
            state.value = Some(value);
            state.initializer.take().is_some()
        };
        if was_pending {
            forget_pending(self);
        }
    }

    /// Run the deferred initializer. Fails if already initialized or if a
    /// stateless scope is active.
    pub fn deferred_initialize(&self, ctx: &CallContext) -> OpResult<()> {
        if ctx.in_stateless_scope() {
            return Err(OpError::ScopeError(format!(
                "Cannot initialize variable `{}` inside a stateless scope",
                self.path()
            )));
        }
        {
            let mut state = self.0.state.write();
            if state.value.is_some() {
                return Err(OpError::AlreadyInitialized(self.path().to_string()));
            }
            let initializer = state.initializer.take().ok_or_else(|| {
                OpError::ConfigError(format!("Variable `{}` has no initializer", self.path()))
            })?;
            let value = initializer.produce(&self.0.schema);
            if let Err(e) = self.0.schema.validate(&value) {
                state.initializer = Some(initializer);
                return Err(OpError::SchemaMismatch(format!("{}: {}", self.path(), e)));
            }
            state.value = Some(value);
        }
        forget_pending(self);
        tracing::debug!(path = %self.path(), "variable initialized");
        Ok(())
    }
}

/// Materialize every pending deferred variable. Returns how many were
/// initialized.
pub fn initialize_all_variables(ctx: &CallContext) -> OpResult<usize> {
    if ctx.in_stateless_scope() {
        return Err(OpError::ScopeError(
            "Cannot initialize variables inside a stateless scope".into(),
        ));
    }
    let pending: Vec<Variable> = std::mem::take(&mut *PENDING.lock())
        .into_iter()
        .filter_map(|entry| entry.upgrade().map(Variable))
        .collect();
    initialize_each(pending, ctx)
}

/// Materialize the pending variables among `variables`, leaving other pending
/// variables untouched.
pub fn initialize_variables(variables: &[Variable], ctx: &CallContext) -> OpResult<usize> {
    if ctx.in_stateless_scope() {
        return Err(OpError::ScopeError(
            "Cannot initialize variables inside a stateless scope".into(),
        ));
    }
    let selected: Vec<Variable> = {
        let mut pending = PENDING.lock();
        let (selected, rest): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .filter(|entry| entry.strong_count() > 0)
            .partition(|entry| variables.iter().any(|v| is_pending_entry(entry, v)));
        *pending = rest;
        selected
            .into_iter()
            .filter_map(|entry| entry.upgrade().map(Variable))
            .collect()
    };
    initialize_each(selected, ctx)
}

fn initialize_each(variables: Vec<Variable>, ctx: &CallContext) -> OpResult<usize> {
    let mut count = 0;
    let mut remaining = variables.into_iter();
    while let Some(variable) = remaining.next() {
        if let Err(e) = variable.deferred_initialize(ctx) {
            let mut pending = PENDING.lock();
            pending.push(Arc::downgrade(&variable.0));
            pending.extend(remaining.map(|v| Arc::downgrade(&v.0)));
            return Err(e);
        }
        count += 1;
    }
    Ok(count)
}
