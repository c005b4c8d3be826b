//! Per-call-chain execution context and the scope stack.
//!
//! A [`CallContext`] is created once per logical call chain (one program call,
//! one declaration trace) and passed by reference through every module call.
//! It carries the training flag and a stack of scope frames. Concurrent call
//! chains own separate contexts, so they never observe each other's buffered
//! variable writes.
//!
//! Scopes are entered through RAII guards. Dropping a guard pops its frame and
//! every frame pushed above it, on success and on error alike.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::variable::Variable;
use crate::llm::StreamChunk;

/// Buffered `(variable, payload)` writes captured by a stateless scope.
pub type Updates = Vec<(Variable, Value)>;

#[derive(Default)]
struct StatelessBuffer {
    overlay: HashMap<u64, Value>,
    updates: Updates,
}

enum ScopeFrame {
    Name(String),
    Stateless(StatelessBuffer),
    Symbolic,
}

pub struct CallContext {
    training: bool,
    frames: Mutex<Vec<ScopeFrame>>,
    stream: Option<mpsc::Sender<StreamChunk>>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// Context for inference calls.
    pub fn new() -> Self {
        Self {
            training: false,
            frames: Mutex::new(Vec::new()),
            stream: None,
        }
    }

    /// Context for training calls: generators log their predictions.
    pub fn training() -> Self {
        Self {
            training: true,
            ..Self::new()
        }
    }

    /// Forward chunks of streamed language-model replies to `sink`.
    pub fn with_stream_sink(mut self, sink: mpsc::Sender<StreamChunk>) -> Self {
        self.stream = Some(sink);
        self
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub(crate) fn stream_sink(&self) -> Option<&mpsc::Sender<StreamChunk>> {
        self.stream.as_ref()
    }

    /// Same training flag and stream sink, empty scope stack.
    pub fn fork(&self) -> Self {
        Self {
            training: self.training,
            frames: Mutex::new(Vec::new()),
            stream: self.stream.clone(),
        }
    }

    /// Independent context that sees what this one sees: the same name path,
    /// symbolic marker and buffered variable values. Writes made through the
    /// child stay in the child until committed here.
    pub fn child(&self) -> Self {
        let frames = self.frames.lock();
        let mut copied = Vec::new();
        let mut overlay: Option<HashMap<u64, Value>> = None;
        for frame in frames.iter() {
            match frame {
                ScopeFrame::Name(name) => copied.push(ScopeFrame::Name(name.clone())),
                ScopeFrame::Symbolic => copied.push(ScopeFrame::Symbolic),
                ScopeFrame::Stateless(buffer) => overlay
                    .get_or_insert_with(HashMap::new)
                    .extend(buffer.overlay.iter().map(|(id, v)| (*id, v.clone()))),
            }
        }
        if let Some(overlay) = overlay {
            copied.push(ScopeFrame::Stateless(StatelessBuffer {
                overlay,
                updates: Vec::new(),
            }));
        }
        Self {
            training: self.training,
            frames: Mutex::new(copied),
            stream: self.stream.clone(),
        }
    }

    fn push(&self, frame: ScopeFrame) -> usize {
        let mut frames = self.frames.lock();
        frames.push(frame);
        frames.len() - 1
    }

    fn truncate(&self, depth: usize) {
        self.frames.lock().truncate(depth);
    }

    pub fn stateless_scope(&self) -> StatelessScope<'_> {
        let depth = self.push(ScopeFrame::Stateless(StatelessBuffer::default()));
        StatelessScope { ctx: self, depth }
    }

    pub fn symbolic_scope(&self) -> SymbolicScope<'_> {
        let depth = self.push(ScopeFrame::Symbolic);
        SymbolicScope { ctx: self, depth }
    }

    pub fn name_scope(&self, name: impl Into<String>) -> NameScope<'_> {
        let depth = self.push(ScopeFrame::Name(name.into()));
        NameScope { ctx: self, depth }
    }

    pub fn in_stateless_scope(&self) -> bool {
        self.frames
            .lock()
            .iter()
            .any(|f| matches!(f, ScopeFrame::Stateless(_)))
    }

    pub fn in_symbolic_scope(&self) -> bool {
        self.frames
            .lock()
            .iter()
            .any(|f| matches!(f, ScopeFrame::Symbolic))
    }

    /// Symbolic scope active without a stateless scope to absorb side effects.
    pub fn is_bare_symbolic(&self) -> bool {
        self.in_symbolic_scope() && !self.in_stateless_scope()
    }

    /// Enclosing name scopes joined with `/`.
    pub fn current_path(&self) -> String {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                ScopeFrame::Name(name) => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Payload buffered for `variable_id` by the innermost stateless scope
    /// that holds one.
    pub(crate) fn read_overlay(&self, variable_id: u64) -> Option<Value> {
        self.frames.lock().iter().rev().find_map(|f| match f {
            ScopeFrame::Stateless(buffer) => buffer.overlay.get(&variable_id).cloned(),
            _ => None,
        })
    }

    /// Record a write in the innermost stateless scope. Returns the payload
    /// back when no stateless scope is active.
    pub(crate) fn buffer_update(&self, variable: &Variable, value: Value) -> Option<Value> {
        let mut frames = self.frames.lock();
        let buffer = frames.iter_mut().rev().find_map(|f| match f {
            ScopeFrame::Stateless(buffer) => Some(buffer),
            _ => None,
        });
        match buffer {
            Some(buffer) => {
                buffer.overlay.insert(variable.id(), value.clone());
                buffer.updates.push((variable.clone(), value));
                None
            }
            None => Some(value),
        }
    }
}

/// Guard for a stateless scope. Buffered updates are discarded on drop unless
/// taken with [`StatelessScope::take_updates`] and passed to [`commit`].
pub struct StatelessScope<'a> {
    ctx: &'a CallContext,
    depth: usize,
}

impl StatelessScope<'_> {
    /// Drain the writes buffered so far in this scope.
    pub fn take_updates(&self) -> Updates {
        let mut frames = self.ctx.frames.lock();
        match frames.get_mut(self.depth) {
            Some(ScopeFrame::Stateless(buffer)) => std::mem::take(&mut buffer.updates),
            _ => Vec::new(),
        }
    }
}

impl Drop for StatelessScope<'_> {
    fn drop(&mut self) {
        self.ctx.truncate(self.depth);
    }
}

pub struct SymbolicScope<'a> {
    ctx: &'a CallContext,
    depth: usize,
}

impl Drop for SymbolicScope<'_> {
    fn drop(&mut self) {
        self.ctx.truncate(self.depth);
    }
}

pub struct NameScope<'a> {
    ctx: &'a CallContext,
    depth: usize,
}

impl Drop for NameScope<'_> {
    fn drop(&mut self) {
        self.ctx.truncate(self.depth);
    }
}

/// Apply buffered updates to live variable state, in recording order.
pub fn commit(updates: Updates, ctx: &CallContext) -> crate::error::OpResult<()> {
    for (variable, value) in updates {
        variable.assign(value, ctx)?;
    }
    Ok(())
}
