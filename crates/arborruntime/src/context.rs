//! Ambient execution context.
//!
//! Steps, tasks and dispatched units run their work inside a task-local
//! scope holding the current node and the unit that owns it. Code running
//! arbitrarily deep inside that work (including collaborators that never
//! see an `ExecutionUnit`) can look the context up and emit into the right
//! node. Sibling futures joined on the same task are each polled inside
//! their own scope, so they never observe each other's context.
//!
//! ```no_run
//! use arborcore::LogLevel;
//! use arborruntime::context;
//!
//! async fn call_model(prompt: &str) -> String {
//!     if let Some(ctx) = context::try_current() {
//!         ctx.log(LogLevel::Debug, format!("model call: {prompt}"));
//!     }
//!     String::from("ok")
//! }
//! ```

use crate::lock;
use crate::unit::ExecutionUnit;
use arborcore::{
    Event, EventKind, FlowError, LogId, LogLevel, NodeId, NodeInfo, NodeStatus, Value, WorkflowError,
};
use std::future::Future;
use std::sync::{Arc, Mutex};

tokio::task_local! {
    static CURRENT: ExecutionContext;
}

/// The node work is currently attributed to, and the unit that records it
#[derive(Clone)]
pub struct ExecutionContext {
    node: Arc<Mutex<NodeInfo>>,
    unit: ExecutionUnit,
}

impl ExecutionContext {
    pub(crate) fn new(node: NodeInfo, unit: ExecutionUnit) -> Self {
        Self {
            node: Arc::new(Mutex::new(node)),
            unit,
        }
    }

    /// Current node; a step node while inside a step, the unit's own node otherwise
    pub fn node(&self) -> NodeInfo {
        lock(&self.node).clone()
    }

    pub fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    pub fn unit_id(&self) -> NodeId {
        self.unit.id()
    }

    /// Record an event attributed to the current node
    pub fn emit(&self, kind: EventKind) {
        self.unit.record_event(Event::new(self.node(), kind));
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> LogId {
        self.unit.log(level, message)
    }

    pub fn log_with(&self, level: LogLevel, message: impl Into<String>, data: impl Into<Value>) -> LogId {
        self.unit.log_with(level, message, data)
    }

    pub fn is_cancelled(&self) -> bool {
        self.unit.is_cancelled()
    }

    /// Open a nested step on the owning unit, under the current node
    pub async fn step<T, E, Fut>(&self, name: &str, work: Fut) -> Result<T, WorkflowError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.unit.step(name, work).await
    }

    pub(crate) fn set_status(&self, status: NodeStatus) {
        lock(&self.node).status = status;
    }
}

/// Context of the enclosing scope, or `NoContext` naming `operation`
pub fn current(operation: &str) -> Result<ExecutionContext, FlowError> {
    try_current().ok_or_else(|| FlowError::no_context(operation))
}

/// Context of the enclosing scope, if any
pub fn try_current() -> Option<ExecutionContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// Emit into the ambient context
pub fn emit(kind: EventKind) -> Result<(), FlowError> {
    current("emit")?.emit(kind);
    Ok(())
}

/// Log into the ambient context
pub fn log(level: LogLevel, message: impl Into<String>) -> Result<LogId, FlowError> {
    Ok(current("log")?.log(level, message))
}

/// Run `fut` with `ctx` as the ambient context
pub(crate) async fn scope<F: Future>(ctx: ExecutionContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}
