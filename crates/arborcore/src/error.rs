use crate::{LogEntry, NodeId, NodeStatus, StateSnapshot};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("no execution context available for '{operation}'")]
    NoContext { operation: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn no_context(operation: impl Into<String>) -> Self {
        FlowError::NoContext {
            operation: operation.into(),
        }
    }

    pub fn as_workflow(&self) -> Option<&WorkflowError> {
        match self {
            FlowError::Workflow(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&TreeError> {
        match self {
            FlowError::Tree(err) => Some(err),
            _ => None,
        }
    }
}

/// Tree-integrity violations
///
/// Units are named as `name (id)` so messages identify both sides of a conflict.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error(
        "'{child}' is already attached to '{current_parent}'; \
         detach it from '{current_parent}' before attaching it to '{new_parent}'"
    )]
    ParentConflict {
        child: String,
        current_parent: String,
        new_parent: String,
    },

    #[error("'{child}' is already a child of '{parent}'")]
    DuplicateAttachment { parent: String, child: String },

    #[error("circular reference: '{child}' is an ancestor of '{parent}'")]
    CircularReference { parent: String, child: String },

    #[error("'{child}' is not attached to '{parent}'")]
    NotAttached { parent: String, child: String },

    #[error("observers can only be registered on a root unit; '{unit}' has parent '{parent}'")]
    NotRoot { unit: String, parent: String },

    #[error("invalid status transition for '{unit}': {from} -> {to}")]
    InvalidTransition {
        unit: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("invalid name: {0}")]
    InvalidName(String),
}

/// Observer callback failure; logged by the dispatcher, never propagated
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl From<String> for ObserverError {
    fn from(message: String) -> Self {
        ObserverError(message)
    }
}

impl From<&str> for ObserverError {
    fn from(message: &str) -> Self {
        ObserverError(message.to_string())
    }
}

/// Execution failure enriched with the diagnostic context of the unit it came from
#[derive(Debug, Clone)]
pub struct WorkflowError {
    pub message: String,
    pub unit_id: NodeId,
    pub trace: Option<String>,
    pub state: Option<StateSnapshot>,
    pub logs: Vec<LogEntry>,
    /// Sibling failures folded into this one by an error-merge strategy
    pub merged: Vec<WorkflowError>,
    original: Option<Arc<anyhow::Error>>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>, unit_id: NodeId) -> Self {
        Self {
            message: message.into(),
            unit_id,
            trace: None,
            state: None,
            logs: Vec::new(),
            merged: Vec::new(),
            original: None,
        }
    }

    /// Wrap an arbitrary failure, keeping it as the original cause
    pub fn from_failure(error: anyhow::Error, unit_id: NodeId) -> Self {
        let message = error.to_string();
        let chain_len = error.chain().count();
        let trace = (chain_len > 1).then(|| format!("{:?}", error));
        Self {
            trace,
            original: Some(Arc::new(error)),
            ..Self::new(message, unit_id)
        }
    }

    pub fn with_state(mut self, state: Option<StateSnapshot>) -> Self {
        self.state = state;
        self
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn with_merged(mut self, merged: Vec<WorkflowError>) -> Self {
        self.merged = merged;
        self
    }

    /// The underlying failure that was raised by the wrapped work
    pub fn original(&self) -> Option<&anyhow::Error> {
        self.original.as_deref()
    }

    pub fn downcast_original<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.original()?.downcast_ref::<E>()
    }

    /// Levels of nested merging below this error; 0 when nothing was merged
    pub fn merge_depth(&self) -> usize {
        self.merged
            .iter()
            .map(|err| 1 + err.merge_depth())
            .max()
            .unwrap_or(0)
    }

    /// Drop merged detail deeper than `max_depth` levels
    pub fn limit_merge_depth(&mut self, max_depth: usize) {
        if max_depth == 0 {
            self.merged.clear();
            return;
        }
        for err in &mut self.merged {
            err.limit_merge_depth(max_depth - 1);
        }
    }

    /// Serializable projection carried by `error` events
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            message: self.message.clone(),
            unit_id: self.unit_id,
            trace: self.trace.clone(),
            state: self.state.clone(),
            logs: self.logs.clone(),
            merged: self.merged.iter().map(WorkflowError::report).collect(),
        }
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for WorkflowError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let original: &anyhow::Error = self.original.as_deref()?;
        let source: &(dyn StdError + 'static) = original.as_ref();
        Some(source)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    pub unit_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<ErrorReport>,
}
