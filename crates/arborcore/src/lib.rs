//! Core abstractions for the arbor execution tree
//!
//! This crate provides the passive data model shared by the runtime, the
//! task library and the CLI: tree nodes, events, log entries, observable
//! state and the error taxonomy. It has no runtime behaviour of its own.

mod error;
pub mod events;
mod log;
mod node;
pub mod observers;
mod state;
mod value;

pub use error::{ErrorReport, FlowError, ObserverError, TreeError, WorkflowError};
pub use events::*;
pub use log::{LogEntry, LogId, LogLevel};
pub use node::{validate_name, Node, NodeId, NodeInfo, NodeStatus, MAX_NAME_LEN};
pub use observers::{EventRecorder, Observer, ObserverResult, TracingObserver};
pub use state::{snapshot, Observable, ObservedField, StateSnapshot, Visibility, REDACTED};
pub use value::Value;

/// Result type for tree operations
pub type Result<T> = std::result::Result<T, FlowError>;
