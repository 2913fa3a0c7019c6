//! Execution runtime for arbor trees
//!
//! This crate provides the live side of the engine: execution units and the
//! tree they form, observer dispatch, the ambient execution context, the step
//! executor and the task spawner.

pub mod context;
mod dispatch;
mod invariants;
mod merge;
mod runtime;
mod step;
mod task;
mod tree;
mod unit;

pub use context::{current, try_current, ExecutionContext};
pub use invariants::{check_invariants, validate_node, TreeView};
pub use merge::{combine_messages, CombineFn, ErrorMergeStrategy, DEFAULT_MAX_MERGE_DEPTH};
pub use runtime::{RuntimeConfig, TreeRuntime};
pub use step::{StepOptions, DEFAULT_STEP_NAME};
pub use task::{run_unit, ChildOutcome, ExecutionMode, Outcome, Runnable, TaskOptions, TaskReport};
pub use tree::MAX_TREE_DEPTH;
pub use unit::ExecutionUnit;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
