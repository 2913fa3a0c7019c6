use crate::context::{self, ExecutionContext};
use crate::dispatch::panic_message;
use crate::merge::ErrorMergeStrategy;
use crate::unit::ExecutionUnit;
use arborcore::{EventKind, FlowError, NodeInfo, NodeStatus, TreeError, Value, WorkflowError};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Anything that owns an execution unit and can be run as one
#[async_trait]
pub trait Runnable: Send + Sync {
    fn unit(&self) -> &ExecutionUnit;

    async fn run(&self) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One child at a time, in order
    #[default]
    Sequential,
    /// All children together; waits for every child to settle
    Concurrent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub mode: ExecutionMode,
    pub merge: ErrorMergeStrategy,
}

impl TaskOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn concurrent() -> Self {
        Self {
            mode: ExecutionMode::Concurrent,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_merge(mut self, merge: ErrorMergeStrategy) -> Self {
        self.merge = merge;
        self
    }
}

/// How one child of a task ended
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(Value),
    Failed(WorkflowError),
    /// Skipped or stopped early because the tree was cancelled, or never started
    /// because an earlier sequential sibling failed
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub unit: ExecutionUnit,
    pub outcome: Outcome,
}

/// Every child's outcome, in the order the children were produced
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: String,
    pub children: Vec<ChildOutcome>,
}

impl TaskReport {
    pub fn succeeded(&self) -> usize {
        self.children
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Completed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.errors().count()
    }

    pub fn cancelled(&self) -> usize {
        self.children
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Cancelled))
            .count()
    }

    /// Outputs of the children that completed, in order
    pub fn outputs(&self) -> Vec<Value> {
        self.children
            .iter()
            .filter_map(|c| match &c.outcome {
                Outcome::Completed(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &WorkflowError> {
        self.children.iter().filter_map(|c| match &c.outcome {
            Outcome::Failed(err) => Some(err),
            _ => None,
        })
    }

    /// All outputs, or the error chosen by `merge`
    ///
    /// A task whose children were cancelled without any failure also reports an error.
    pub fn into_result(self, merge: &ErrorMergeStrategy, owner: &ExecutionUnit) -> Result<Vec<Value>, WorkflowError> {
        if let Some(err) = merge.resolve(self.errors().cloned().collect()) {
            return Err(err);
        }
        let cancelled = self.cancelled();
        if cancelled > 0 {
            return Err(WorkflowError::new(
                format!(
                    "task '{}' cancelled: {} of {} children did not run",
                    self.task,
                    cancelled,
                    self.children.len()
                ),
                owner.id(),
            )
            .with_logs(owner.logs()));
        }
        Ok(self.outputs())
    }
}

impl ExecutionUnit {
    /// Produce child units, attach them under `self`, run them and return their outputs
    pub async fn spawn<F, Fut, E>(&self, options: TaskOptions, produce: F) -> Result<Vec<Value>, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Arc<dyn Runnable>>, E>>,
        E: Into<anyhow::Error>,
    {
        let merge = options.merge.clone();
        let report = self.spawn_report(options, produce).await?;
        Ok(report.into_result(&merge, self)?)
    }

    /// Like [`ExecutionUnit::spawn`], but hands back every child's outcome
    pub async fn spawn_report<F, Fut, E>(&self, options: TaskOptions, produce: F) -> Result<TaskReport, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Arc<dyn Runnable>>, E>>,
        E: Into<anyhow::Error>,
    {
        let task = options.name.clone().unwrap_or_else(|| "task".to_string());

        let scope_node = NodeInfo::new(format!("task:{}", task), Some(self.current_node_id()))
            .with_status(NodeStatus::Running);
        let ctx = ExecutionContext::new(scope_node, self.clone());
        let children = match context::scope(ctx.clone(), produce()).await {
            Ok(children) => {
                ctx.set_status(NodeStatus::Completed);
                children
            }
            Err(err) => {
                ctx.set_status(NodeStatus::Failed);
                return Err(self.capture_failure(err.into()).into());
            }
        };

        self.adopt_all(&children)?;

        tracing::info!(unit = %self.label(), task = %task, children = children.len(), mode = ?options.mode, "task started");
        self.emit(EventKind::TaskStart {
            task: task.clone(),
            children: children.len(),
        });

        let outcomes = match options.mode {
            ExecutionMode::Sequential => run_sequential(&children).await,
            ExecutionMode::Concurrent => run_concurrent(&children).await,
        };

        let report = TaskReport {
            task: task.clone(),
            children: children
                .iter()
                .zip(outcomes)
                .map(|(child, outcome)| ChildOutcome {
                    unit: child.unit().clone(),
                    outcome,
                })
                .collect(),
        };

        tracing::info!(
            unit = %self.label(),
            task = %task,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "task finished"
        );
        self.emit(EventKind::TaskEnd {
            task,
            succeeded: report.succeeded(),
            failed: report.failed(),
        });
        Ok(report)
    }

    /// Attach every produced unit; nothing is attached unless all of them can be
    fn adopt_all(&self, children: &[Arc<dyn Runnable>]) -> Result<(), TreeError> {
        let units: Vec<ExecutionUnit> = children.iter().map(|c| c.unit().clone()).collect();
        let origin = self.last_log_id();
        self.attach_many(&units)?;
        for unit in &units {
            unit.set_origin_log(origin);
        }
        Ok(())
    }
}

async fn run_sequential(children: &[Arc<dyn Runnable>]) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(children.len());
    let mut failed = false;
    for child in children {
        if failed {
            outcomes.push(skip(child.unit()));
            continue;
        }
        let outcome = settle(child.as_ref()).await;
        failed = matches!(outcome, Outcome::Failed(_));
        outcomes.push(outcome);
    }
    outcomes
}

async fn run_concurrent(children: &[Arc<dyn Runnable>]) -> Vec<Outcome> {
    join_all(children.iter().map(|child| settle(child.as_ref()))).await
}

async fn settle(runnable: &dyn Runnable) -> Outcome {
    let unit = runnable.unit();
    if unit.is_cancelled() {
        return skip(unit);
    }
    match run_unit(runnable).await {
        Ok(value) => Outcome::Completed(value),
        Err(_) if unit.status() == NodeStatus::Cancelled => Outcome::Cancelled,
        Err(err) => Outcome::Failed(err),
    }
}

fn skip(unit: &ExecutionUnit) -> Outcome {
    if let Err(err) = unit.set_status(NodeStatus::Cancelled) {
        tracing::warn!(unit = %unit.label(), error = %err, "cannot mark skipped unit cancelled");
    }
    Outcome::Cancelled
}

/// Run one unit through its lifecycle: `running`, then `completed` or `failed`
///
/// The unit's own node is the ambient context while it runs. A panic in the
/// work is caught and reported as a failure of this unit. Work that fails
/// after its tree was cancelled ends `cancelled` instead of `failed`.
pub async fn run_unit(runnable: &dyn Runnable) -> Result<Value, WorkflowError> {
    let unit = runnable.unit();
    unit.set_status(NodeStatus::Running)
        .map_err(|err| unit.capture_failure(err.into()))?;

    let ctx = ExecutionContext::new(unit.node_info(), unit.clone());
    let result = match AssertUnwindSafe(context::scope(ctx, runnable.run()))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "'{}' panicked: {}",
            unit.name(),
            panic_message(panic.as_ref())
        )),
    };

    match result {
        Ok(value) => {
            unit.set_output(value.clone());
            finish(unit, NodeStatus::Completed);
            Ok(value)
        }
        Err(err) => {
            let err = unit.capture_failure(err);
            if unit.is_cancelled() {
                finish(unit, NodeStatus::Cancelled);
            } else {
                finish(unit, NodeStatus::Failed);
            }
            Err(err)
        }
    }
}

fn finish(unit: &ExecutionUnit, status: NodeStatus) {
    if let Err(err) = unit.set_status(status) {
        tracing::warn!(unit = %unit.label(), error = %err, "unit status changed while running");
    }
}
