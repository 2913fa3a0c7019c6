use crate::context::{self, ExecutionContext};
use crate::unit::ExecutionUnit;
use arborcore::{EventKind, FlowError, LogLevel, NodeInfo, NodeStatus, WorkflowError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;

/// Name used when a step is run without one
pub const DEFAULT_STEP_NAME: &str = "step";

/// Per-step behaviour switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOptions {
    pub name: Option<String>,
    /// Emit `stepEnd` with the elapsed time
    pub timing: bool,
    /// Snapshot the unit's observable state after a successful step
    pub snapshot: bool,
    pub log_start: bool,
    pub log_finish: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            name: None,
            timing: true,
            snapshot: false,
            log_start: false,
            log_finish: false,
        }
    }
}

impl StepOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timing(mut self, timing: bool) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_logging(mut self, start: bool, finish: bool) -> Self {
        self.log_start = start;
        self.log_finish = finish;
        self
    }
}

impl ExecutionUnit {
    /// Run `work` as a named step with default options
    pub async fn step<T, E, Fut>(&self, name: &str, work: Fut) -> Result<T, WorkflowError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.step_with(StepOptions::named(name), work).await
    }

    /// Run `work` inside a step scope.
    ///
    /// Failures come back as a [`WorkflowError`] carrying this unit's state and
    /// logs; an `error` event is emitted once, where the failure first surfaced.
    pub async fn step_with<T, E, Fut>(&self, options: StepOptions, work: Fut) -> Result<T, WorkflowError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_STEP_NAME.to_string());
        let step = NodeInfo::new(name.clone(), Some(self.current_node_id()))
            .with_status(NodeStatus::Running);

        self.emit(EventKind::StepStart { step: step.clone() });
        if options.log_start {
            self.log(LogLevel::Info, format!("step '{}' started", name));
        }

        let ctx = ExecutionContext::new(step, self.clone());
        let started = Instant::now();
        let result = context::scope(ctx.clone(), work).await;

        match result {
            Ok(value) => {
                ctx.set_status(NodeStatus::Completed);
                if options.snapshot {
                    self.snapshot_state();
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                if options.timing {
                    self.emit(EventKind::StepEnd {
                        step: ctx.node(),
                        duration_ms,
                    });
                }
                if options.log_finish {
                    self.log(
                        LogLevel::Info,
                        format!("step '{}' finished in {}ms", name, duration_ms),
                    );
                }
                Ok(value)
            }
            Err(err) => {
                ctx.set_status(NodeStatus::Failed);
                Err(self.capture_failure(err.into()))
            }
        }
    }

    /// Normalize a failure into a [`WorkflowError`] attributed to this unit
    pub(crate) fn capture_failure(&self, error: anyhow::Error) -> WorkflowError {
        let error = match error.downcast::<WorkflowError>() {
            Ok(existing) => return existing,
            Err(error) => error,
        };
        let error = match error.downcast::<FlowError>() {
            Ok(FlowError::Workflow(existing)) => return existing,
            Ok(other) => anyhow::Error::new(other),
            Err(error) => error,
        };

        let err = WorkflowError::from_failure(error, self.id())
            .with_state(self.observe_state())
            .with_logs(self.logs());
        tracing::warn!(unit = %self.label(), error = %err, "work failed");
        self.emit(EventKind::Error { error: err.report() });
        err
    }
}
