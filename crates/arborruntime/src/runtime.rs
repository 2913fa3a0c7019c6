use crate::step::StepOptions;
use crate::task::{run_unit, Runnable, TaskOptions};
use crate::unit::ExecutionUnit;
use arborcore::{Event, EventBus, FlowError, TracingObserver, Value, WorkflowError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Entry point wiring roots to an event bus and default options
pub struct TreeRuntime {
    config: RuntimeConfig,
    event_bus: EventBus,
}

impl TreeRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        Self { config, event_bus }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a root unit whose events reach this runtime's bus
    pub fn root(&self, name: impl Into<String>) -> Result<ExecutionUnit, FlowError> {
        let root = ExecutionUnit::new(name)?;
        self.observe(&root)?;
        Ok(root)
    }

    /// Register the runtime's observers on an existing root
    pub fn observe(&self, root: &ExecutionUnit) -> Result<(), FlowError> {
        root.add_observer(Arc::new(self.event_bus.observer()))?;
        if self.config.trace_events {
            root.add_observer(Arc::new(TracingObserver))?;
        }
        Ok(())
    }

    /// Run a root runnable, wiring its unit to this runtime first
    pub async fn run(&self, runnable: &dyn Runnable) -> Result<Value, FlowError> {
        self.observe(runnable.unit())?;
        Ok(run_unit(runnable).await?)
    }

    /// Run a step with the configured default options
    pub async fn step<T, E, Fut>(&self, unit: &ExecutionUnit, name: &str, work: Fut) -> Result<T, WorkflowError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let options = self.config.step.clone().with_name(name);
        unit.step_with(options, work).await
    }

    /// Spawn children with the configured default task options
    pub async fn spawn<F, Fut, E>(&self, unit: &ExecutionUnit, produce: F) -> Result<Vec<Value>, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Arc<dyn Runnable>>, E>>,
        E: Into<anyhow::Error>,
    {
        unit.spawn(self.config.task.clone(), produce).await
    }

    /// Subscribe to every event of every root created by this runtime
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

impl Default for TreeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Register a [`TracingObserver`] on every root
    pub trace_events: bool,
    pub step: StepOptions,
    pub task: TaskOptions,
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            trace_events: true,
            step: StepOptions::default(),
            task: TaskOptions::default(),
        }
    }
}
