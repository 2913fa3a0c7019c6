use arborcore::{TreeError, Value};
use arborruntime::{ExecutionUnit, Runnable};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxedWork =
    Box<dyn Fn(ExecutionUnit) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>> + Send + Sync>;

/// Runnable backed by a closure that receives its own unit
pub struct FnTask {
    unit: ExecutionUnit,
    work: BoxedWork,
}

impl FnTask {
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Result<Self, TreeError>
    where
        F: Fn(ExecutionUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Ok(Self {
            unit: ExecutionUnit::new(name)?,
            work: Box::new(move |unit| Box::pin(work(unit))),
        })
    }

    /// Shorthand for a task that always returns `value`
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Result<Self, TreeError> {
        let value = value.into();
        Self::new(name, move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    pub fn into_runnable(self) -> Arc<dyn Runnable> {
        Arc::new(self)
    }
}

#[async_trait]
impl Runnable for FnTask {
    fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    async fn run(&self) -> anyhow::Result<Value> {
        (self.work)(self.unit.clone()).await
    }
}
