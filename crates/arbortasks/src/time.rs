use arborcore::{TreeError, Value};
use arborruntime::{ExecutionUnit, Runnable};
use async_trait::async_trait;
use tokio::time::{sleep, Duration};

/// Wait for a fixed duration, then pass `payload` through as the output
///
/// The wait ends early with an error if the unit or an ancestor is cancelled.
pub struct DelayTask {
    unit: ExecutionUnit,
    delay: Duration,
    payload: Value,
}

impl DelayTask {
    pub fn new(name: impl Into<String>, delay: Duration) -> Result<Self, TreeError> {
        Ok(Self {
            unit: ExecutionUnit::new(name)?,
            delay,
            payload: Value::Null,
        })
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[async_trait]
impl Runnable for DelayTask {
    fn unit(&self) -> &ExecutionUnit {
        &self.unit
    }

    async fn run(&self) -> anyhow::Result<Value> {
        let delay_ms = self.delay.as_millis() as u64;
        self.unit.debug(format!("delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(self.delay) => Ok(self.payload.clone()),
            _ = self.unit.cancelled() => {
                anyhow::bail!("delay of {}ms cancelled", delay_ms)
            }
        }
    }
}
