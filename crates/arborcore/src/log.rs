use crate::{NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type LogId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One log statement recorded against an execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogId,
    pub unit_id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Log statement of the parent unit that was current when this unit was spawned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_log_id: Option<LogId>,
}

impl LogEntry {
    pub fn new(unit_id: NodeId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            unit_id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data: None,
            parent_log_id: None,
        }
    }

    /// Attach structured data; `Null` is not stored, so entries survive a JSON round-trip unchanged
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        let data = data.into();
        self.data = (!data.is_null()).then_some(data);
        self
    }

    pub fn with_parent_log(mut self, parent_log_id: Option<LogId>) -> Self {
        self.parent_log_id = parent_log_id;
        self
    }
}
