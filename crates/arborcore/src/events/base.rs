use crate::{ErrorReport, NodeInfo, StateSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EventId = Uuid;

/// Something that happened at a node of the execution tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Node the event originated from
    pub node: NodeInfo,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(node: NodeInfo, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            node,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Closed set of event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    StepStart {
        step: NodeInfo,
    },
    StepEnd {
        step: NodeInfo,
        duration_ms: u64,
    },
    TaskStart {
        task: String,
        children: usize,
    },
    TaskEnd {
        task: String,
        succeeded: usize,
        failed: usize,
    },
    ChildAttached {
        parent: NodeInfo,
        child: NodeInfo,
    },
    ChildDetached {
        parent: NodeInfo,
        child: NodeInfo,
    },
    StateSnapshot {
        state: StateSnapshot,
    },
    TreeUpdated {
        root: NodeInfo,
    },
    Error {
        error: ErrorReport,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StepStart { .. } => "stepStart",
            EventKind::StepEnd { .. } => "stepEnd",
            EventKind::TaskStart { .. } => "taskStart",
            EventKind::TaskEnd { .. } => "taskEnd",
            EventKind::ChildAttached { .. } => "childAttached",
            EventKind::ChildDetached { .. } => "childDetached",
            EventKind::StateSnapshot { .. } => "stateSnapshot",
            EventKind::TreeUpdated { .. } => "treeUpdated",
            EventKind::Error { .. } => "error",
        }
    }

    /// Attach, detach and status changes
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EventKind::ChildAttached { .. }
                | EventKind::ChildDetached { .. }
                | EventKind::TreeUpdated { .. }
        )
    }
}
