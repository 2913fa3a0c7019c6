//! # Observers: listeners registered at the root of an execution tree
//!
//! Every log statement, event, state snapshot and structural change that
//! happens anywhere below a root is delivered to the root's observers, in
//! registration order, synchronously on the emitting task.
//!
//! ```text
//!   unit.log / unit.emit / attach / detach / set_status
//!        └─► resolve root ──► for each observer (registration order)
//!                               ├─► on_log(&LogEntry)
//!                               ├─► on_event(&Event)
//!                               ├─► on_state_updated(&Node)
//!                               └─► on_tree_changed(&Node /* root */)
//! ```
//!
//! Callbacks return [`ObserverResult`]. An `Err` or a panic is caught by the
//! dispatcher and reported through `tracing`; it never reaches the code that
//! emitted the event.

use crate::{Event, LogEntry, LogLevel, Node, ObserverError};
use std::sync::Mutex;

pub type ObserverResult = Result<(), ObserverError>;

/// Listener for everything that happens in a tree
///
/// All callbacks default to doing nothing.
pub trait Observer: Send + Sync {
    /// Name used when reporting a failing callback
    fn name(&self) -> &str {
        "observer"
    }

    fn on_log(&self, _entry: &LogEntry) -> ObserverResult {
        Ok(())
    }

    fn on_event(&self, _event: &Event) -> ObserverResult {
        Ok(())
    }

    fn on_state_updated(&self, _node: &Node) -> ObserverResult {
        Ok(())
    }

    fn on_tree_changed(&self, _root: &Node) -> ObserverResult {
        Ok(())
    }
}

/// Writes logs and events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_log(&self, entry: &LogEntry) -> ObserverResult {
        let unit = entry.unit_id;
        match entry.level {
            LogLevel::Debug => tracing::debug!(%unit, data = ?entry.data, "{}", entry.message),
            LogLevel::Info => tracing::info!(%unit, data = ?entry.data, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(%unit, data = ?entry.data, "{}", entry.message),
            LogLevel::Error => tracing::error!(%unit, data = ?entry.data, "{}", entry.message),
        }
        Ok(())
    }

    fn on_event(&self, event: &Event) -> ObserverResult {
        if event.kind.is_structural() {
            tracing::debug!(node = %event.node, event = event.name(), "tree event");
        } else {
            tracing::info!(node = %event.node, event = event.name(), "tree event");
        }
        Ok(())
    }
}

/// Keeps everything it observes in memory
#[derive(Debug, Default)]
pub struct EventRecorder {
    logs: Mutex<Vec<LogEntry>>,
    events: Mutex<Vec<Event>>,
    states: Mutex<Vec<Node>>,
    trees: Mutex<Vec<Node>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.logs).clone()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Names of the recorded events, in arrival order
    pub fn event_names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(Event::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.name() == name).count()
    }

    pub fn state_updates(&self) -> Vec<Node> {
        lock(&self.states).clone()
    }

    /// Most recent root passed to `on_tree_changed`
    pub fn last_tree(&self) -> Option<Node> {
        lock(&self.trees).last().cloned()
    }

    pub fn tree_changes(&self) -> usize {
        lock(&self.trees).len()
    }

    pub fn clear(&self) {
        lock(&self.logs).clear();
        lock(&self.events).clear();
        lock(&self.states).clear();
        lock(&self.trees).clear();
    }
}

impl Observer for EventRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_log(&self, entry: &LogEntry) -> ObserverResult {
        lock(&self.logs).push(entry.clone());
        Ok(())
    }

    fn on_event(&self, event: &Event) -> ObserverResult {
        lock(&self.events).push(event.clone());
        Ok(())
    }

    fn on_state_updated(&self, node: &Node) -> ObserverResult {
        lock(&self.states).push(node.clone());
        Ok(())
    }

    fn on_tree_changed(&self, root: &Node) -> ObserverResult {
        lock(&self.trees).push(root.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, NodeInfo};
    use uuid::Uuid;

    #[test]
    fn test_recorder_captures_in_order() {
        let recorder = EventRecorder::new();
        let node = NodeInfo::new("root", None);

        recorder
            .on_event(&Event::new(
                node.clone(),
                EventKind::TaskStart {
                    task: "t".into(),
                    children: 1,
                },
            ))
            .unwrap();
        recorder
            .on_event(&Event::new(
                node,
                EventKind::TaskEnd {
                    task: "t".into(),
                    succeeded: 1,
                    failed: 0,
                },
            ))
            .unwrap();
        recorder
            .on_log(&LogEntry::new(Uuid::new_v4(), LogLevel::Info, "hello"))
            .unwrap();

        assert_eq!(recorder.event_names(), vec!["taskStart", "taskEnd"]);
        assert_eq!(recorder.count("taskEnd"), 1);
        assert_eq!(recorder.logs()[0].message, "hello");

        recorder.clear();
        assert!(recorder.events().is_empty());
    }
}
