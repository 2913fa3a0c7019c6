use crate::{context, dispatch, lock};
use arborcore::{
    validate_name, Event, EventKind, LogEntry, LogId, LogLevel, Node, NodeId, NodeInfo,
    NodeStatus, Observable, Observer, StateSnapshot, TreeError, Value,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Live, mutable node of the execution tree
///
/// `ExecutionUnit` is a cheap handle; clones refer to the same unit and
/// equality is identity. A unit owns its children and refers to its parent
/// weakly, so dropping the last handle to a root releases the whole tree.
#[derive(Clone)]
pub struct ExecutionUnit {
    pub(crate) inner: Arc<UnitInner>,
}

pub(crate) struct UnitInner {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) record: Mutex<Record>,
    pub(crate) links: Mutex<Links>,
    pub(crate) observers: Mutex<Vec<Arc<dyn Observer>>>,
    pub(crate) state_source: Mutex<Option<Arc<dyn Observable>>>,
    pub(crate) cancellation: CancellationToken,
}

#[derive(Default)]
pub(crate) struct Record {
    pub(crate) status: NodeStatus,
    pub(crate) logs: Vec<LogEntry>,
    pub(crate) events: Vec<Event>,
    pub(crate) state: Option<StateSnapshot>,
    pub(crate) output: Option<Value>,
    /// Parent's log statement that was current when this unit was spawned
    pub(crate) origin_log: Option<LogId>,
}

/// Structural links; only the tree manager mutates these
#[derive(Default)]
pub(crate) struct Links {
    pub(crate) parent: Weak<UnitInner>,
    pub(crate) children: Vec<ExecutionUnit>,
    /// Node-level child list, kept in lockstep with `children`
    pub(crate) child_ids: Vec<NodeId>,
}

impl ExecutionUnit {
    /// Create a detached root unit
    pub fn new(name: impl Into<String>) -> Result<Self, TreeError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            inner: Arc::new(UnitInner {
                id: Uuid::new_v4(),
                name,
                record: Mutex::new(Record::default()),
                links: Mutex::new(Links::default()),
                observers: Mutex::new(Vec::new()),
                state_source: Mutex::new(None),
                cancellation: CancellationToken::new(),
            }),
        })
    }

    /// Create a unit already attached under `parent`
    pub fn with_parent(name: impl Into<String>, parent: &ExecutionUnit) -> Result<Self, TreeError> {
        let unit = Self::new(name)?;
        parent.attach(&unit)?;
        Ok(unit)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn status(&self) -> NodeStatus {
        lock(&self.inner.record).status
    }

    /// `name (id)`, as used in error messages
    pub fn label(&self) -> String {
        format!("{} ({})", self.inner.name, self.inner.id)
    }

    pub fn ptr_eq(&self, other: &ExecutionUnit) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn parent(&self) -> Option<ExecutionUnit> {
        lock(&self.inner.links)
            .parent
            .upgrade()
            .map(|inner| ExecutionUnit { inner })
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    pub fn children(&self) -> Vec<ExecutionUnit> {
        lock(&self.inner.links).children.clone()
    }

    /// Node-level child ids, in attach order
    pub fn child_ids(&self) -> Vec<NodeId> {
        lock(&self.inner.links).child_ids.clone()
    }

    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            id: self.inner.id,
            name: self.inner.name.clone(),
            status: self.status(),
            parent_id: self.parent().map(|p| p.id()),
        }
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.inner.record).logs.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.inner.record).events.clone()
    }

    /// Last snapshot taken by a step or [`ExecutionUnit::snapshot_state`]
    pub fn state(&self) -> Option<StateSnapshot> {
        lock(&self.inner.record).state.clone()
    }

    /// Value produced by the unit's run, once it completed
    pub fn output(&self) -> Option<Value> {
        lock(&self.inner.record).output.clone()
    }

    pub(crate) fn set_output(&self, value: Value) {
        lock(&self.inner.record).output = Some(value);
    }

    pub(crate) fn set_origin_log(&self, origin: Option<LogId>) {
        let mut record = lock(&self.inner.record);
        if record.origin_log.is_none() {
            record.origin_log = origin;
        }
    }

    pub(crate) fn last_log_id(&self) -> Option<LogId> {
        lock(&self.inner.record).logs.last().map(|entry| entry.id)
    }

    /// Snapshot of this subtree as plain data
    pub fn node(&self) -> Node {
        let mut visited = HashSet::new();
        self.node_guarded(&mut visited)
    }

    fn node_guarded(&self, visited: &mut HashSet<NodeId>) -> Node {
        let (status, logs, events, state) = {
            let record = lock(&self.inner.record);
            (
                record.status,
                record.logs.clone(),
                record.events.clone(),
                record.state.clone(),
            )
        };
        visited.insert(self.inner.id);
        let mut children = Vec::new();
        for child in self.children() {
            if !visited.contains(&child.id()) {
                children.push(child.node_guarded(visited));
            }
        }
        Node {
            id: self.inner.id,
            name: self.inner.name.clone(),
            status,
            parent_id: self.parent().map(|p| p.id()),
            children,
            logs,
            events,
            state,
        }
    }

    // ---- observation -------------------------------------------------

    /// Register the object whose observable fields go into snapshots
    pub fn set_state_source(&self, source: Arc<dyn Observable>) {
        *lock(&self.inner.state_source) = Some(source);
    }

    /// Current observable fields, without recording or emitting anything
    pub fn observe_state(&self) -> Option<StateSnapshot> {
        let source = lock(&self.inner.state_source).clone();
        source.map(|s| s.snapshot())
    }

    /// Take a snapshot, store it on the node and notify observers
    pub fn snapshot_state(&self) -> Option<StateSnapshot> {
        let state = self.observe_state()?;
        lock(&self.inner.record).state = Some(state.clone());
        self.emit(EventKind::StateSnapshot {
            state: state.clone(),
        });
        dispatch::state_updated(self);
        Some(state)
    }

    // ---- events and logs ---------------------------------------------

    /// Record an event originating from this unit and deliver it to the root's observers
    pub fn emit(&self, kind: EventKind) {
        self.record_event(Event::new(self.node_info(), kind));
    }

    pub(crate) fn record_event(&self, event: Event) {
        lock(&self.inner.record).events.push(event.clone());
        dispatch::event(self, &event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> LogId {
        self.push_log(LogEntry::new(self.inner.id, level, message))
    }

    pub fn log_with(&self, level: LogLevel, message: impl Into<String>, data: impl Into<Value>) -> LogId {
        self.push_log(LogEntry::new(self.inner.id, level, message).with_data(data))
    }

    pub fn debug(&self, message: impl Into<String>) -> LogId {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl Into<String>) -> LogId {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> LogId {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> LogId {
        self.log(LogLevel::Error, message)
    }

    fn push_log(&self, entry: LogEntry) -> LogId {
        let entry = {
            let mut record = lock(&self.inner.record);
            let entry = entry.with_parent_log(record.origin_log);
            record.logs.push(entry.clone());
            entry
        };
        dispatch::log(self, &entry);
        entry.id
    }

    // ---- cancellation ------------------------------------------------

    /// Request cooperative cancellation of this unit and its subtree
    pub fn cancel(&self) {
        tracing::info!(unit = %self.label(), "cancellation requested");
        self.inner.cancellation.cancel();
    }

    /// True when this unit or any ancestor has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.ancestors_inclusive()
            .iter()
            .any(|unit| unit.inner.cancellation.is_cancelled())
    }

    /// Resolves once this unit or any ancestor is cancelled
    pub async fn cancelled(&self) {
        let tokens: Vec<CancellationToken> = self
            .ancestors_inclusive()
            .iter()
            .map(|unit| unit.inner.cancellation.clone())
            .collect();
        let waits = tokens.iter().map(|token| Box::pin(token.cancelled()));
        futures::future::select_all(waits).await;
    }

    /// `self` followed by its ancestors, stopping at the depth guard
    fn ancestors_inclusive(&self) -> Vec<ExecutionUnit> {
        let mut chain = vec![self.clone()];
        let mut seen = HashSet::from([self.id()]);
        let mut cursor = self.parent();
        while let Some(unit) = cursor {
            if !seen.insert(unit.id()) || chain.len() > crate::MAX_TREE_DEPTH {
                break;
            }
            cursor = unit.parent();
            chain.push(unit);
        }
        chain
    }

    /// Id of the node new steps and tasks of this unit should hang from
    pub(crate) fn current_node_id(&self) -> NodeId {
        context::try_current()
            .filter(|ctx| ctx.unit().ptr_eq(self))
            .map(|ctx| ctx.node().id)
            .unwrap_or(self.inner.id)
    }
}

impl PartialEq for ExecutionUnit {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ExecutionUnit {}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arborcore::{ObservedField, REDACTED};

    struct Counter {
        hits: i64,
    }

    impl Observable for Counter {
        fn observe(&self) -> Vec<ObservedField> {
            vec![
                ObservedField::visible("hits", self.hits),
                ObservedField::redacted("api_key", "abc"),
            ]
        }
    }

    #[test]
    fn test_new_rejects_bad_names() {
        assert!(ExecutionUnit::new("").is_err());
        assert!(ExecutionUnit::new("ok").is_ok());
    }

    #[test]
    fn test_clones_share_identity() {
        let a = ExecutionUnit::new("a").unwrap();
        let b = ExecutionUnit::new("a").unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.status(), NodeStatus::Idle);
        assert!(a.is_root());
    }

    #[test]
    fn test_logs_are_recorded_with_origin() {
        let parent = ExecutionUnit::new("parent").unwrap();
        let spawn_log = parent.info("spawning worker");
        let child = ExecutionUnit::with_parent("worker", &parent).unwrap();
        child.set_origin_log(parent.last_log_id());

        child.log_with(LogLevel::Warn, "slow", 42i64);
        let logs = child.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].parent_log_id, Some(spawn_log));
        assert_eq!(logs[0].data, Some(Value::from(42i64)));
        assert_eq!(logs[0].unit_id, child.id());
    }

    #[test]
    fn test_snapshot_state() {
        let unit = ExecutionUnit::new("stateful").unwrap();
        assert!(unit.snapshot_state().is_none());

        unit.set_state_source(Arc::new(Counter { hits: 7 }));
        let state = unit.snapshot_state().unwrap();
        assert_eq!(state.get("hits"), Some(&Value::from(7i64)));
        assert_eq!(state.get("api_key"), Some(&Value::from(REDACTED)));
        assert_eq!(unit.state(), Some(state));
        assert_eq!(unit.events().last().map(Event::name), Some("stateSnapshot"));
    }

    #[test]
    fn test_cancellation_is_inherited() {
        let root = ExecutionUnit::new("root").unwrap();
        let child = ExecutionUnit::with_parent("child", &root).unwrap();
        assert!(!child.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
        assert!(root.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_for_ancestor() {
        let root = ExecutionUnit::new("root").unwrap();
        let child = ExecutionUnit::with_parent("child", &root).unwrap();
        root.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), child.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_node_snapshot_links() {
        let root = ExecutionUnit::new("root").unwrap();
        let child = ExecutionUnit::with_parent("child", &root).unwrap();
        let node = root.node();
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].id, child.id());
        assert_eq!(node.children[0].parent_id, Some(root.id()));
        assert_eq!(node.parent_id, None);
    }
}
