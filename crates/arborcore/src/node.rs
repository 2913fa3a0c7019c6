use crate::{Event, LogEntry, StateSnapshot, TreeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type NodeId = Uuid;

/// Longest accepted unit or step name, in characters
pub const MAX_NAME_LEN: usize = 256;

/// Check that a name is non-empty and within [`MAX_NAME_LEN`]
pub fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.trim().is_empty() {
        return Err(TreeError::InvalidName("name must not be empty".to_string()));
    }
    let len = name.chars().count();
    if len > MAX_NAME_LEN {
        return Err(TreeError::InvalidName(format!(
            "name is {} characters, limit is {}",
            len, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    /// Completed, failed and cancelled admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Idle, NodeStatus::Running)
                | (NodeStatus::Idle, NodeStatus::Cancelled)
                | (NodeStatus::Running, NodeStatus::Completed)
                | (NodeStatus::Running, NodeStatus::Failed)
                | (NodeStatus::Running, NodeStatus::Cancelled)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lightweight header identifying the node an event or step refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, parent_id: Option<NodeId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: NodeStatus::Idle,
            parent_id,
        }
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// External, serializable view of one point in the execution tree
///
/// The parent is held by id only; children are owned in attach order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
}

impl Node {
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            parent_id: self.parent_id,
        }
    }

    /// Depth-first search for a node by id, including `self`
    pub fn find(&self, id: NodeId) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Number of nodes in this subtree, including `self`
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Node::len).sum::<usize>()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Indented one-line-per-node rendering
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!(
            "{} [{}] logs={} events={}\n",
            self.name,
            self.status,
            self.logs.len(),
            self.events.len()
        ));
        for child in &self.children {
            child.write_outline(depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, parent: Option<NodeId>) -> Node {
        let info = NodeInfo::new(name, parent);
        Node {
            id: info.id,
            name: info.name,
            status: NodeStatus::Idle,
            parent_id: parent,
            children: Vec::new(),
            logs: Vec::new(),
            events: Vec::new(),
            state: None,
        }
    }

    #[test]
    fn test_status_machine() {
        assert!(NodeStatus::Idle.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Failed));
        assert!(!NodeStatus::Idle.can_transition_to(NodeStatus::Completed));
        assert!(!NodeStatus::Completed.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Cancelled.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }

    #[test]
    fn test_name_bounds() {
        assert!(validate_name("fetch").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_find_and_len() {
        let mut root = leaf("root", None);
        let mut mid = leaf("mid", Some(root.id));
        let bottom = leaf("bottom", Some(mid.id));
        let bottom_id = bottom.id;
        mid.children.push(bottom);
        root.children.push(mid);

        assert_eq!(root.len(), 3);
        assert_eq!(root.find(bottom_id).map(|n| n.name.as_str()), Some("bottom"));
        assert!(root.outline().contains("    bottom [idle]"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&NodeStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
