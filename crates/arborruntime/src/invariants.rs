//! Structural invariants and a read-only view over serialized trees.

use crate::unit::ExecutionUnit;
use arborcore::{Node, NodeId, NodeStatus};
use std::collections::{BTreeMap, HashSet};

/// Check the live tree below `root`:
/// - every unit is reachable through exactly one parent
/// - each child points back at the parent that lists it
/// - the Node-level child ids mirror the live children list
pub fn check_invariants(root: &ExecutionUnit) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    check_unit(root, &mut seen, &mut errors);
    errors
}

fn check_unit(unit: &ExecutionUnit, seen: &mut HashSet<NodeId>, errors: &mut Vec<String>) {
    if !seen.insert(unit.id()) {
        errors.push(format!("{}: reachable more than once", unit.label()));
        return;
    }

    let children = unit.children();
    let live_ids: Vec<NodeId> = children.iter().map(ExecutionUnit::id).collect();
    if live_ids != unit.child_ids() {
        errors.push(format!(
            "{}: node-level children diverge from live children",
            unit.label()
        ));
    }

    for child in &children {
        match child.parent() {
            Some(parent) if parent.ptr_eq(unit) => {}
            Some(parent) => errors.push(format!(
                "{}: listed under {} but points at {}",
                child.label(),
                unit.label(),
                parent.label()
            )),
            None => errors.push(format!(
                "{}: listed under {} but has no parent",
                child.label(),
                unit.label()
            )),
        }
        check_unit(child, seen, errors);
    }
}

/// Check a serialized tree: unique ids and consistent `parent_id`s
pub fn validate_node(root: &Node) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    validate(root, root.parent_id, &mut seen, &mut errors, &root.name);
    errors
}

fn validate(
    node: &Node,
    expected_parent: Option<NodeId>,
    seen: &mut HashSet<NodeId>,
    errors: &mut Vec<String>,
    path: &str,
) {
    if !seen.insert(node.id) {
        errors.push(format!("duplicate id '{}' at {}", node.id, path));
    }
    if node.parent_id != expected_parent {
        errors.push(format!("{}: parent_id does not match enclosing node", path));
    }
    for child in &node.children {
        let child_path = format!("{}/{}", path, child.name);
        validate(child, Some(node.id), seen, errors, &child_path);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewEntry {
    name: String,
    status: NodeStatus,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Read-only parent/children index over a [`Node`] tree
///
/// Two views are equal when they describe the same structure, regardless of
/// which `Node` instances they were built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeView {
    root: NodeId,
    entries: BTreeMap<NodeId, ViewEntry>,
}

impl TreeView {
    pub fn from_node(root: &Node) -> Self {
        let mut entries = BTreeMap::new();
        index(root, None, &mut entries);
        Self {
            root: root.id,
            entries,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.entries.get(&id).map(|e| e.status)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entries.get(&id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.entries
            .get(&id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }
}

fn index(node: &Node, parent: Option<NodeId>, entries: &mut BTreeMap<NodeId, ViewEntry>) {
    entries.insert(
        node.id,
        ViewEntry {
            name: node.name.clone(),
            status: node.status,
            parent,
            children: node.children.iter().map(|c| c.id).collect(),
        },
    );
    for child in &node.children {
        index(child, Some(node.id), entries);
    }
}
